use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::debug;

use super::ratios::derive_ratios;
use super::schema::{ResolvedFields, SchemaError, EVENT_SCHEMA, WEEKLY_LINE_SCHEMA};
use crate::domain::{
    round2, AggregateKey, AggregateLevel, AggregateRecord, MeanStat, RawRecord, RecordBatch,
    SubjectContext, SubjectId,
};

#[derive(Debug, Error, PartialEq)]
pub enum AggregateError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("roll-up expects {expected}-level input, found a {found}-level record")]
    LevelMismatch {
        expected: AggregateLevel,
        found: AggregateLevel,
    },
}

/// Rows produced plus rows that could not be keyed.
#[derive(Debug, Clone, PartialEq)]
pub struct RollupReport {
    pub records: Vec<AggregateRecord>,
    pub skipped: usize,
}

/// Running totals for one output key.
struct Accumulator {
    context: SubjectContext,
    plays: u32,
    games_played: u32,
    game_ids: BTreeSet<String>,
    sums: BTreeMap<String, f64>,
    means: BTreeMap<String, (f64, u32)>,
    maxes: BTreeMap<String, f64>,
}

impl Accumulator {
    fn new(fields: &ResolvedFields) -> Self {
        Self {
            context: SubjectContext::default(),
            plays: 0,
            games_played: 0,
            game_ids: BTreeSet::new(),
            sums: fields.sums.iter().map(|s| (s.clone(), 0.0)).collect(),
            means: BTreeMap::new(),
            maxes: BTreeMap::new(),
        }
    }

    fn add_mean(&mut self, stat: &str, value: f64, weight: u32) {
        if weight == 0 {
            return;
        }
        let slot = self.means.entry(stat.to_string()).or_insert((0.0, 0));
        slot.0 += value * weight as f64;
        slot.1 += weight;
    }

    fn add_max(&mut self, stat: &str, value: f64) {
        self.maxes
            .entry(stat.to_string())
            .and_modify(|m| *m = m.max(value))
            .or_insert(value);
    }

    /// Fold one raw row, reading only the resolved stat fields.
    fn absorb_row(&mut self, record: &RawRecord, fields: &ResolvedFields) {
        self.context.absorb(&SubjectContext::from_record(record));
        for stat in &fields.sums {
            if let Some(v) = record.f64(stat) {
                *self.sums.entry(stat.clone()).or_insert(0.0) += v;
            }
        }
        for stat in &fields.means {
            if let Some(v) = record.f64(stat) {
                self.add_mean(stat, v, 1);
            }
        }
        for stat in &fields.maxes {
            if let Some(v) = record.f64(stat) {
                self.add_max(stat, v);
            }
        }
    }

    /// Fold one aggregate from the level below.
    fn absorb_aggregate(&mut self, record: &AggregateRecord) {
        self.context.absorb(&record.context);
        self.plays += record.plays;
        for (stat, v) in &record.sums {
            *self.sums.entry(stat.clone()).or_insert(0.0) += v;
        }
        for (stat, mean) in &record.means {
            self.add_mean(stat, mean.value, mean.observations);
        }
        for (stat, v) in &record.maxes {
            self.add_max(stat, *v);
        }
    }

    fn finish(self, level: AggregateLevel, key: AggregateKey) -> AggregateRecord {
        let mut agg = AggregateRecord::new(level, key);
        agg.context = self.context;
        agg.plays = self.plays;
        agg.games_played = self.games_played;
        agg.ratios = derive_ratios(&self.sums);
        agg.means = self
            .means
            .into_iter()
            .map(|(stat, (total, n))| {
                (
                    stat,
                    MeanStat {
                        value: total / n as f64,
                        observations: n,
                    },
                )
            })
            .collect();
        agg.maxes = self.maxes;
        if level == AggregateLevel::Season {
            agg.per_game = self
                .sums
                .iter()
                .map(|(stat, total)| {
                    let avg = if agg.games_played > 0 {
                        round2(total / agg.games_played as f64)
                    } else {
                        0.0
                    };
                    (stat.clone(), avg)
                })
                .collect();
        }
        agg.sums = self.sums;
        agg
    }
}

fn row_subject(record: &RawRecord) -> Option<SubjectId> {
    let value = record.get("player_id");
    if value.is_null() {
        return None;
    }
    let id = value.to_string();
    (!id.trim().is_empty()).then(|| SubjectId(id))
}

fn require_level(records: &[AggregateRecord], expected: AggregateLevel) -> Result<(), AggregateError> {
    match records.iter().find(|r| r.level != expected) {
        Some(r) => Err(AggregateError::LevelMismatch {
            expected,
            found: r.level,
        }),
        None => Ok(()),
    }
}

/// Stateless roll-up engine.
#[derive(Debug, Clone, Default)]
pub struct Aggregator;

impl Aggregator {
    pub fn new() -> Self {
        Self
    }

    /// Play-by-play events → one game aggregate per (player, game).
    ///
    /// Rows without a player, game, season or week are skipped and counted.
    pub fn events_to_games(&self, batch: &RecordBatch) -> Result<RollupReport, AggregateError> {
        let fields = EVENT_SCHEMA.resolve(batch)?;
        let mut groups: BTreeMap<AggregateKey, Accumulator> = BTreeMap::new();
        let mut skipped = 0;

        for record in batch.iter() {
            let game_id = record.get("game_id");
            let (Some(subject), Some(season), Some(week), false) = (
                row_subject(record),
                record.season(),
                record.week(),
                game_id.is_null(),
            ) else {
                skipped += 1;
                continue;
            };
            let key = AggregateKey {
                subject,
                season,
                week: Some(week),
                game_id: Some(game_id.to_string()),
            };
            let acc = groups.entry(key).or_insert_with(|| Accumulator::new(&fields));
            acc.plays += 1;
            acc.games_played = 1;
            acc.absorb_row(record, &fields);
        }

        if skipped > 0 {
            debug!(skipped, "event rows without a complete game key");
        }
        Ok(RollupReport {
            records: groups
                .into_iter()
                .map(|(key, acc)| acc.finish(AggregateLevel::Game, key))
                .collect(),
            skipped,
        })
    }

    /// Game aggregates → one week aggregate per (player, season, week).
    ///
    /// Games played is the number of distinct game ids in the group.
    pub fn games_to_weeks(
        &self,
        games: &[AggregateRecord],
    ) -> Result<Vec<AggregateRecord>, AggregateError> {
        require_level(games, AggregateLevel::Game)?;
        let fields = ResolvedFields::from_aggregates(games);
        let mut groups: BTreeMap<AggregateKey, Accumulator> = BTreeMap::new();

        for game in games {
            let key = AggregateKey {
                subject: game.key.subject.clone(),
                season: game.key.season,
                week: game.key.week,
                game_id: None,
            };
            let acc = groups.entry(key).or_insert_with(|| Accumulator::new(&fields));
            if let Some(id) = &game.key.game_id {
                acc.game_ids.insert(id.clone());
            }
            acc.absorb_aggregate(game);
        }

        Ok(groups
            .into_iter()
            .map(|(key, mut acc)| {
                acc.games_played = acc.game_ids.len() as u32;
                acc.finish(AggregateLevel::Week, key)
            })
            .collect())
    }

    /// Week aggregates → one season aggregate per (player, season), with
    /// per-game averages.
    pub fn weeks_to_seasons(
        &self,
        weeks: &[AggregateRecord],
    ) -> Result<Vec<AggregateRecord>, AggregateError> {
        require_level(weeks, AggregateLevel::Week)?;
        let fields = ResolvedFields::from_aggregates(weeks);
        let mut groups: BTreeMap<AggregateKey, Accumulator> = BTreeMap::new();

        for week in weeks {
            let key = AggregateKey {
                subject: week.key.subject.clone(),
                season: week.key.season,
                week: None,
                game_id: None,
            };
            let acc = groups.entry(key).or_insert_with(|| Accumulator::new(&fields));
            acc.games_played += week.games_played;
            acc.absorb_aggregate(week);
        }

        Ok(groups
            .into_iter()
            .map(|(key, acc)| acc.finish(AggregateLevel::Season, key))
            .collect())
    }

    /// Weekly stat lines (already one row per player-week at the source) →
    /// week aggregates. Each line counts its `games_played` value, or 1.
    pub fn weekly_lines_to_weeks(
        &self,
        batch: &RecordBatch,
    ) -> Result<RollupReport, AggregateError> {
        let fields = WEEKLY_LINE_SCHEMA.resolve(batch)?;
        let mut groups: BTreeMap<AggregateKey, Accumulator> = BTreeMap::new();
        let mut skipped = 0;

        for record in batch.iter() {
            let (Some(subject), Some(season), Some(week)) =
                (row_subject(record), record.season(), record.week())
            else {
                skipped += 1;
                continue;
            };
            let key = AggregateKey {
                subject,
                season,
                week: Some(week),
                game_id: None,
            };
            let games = record
                .get("games_played")
                .as_i64()
                .and_then(|g| u32::try_from(g).ok())
                .unwrap_or(1);
            let acc = groups.entry(key).or_insert_with(|| Accumulator::new(&fields));
            acc.games_played += games;
            acc.absorb_row(record, &fields);
        }

        if skipped > 0 {
            debug!(skipped, "weekly lines without a complete week key");
        }
        Ok(RollupReport {
            records: groups
                .into_iter()
                .map(|(key, acc)| acc.finish(AggregateLevel::Week, key))
                .collect(),
            skipped,
        })
    }
}
