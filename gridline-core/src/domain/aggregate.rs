//! Aggregate records produced by the roll-up hierarchy.
//!
//! Stats are kept in separate maps by how they combine (sum, mean, max) so a
//! higher level can be computed exactly from the one below. Derived ratios
//! and per-game averages are recomputed from sums at every level.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::ids::SubjectId;
use super::record::{FieldValue, RawRecord, TemporalKey};
use crate::aggregate::schema;

/// Grain of an aggregate record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateLevel {
    Game,
    Week,
    Season,
}

impl AggregateLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateLevel::Game => "game",
            AggregateLevel::Week => "week",
            AggregateLevel::Season => "season",
        }
    }
}

impl fmt::Display for AggregateLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grouping key. Field order gives the deterministic output order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AggregateKey {
    pub subject: SubjectId,
    pub season: i32,
    pub week: Option<u32>,
    pub game_id: Option<String>,
}

impl AggregateKey {
    pub fn temporal(&self) -> TemporalKey {
        TemporalKey {
            season: self.season,
            week: self.week,
        }
    }
}

/// Descriptive fields carried alongside the key (first non-null wins).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubjectContext {
    pub name: Option<String>,
    pub position: Option<String>,
    pub team: Option<String>,
}

impl SubjectContext {
    /// Fill any empty slot from `other`.
    pub fn absorb(&mut self, other: &SubjectContext) {
        if self.name.is_none() {
            self.name.clone_from(&other.name);
        }
        if self.position.is_none() {
            self.position.clone_from(&other.position);
        }
        if self.team.is_none() {
            self.team.clone_from(&other.team);
        }
    }

    pub fn from_record(record: &RawRecord) -> Self {
        let text = |field: &str| {
            record
                .text(field)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            name: text("player_name"),
            position: text("position"),
            team: text("team"),
        }
    }
}

/// A mean together with the observation count behind it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeanStat {
    pub value: f64,
    pub observations: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub level: AggregateLevel,
    pub key: AggregateKey,
    pub context: SubjectContext,
    pub games_played: u32,
    /// Event rows behind this aggregate (zero when lifted from weekly lines).
    pub plays: u32,
    pub sums: BTreeMap<String, f64>,
    pub means: BTreeMap<String, MeanStat>,
    pub maxes: BTreeMap<String, f64>,
    pub ratios: BTreeMap<String, f64>,
    /// Season level only: sum / games played.
    pub per_game: BTreeMap<String, f64>,
}

const OBS_SUFFIX: &str = "_obs";
const PER_GAME_PREFIX: &str = "avg_";
const FIXED_COLUMNS: &[&str] = &[
    "player_id",
    "season",
    "week",
    "game_id",
    "player_name",
    "position",
    "team",
    "games_played",
    "plays",
    "level",
];

impl AggregateRecord {
    pub fn new(level: AggregateLevel, key: AggregateKey) -> Self {
        Self {
            level,
            key,
            context: SubjectContext::default(),
            games_played: 0,
            plays: 0,
            sums: BTreeMap::new(),
            means: BTreeMap::new(),
            maxes: BTreeMap::new(),
            ratios: BTreeMap::new(),
            per_game: BTreeMap::new(),
        }
    }

    pub fn sum(&self, stat: &str) -> f64 {
        self.sums.get(stat).copied().unwrap_or(0.0)
    }

    /// Flatten into a storable row.
    pub fn to_record(&self, source: &str) -> RawRecord {
        let mut record = RawRecord::new(source)
            .with("level", self.level.as_str())
            .with("player_id", self.key.subject.as_str())
            .with("season", self.key.season)
            .with("week", self.key.week)
            .with("game_id", self.key.game_id.clone())
            .with("player_name", self.context.name.clone())
            .with("position", self.context.position.clone())
            .with("team", self.context.team.clone())
            .with("games_played", self.games_played)
            .with("plays", self.plays);

        for (stat, value) in &self.sums {
            record.set(stat, *value);
        }
        for (stat, mean) in &self.means {
            record.set(stat, mean.value);
            record.set(&format!("{stat}{OBS_SUFFIX}"), mean.observations);
        }
        for (stat, value) in &self.maxes {
            record.set(stat, *value);
        }
        for (stat, value) in &self.ratios {
            record.set(stat, *value);
        }
        for (stat, value) in &self.per_game {
            record.set(&format!("{PER_GAME_PREFIX}{stat}"), *value);
        }
        record
    }

    /// Rebuild from a stored row. Returns `None` when the key is incomplete.
    ///
    /// Numeric columns outside the known mean/max/ratio sets are read as sums.
    pub fn from_record(level: AggregateLevel, record: &RawRecord) -> Option<Self> {
        let subject = record.get("player_id").to_string();
        if subject.is_empty() {
            return None;
        }
        let season = record.season()?;
        let week = record.week();
        if level != AggregateLevel::Season && week.is_none() {
            return None;
        }
        let game_id = record.text("game_id").map(str::to_string);
        if level == AggregateLevel::Game && game_id.is_none() {
            return None;
        }

        let mut agg = AggregateRecord::new(
            level,
            AggregateKey {
                subject: SubjectId(subject),
                season,
                week,
                game_id,
            },
        );
        agg.context = SubjectContext::from_record(record);
        agg.games_played = record
            .get("games_played")
            .as_i64()
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0);
        agg.plays = record
            .get("plays")
            .as_i64()
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0);

        for (column, value) in &record.fields {
            if FIXED_COLUMNS.contains(&column.as_str()) || column.ends_with(OBS_SUFFIX) {
                continue;
            }
            if matches!(value, FieldValue::Text(_) | FieldValue::Bool(_)) {
                continue;
            }
            let Some(v) = value.as_f64() else { continue };

            if let Some(stat) = column.strip_prefix(PER_GAME_PREFIX) {
                agg.per_game.insert(stat.to_string(), v);
            } else if schema::is_ratio(column) {
                agg.ratios.insert(column.clone(), v);
            } else if schema::MAX_STATS.contains(&column.as_str()) {
                agg.maxes.insert(column.clone(), v);
            } else if schema::MEAN_STATS.contains(&column.as_str())
                || record.fields.contains_key(&format!("{column}{OBS_SUFFIX}"))
            {
                let observations = record
                    .get(&format!("{column}{OBS_SUFFIX}"))
                    .as_i64()
                    .and_then(|n| u32::try_from(n).ok())
                    .unwrap_or(1);
                agg.means.insert(
                    column.clone(),
                    MeanStat {
                        value: v,
                        observations,
                    },
                );
            } else {
                agg.sums.insert(column.clone(), v);
            }
        }
        Some(agg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_week() -> AggregateRecord {
        let mut agg = AggregateRecord::new(
            AggregateLevel::Week,
            AggregateKey {
                subject: SubjectId::new("P1"),
                season: 2023,
                week: Some(4),
                game_id: None,
            },
        );
        agg.context.name = Some("Test Player".into());
        agg.games_played = 1;
        agg.sums.insert("receiving_yards".into(), 88.0);
        agg.sums.insert("targets".into(), 8.0);
        agg.means.insert(
            "target_share".into(),
            MeanStat {
                value: 0.24,
                observations: 1,
            },
        );
        agg.maxes.insert("receiving_long".into(), 31.0);
        agg.ratios.insert("yards_per_target".into(), 11.0);
        agg
    }

    #[test]
    fn stored_row_rebuilds_the_same_aggregate() {
        let agg = sample_week();
        let row = agg.to_record("silver");
        let back = AggregateRecord::from_record(AggregateLevel::Week, &row).unwrap();
        assert_eq!(back, agg);
    }

    #[test]
    fn week_row_without_week_is_rejected() {
        let mut row = sample_week().to_record("silver");
        row.set("week", FieldValue::Null);
        assert!(AggregateRecord::from_record(AggregateLevel::Week, &row).is_none());
        assert!(AggregateRecord::from_record(AggregateLevel::Season, &row).is_some());
    }

    #[test]
    fn context_absorb_keeps_first_value() {
        let mut ctx = SubjectContext {
            name: Some("A".into()),
            position: None,
            team: None,
        };
        ctx.absorb(&SubjectContext {
            name: Some("B".into()),
            position: Some("WR".into()),
            team: None,
        });
        assert_eq!(ctx.name.as_deref(), Some("A"));
        assert_eq!(ctx.position.as_deref(), Some("WR"));
    }
}
