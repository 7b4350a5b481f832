//! Raw projection rows → normalized projection records.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::domain::{ProjectionRecord, RawRecord, RecordBatch, SubjectId};
use crate::normalize::{match_name, normalize_position, normalize_team};
use crate::scoring::ScoringFormat;

/// Canonical stat name and the raw column names feeds use for it, in preference order.
const STAT_COLUMNS: &[(&str, &[&str])] = &[
    ("passing_yards", &["proj_passing_yards", "passing_yards"]),
    ("passing_tds", &["proj_passing_touchdowns", "passing_tds"]),
    ("interceptions", &["proj_passing_interceptions", "interceptions"]),
    ("rushing_yards", &["proj_rushing_yards", "rushing_yards"]),
    ("rushing_tds", &["proj_rushing_touchdowns", "rushing_tds"]),
    ("receiving_yards", &["proj_receiving_yards", "receiving_yards"]),
    ("receiving_tds", &["proj_receiving_touchdowns", "receiving_tds"]),
    ("receptions", &["proj_receiving_receptions", "receptions"]),
];

#[derive(Debug, Clone, Default)]
pub struct ProjectionNormalizer {
    props_sources: BTreeSet<String>,
}

impl ProjectionNormalizer {
    /// `props_sources`: feeds whose numbers come from player-prop markets.
    pub fn new<I, S>(props_sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            props_sources: props_sources.into_iter().map(Into::into).collect(),
        }
    }

    /// Normalize one raw row. Rows without a name, source, season or week yield `None`.
    pub fn normalize(&self, record: &RawRecord) -> Option<ProjectionRecord> {
        let name = match_name(record.text("player_name")?);
        if name.is_empty() {
            return None;
        }
        let source = record.text("source")?.trim().to_ascii_lowercase();
        let key = record.temporal_key().filter(|k| k.week.is_some())?;

        let stats: BTreeMap<String, f64> = STAT_COLUMNS
            .iter()
            .filter_map(|(canonical, columns)| {
                let value = columns.iter().find_map(|c| record.f64(c))?;
                Some((canonical.to_string(), value))
            })
            .collect();

        let (points_ppr, points_standard, points_half_ppr) = if stats.is_empty() {
            (
                record.f64(ScoringFormat::Ppr.column()),
                record
                    .f64(ScoringFormat::Standard.column())
                    .or_else(|| record.f64("fantasy_points")),
                record.f64(ScoringFormat::HalfPpr.column()),
            )
        } else {
            let lookup = |name: &str| stats.get(name).copied();
            (
                Some(ScoringFormat::Ppr.score(lookup)),
                Some(ScoringFormat::Standard.score(lookup)),
                Some(ScoringFormat::HalfPpr.score(lookup)),
            )
        };

        let has_yards = stats.keys().any(|k| k.ends_with("_yards"));

        Some(ProjectionRecord {
            subject: SubjectId(name),
            key,
            has_props: self.props_sources.contains(&source),
            source,
            position: record.text("position").map(normalize_position),
            team: record.text("team").map(normalize_team),
            points_ppr,
            points_standard,
            points_half_ppr,
            stats,
            completeness: if has_yards { 1.0 } else { 0.5 },
        })
    }

    pub fn normalize_batch(&self, batch: &RecordBatch) -> Vec<ProjectionRecord> {
        let out: Vec<ProjectionRecord> = batch.iter().filter_map(|r| self.normalize(r)).collect();
        if out.len() < batch.len() {
            debug!(
                skipped = batch.len() - out.len(),
                "projection rows without name, source or week"
            );
        }
        out
    }
}
