//! Declared stat catalog and per-level input schemas.
//!
//! Each level declares which fields it requires and how each stat combines.
//! A batch is checked against its level schema once, at entry; rows are then
//! read through the resolved field lists instead of probing every column.

use std::collections::BTreeSet;
use thiserror::Error;

use crate::domain::{AggregateRecord, RecordBatch};

/// Counting stats: combine by addition.
pub const SUM_STATS: &[&str] = &[
    "passing_attempts",
    "completions",
    "passing_yards",
    "passing_tds",
    "interceptions",
    "sacks",
    "sack_yards",
    "passing_2pt",
    "carries",
    "rushing_attempts",
    "rushing_yards",
    "rushing_tds",
    "rushing_2pt",
    "targets",
    "receptions",
    "receiving_yards",
    "receiving_tds",
    "receiving_2pt",
    "fumbles",
    "fumbles_lost",
    "fantasy_points",
    "fantasy_points_standard",
    "fantasy_points_ppr",
    "fantasy_points_half_ppr",
    "red_zone_targets",
    "red_zone_carries",
    "red_zone_touches",
    "red_zone_tds",
    "air_yards",
    "yards_after_catch",
    "touches",
    "opportunities",
];

/// Share/percentage stats: combine by observation-weighted mean.
pub const MEAN_STATS: &[&str] = &["snap_percentage", "target_share", "air_yards_share"];

/// Longest-play stats: combine by maximum.
pub const MAX_STATS: &[&str] = &["passing_long", "rushing_long", "receiving_long"];

/// A ratio recomputed from sums at every level.
#[derive(Debug, Clone, Copy)]
pub struct RatioSpec {
    pub name: &'static str,
    pub numerator: &'static str,
    /// First denominator with a positive sum is used; if all present
    /// denominators are zero the ratio is 0.
    pub denominators: &'static [&'static str],
    pub scale: f64,
}

pub const RATIOS: &[RatioSpec] = &[
    RatioSpec {
        name: "completion_pct",
        numerator: "completions",
        denominators: &["passing_attempts"],
        scale: 100.0,
    },
    RatioSpec {
        name: "catch_rate",
        numerator: "receptions",
        denominators: &["targets"],
        scale: 100.0,
    },
    RatioSpec {
        name: "yards_per_attempt",
        numerator: "passing_yards",
        denominators: &["passing_attempts"],
        scale: 1.0,
    },
    RatioSpec {
        name: "yards_per_carry",
        numerator: "rushing_yards",
        denominators: &["rushing_attempts", "carries"],
        scale: 1.0,
    },
    RatioSpec {
        name: "yards_per_reception",
        numerator: "receiving_yards",
        denominators: &["receptions"],
        scale: 1.0,
    },
    RatioSpec {
        name: "yards_per_target",
        numerator: "receiving_yards",
        denominators: &["targets"],
        scale: 1.0,
    },
    RatioSpec {
        name: "passing_td_rate",
        numerator: "passing_tds",
        denominators: &["passing_attempts"],
        scale: 100.0,
    },
    RatioSpec {
        name: "red_zone_td_rate",
        numerator: "red_zone_tds",
        denominators: &["red_zone_touches"],
        scale: 100.0,
    },
];

pub fn is_ratio(name: &str) -> bool {
    RATIOS.iter().any(|r| r.name == name)
}

#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("{level} input is missing required column(s): {}", .missing.join(", "))]
    MissingColumns {
        level: &'static str,
        missing: Vec<String>,
    },
}

/// Stat fields a batch actually carries, grouped by combine rule.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedFields {
    pub sums: Vec<String>,
    pub means: Vec<String>,
    pub maxes: Vec<String>,
}

impl ResolvedFields {
    /// Stat fields present across a set of aggregate records.
    pub fn from_aggregates(records: &[AggregateRecord]) -> Self {
        let mut sums = BTreeSet::new();
        let mut means = BTreeSet::new();
        let mut maxes = BTreeSet::new();
        for r in records {
            sums.extend(r.sums.keys().cloned());
            means.extend(r.means.keys().cloned());
            maxes.extend(r.maxes.keys().cloned());
        }
        Self {
            sums: sums.into_iter().collect(),
            means: means.into_iter().collect(),
            maxes: maxes.into_iter().collect(),
        }
    }
}

/// Input schema of a raw-row level (events, or weekly stat lines).
#[derive(Debug, Clone)]
pub struct LevelSchema {
    pub level: &'static str,
    pub required: &'static [&'static str],
}

/// Play-by-play events rolled up to games.
pub const EVENT_SCHEMA: LevelSchema = LevelSchema {
    level: "event",
    required: &["player_id", "game_id", "season", "week"],
};

/// Weekly stat lines lifted to week aggregates.
pub const WEEKLY_LINE_SCHEMA: LevelSchema = LevelSchema {
    level: "weekly line",
    required: &["player_id", "season", "week"],
};

impl LevelSchema {
    /// Check required columns and resolve which declared stats the batch carries.
    pub fn resolve(&self, batch: &RecordBatch) -> Result<ResolvedFields, SchemaError> {
        let missing: Vec<String> = self
            .required
            .iter()
            .filter(|c| !batch.has_column(c))
            .map(|c| c.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(SchemaError::MissingColumns {
                level: self.level,
                missing,
            });
        }

        let present = |names: &[&str]| -> Vec<String> {
            names
                .iter()
                .filter(|n| batch.has_column(n))
                .map(|n| n.to_string())
                .collect()
        };
        Ok(ResolvedFields {
            sums: present(SUM_STATS),
            means: present(MEAN_STATS),
            maxes: present(MAX_STATS),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_groups_are_disjoint() {
        for s in SUM_STATS {
            assert!(!MEAN_STATS.contains(s) && !MAX_STATS.contains(s) && !is_ratio(s));
        }
        for m in MEAN_STATS {
            assert!(!MAX_STATS.contains(m) && !is_ratio(m));
        }
    }

    #[test]
    fn resolve_reports_every_missing_column() {
        let batch = RecordBatch::with_columns(["season", "passing_yards"]);
        let err = EVENT_SCHEMA.resolve(&batch).unwrap_err();
        assert_eq!(
            err,
            SchemaError::MissingColumns {
                level: "event",
                missing: vec!["player_id".into(), "game_id".into(), "week".into()],
            }
        );
    }

    #[test]
    fn resolve_lists_only_present_stats() {
        let batch = RecordBatch::with_columns([
            "player_id",
            "season",
            "week",
            "receptions",
            "target_share",
            "receiving_long",
            "mystery_column",
        ]);
        let fields = WEEKLY_LINE_SCHEMA.resolve(&batch).unwrap();
        assert_eq!(fields.sums, vec!["receptions".to_string()]);
        assert_eq!(fields.means, vec!["target_share".to_string()]);
        assert_eq!(fields.maxes, vec!["receiving_long".to_string()]);
    }
}
