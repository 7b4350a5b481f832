//! Rule-driven batch validation.
//!
//! Steps run in a fixed order and each sees the output of the one before:
//! 1. required columns present (otherwise the whole batch is rejected)
//! 2. duplicates on the natural key removed, first occurrence kept
//! 3. temporal fields out of range: rows dropped
//! 4. measurement fields out of range: values capped to the bound
//! 5. rows with a null required field dropped

pub mod report;
pub mod rules;

pub use report::{RangeAction, ValidationIssue, ValidationReport};
pub use rules::{default_measurement_bounds, FieldBound, ValidationRules};

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::domain::{FieldValue, RecordBatch};

#[derive(Debug, Clone)]
pub struct Validator {
    rules: ValidationRules,
}

impl Validator {
    pub fn new(rules: ValidationRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ValidationRules {
        &self.rules
    }

    /// Validate `batch`, returning the cleaned rows and the issue report.
    pub fn validate(&self, mut batch: RecordBatch) -> (RecordBatch, ValidationReport) {
        let mut report = ValidationReport {
            input_rows: batch.len(),
            ..Default::default()
        };

        let missing: Vec<String> = self
            .rules
            .required
            .iter()
            .filter(|c| !batch.has_column(c))
            .cloned()
            .collect();
        if !missing.is_empty() {
            warn!(columns = ?missing, "batch rejected: missing required columns");
            report
                .issues
                .push(ValidationIssue::MissingColumns { columns: missing });
            return (RecordBatch::with_columns(batch.columns), report);
        }

        let duplicates = self.remove_duplicates(&mut batch);
        if duplicates > 0 {
            report
                .issues
                .push(ValidationIssue::Duplicates { count: duplicates });
        }

        for bound in &self.rules.temporal_bounds {
            let before = batch.len();
            batch.retain(|r| {
                let value = r.get(&bound.field);
                if value.is_null() {
                    return true;
                }
                value.as_f64().is_some_and(|v| bound.contains(v))
            });
            let dropped = before - batch.len();
            if dropped > 0 {
                report.issues.push(ValidationIssue::OutOfRange {
                    field: bound.field.clone(),
                    count: dropped,
                    min: bound.min,
                    max: bound.max,
                    action: RangeAction::Dropped,
                });
            }
        }

        for bound in &self.rules.measurement_bounds {
            if !batch.has_column(&bound.field) {
                continue;
            }
            let mut capped = 0;
            for record in &mut batch.records {
                let Some(slot) = record.fields.get_mut(&bound.field) else {
                    continue;
                };
                let Some(v) = slot.as_f64().filter(|_| slot.is_numeric()) else {
                    continue;
                };
                if bound.contains(v) {
                    continue;
                }
                let clamped = bound.clamp(v);
                let was_int = matches!(slot, FieldValue::Int(_));
                *slot = if was_int && clamped.fract() == 0.0 {
                    FieldValue::Int(clamped as i64)
                } else {
                    FieldValue::Float(clamped)
                };
                capped += 1;
            }
            if capped > 0 {
                report.issues.push(ValidationIssue::OutOfRange {
                    field: bound.field.clone(),
                    count: capped,
                    min: bound.min,
                    max: bound.max,
                    action: RangeAction::Capped,
                });
            }
        }

        for field in &self.rules.required {
            let before = batch.len();
            batch.retain(|r| !r.get(field).is_null());
            let dropped = before - batch.len();
            if dropped > 0 {
                report.issues.push(ValidationIssue::NullRequired {
                    field: field.clone(),
                    count: dropped,
                });
            }
        }

        report.output_rows = batch.len();
        debug!(
            input = report.input_rows,
            output = report.output_rows,
            issues = report.issues.len(),
            "validation complete"
        );
        (batch, report)
    }

    fn remove_duplicates(&self, batch: &mut RecordBatch) -> usize {
        let key_columns: Vec<String> = self
            .rules
            .natural_key
            .iter()
            .filter(|c| batch.has_column(c))
            .cloned()
            .collect();
        if key_columns.is_empty() {
            return 0;
        }
        let before = batch.len();
        let mut seen = HashSet::new();
        batch.retain(|r| seen.insert(r.composite_key(&key_columns)));
        before - batch.len()
    }
}

/// Keep the most recently ingested row per natural key.
///
/// Raw tables are append-only, so re-extracted rows can shadow older ones.
/// Output keeps the input order of the surviving rows.
pub fn latest_by_key(batch: &RecordBatch, natural_key: &[&str]) -> RecordBatch {
    let key_columns: Vec<String> = natural_key
        .iter()
        .filter(|c| batch.has_column(c))
        .map(|c| c.to_string())
        .collect();
    if key_columns.is_empty() {
        return batch.clone();
    }

    let mut winner: HashMap<String, usize> = HashMap::new();
    for (idx, record) in batch.records.iter().enumerate() {
        let key = record.composite_key(&key_columns);
        let keep_previous = winner.get(&key).is_some_and(|&prev| {
            batch.records[prev].provenance.ingested_at > record.provenance.ingested_at
        });
        if !keep_previous {
            winner.insert(key, idx);
        }
    }
    let keep: HashSet<usize> = winner.into_values().collect();
    RecordBatch {
        columns: batch.columns.clone(),
        records: batch
            .records
            .iter()
            .enumerate()
            .filter(|(i, _)| keep.contains(i))
            .map(|(_, r)| r.clone())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DataType, RawRecord};
    use chrono::{TimeZone, Utc};

    fn pbp_rules() -> ValidationRules {
        ValidationRules::for_data_type(DataType::PlayByPlay, 2024)
    }

    fn play(game: &str, play_id: i64, season: i64, week: i64) -> RawRecord {
        RawRecord::new("test")
            .with("game_id", game)
            .with("play_id", play_id)
            .with("season", season)
            .with("week", week)
    }

    #[test]
    fn missing_required_column_rejects_batch() {
        let batch: RecordBatch = vec![RawRecord::new("t")
            .with("game_id", "G1")
            .with("season", 2023)
            .with("week", 1)]
        .into_iter()
        .collect();
        let (out, report) = Validator::new(pbp_rules()).validate(batch);
        assert!(out.is_empty());
        assert!(report.rejected());
        assert_eq!(report.messages(), vec!["Missing required columns: play_id"]);
    }

    #[test]
    fn duplicates_keep_first_occurrence() {
        let batch: RecordBatch = vec![
            play("G1", 1, 2023, 1).with("yards_gained", 5),
            play("G1", 1, 2023, 1).with("yards_gained", 9),
            play("G1", 2, 2023, 1).with("yards_gained", 3),
        ]
        .into_iter()
        .collect();
        let (out, report) = Validator::new(pbp_rules()).validate(batch);
        assert_eq!(out.len(), 2);
        assert_eq!(out.records[0].get("yards_gained"), &FieldValue::Int(5));
        assert_eq!(report.issues, vec![ValidationIssue::Duplicates { count: 1 }]);
    }

    #[test]
    fn out_of_range_season_is_dropped_and_yards_capped() {
        let batch: RecordBatch = vec![
            play("G1", 1, 1999, 1),
            play("G2", 1, 2023, 1).with("yards_gained", -150),
            play("G2", 2, 2023, 2).with("yards_gained", 12),
        ]
        .into_iter()
        .collect();
        let (out, report) = Validator::new(pbp_rules()).validate(batch);
        assert_eq!(out.len(), 2);
        assert_eq!(out.records[0].get("yards_gained"), &FieldValue::Int(-99));
        assert_eq!(out.records[1].get("yards_gained"), &FieldValue::Int(12));
        assert_eq!(
            report.issues,
            vec![
                ValidationIssue::OutOfRange {
                    field: "season".into(),
                    count: 1,
                    min: 2000.0,
                    max: 2025.0,
                    action: RangeAction::Dropped,
                },
                ValidationIssue::OutOfRange {
                    field: "yards_gained".into(),
                    count: 1,
                    min: -99.0,
                    max: 99.0,
                    action: RangeAction::Capped,
                },
            ]
        );
    }

    #[test]
    fn ancient_season_drops_row_while_extreme_yards_are_capped() {
        let batch: RecordBatch = vec![
            play("G0", 1, 1899, 1).with("yards_gained", 4),
            play("G1", 1, 2023, 3).with("yards_gained", -150),
        ]
        .into_iter()
        .collect();
        let (out, report) = Validator::new(pbp_rules()).validate(batch);
        assert_eq!(out.len(), 1);
        assert_eq!(out.records[0].text("game_id"), Some("G1"));
        assert_eq!(out.records[0].get("yards_gained"), &FieldValue::Int(-99));
        assert_eq!(report.rows_removed(), 1);
        assert!(report.issues.contains(&ValidationIssue::OutOfRange {
            field: "yards_gained".into(),
            count: 1,
            min: -99.0,
            max: 99.0,
            action: RangeAction::Capped,
        }));
    }

    #[test]
    fn null_required_rows_are_dropped() {
        let batch: RecordBatch = vec![
            play("G1", 1, 2023, 1),
            play("G1", 2, 2023, 1).with("week", FieldValue::Null),
        ]
        .into_iter()
        .collect();
        let (out, report) = Validator::new(pbp_rules()).validate(batch);
        assert_eq!(out.len(), 1);
        assert_eq!(
            report.issues,
            vec![ValidationIssue::NullRequired {
                field: "week".into(),
                count: 1,
            }]
        );
        assert_eq!(report.rows_removed(), 1);
    }

    #[test]
    fn clean_batch_has_no_issues() {
        let batch: RecordBatch = vec![play("G1", 1, 2023, 1), play("G1", 2, 2023, 1)]
            .into_iter()
            .collect();
        let (out, report) = Validator::new(pbp_rules()).validate(batch.clone());
        assert_eq!(out, batch);
        assert!(report.is_clean());
    }

    #[test]
    fn validation_is_idempotent() {
        let batch: RecordBatch = vec![
            play("G1", 1, 2023, 1).with("air_yards", 120.5),
            play("G1", 1, 2023, 1),
            play("G1", 2, 1990, 1),
        ]
        .into_iter()
        .collect();
        let validator = Validator::new(pbp_rules());
        let (once, _) = validator.validate(batch);
        let (twice, report) = validator.validate(once.clone());
        assert_eq!(once, twice);
        assert!(report.is_clean());
    }

    #[test]
    fn latest_by_key_prefers_newest_ingestion() {
        let old = Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap();
        let new = Utc.with_ymd_and_hms(2024, 9, 8, 0, 0, 0).unwrap();
        let mut a = RawRecord::new("t")
            .with("player_id", "P1")
            .with("season", 2024)
            .with("week", 1)
            .with("receptions", 3);
        a.provenance.ingested_at = Some(old);
        let mut b = a.clone().with("receptions", 5);
        b.provenance.ingested_at = Some(new);

        let batch: RecordBatch = vec![b, a].into_iter().collect();
        let out = latest_by_key(&batch, DataType::WeeklyStats.natural_key());
        assert_eq!(out.len(), 1);
        assert_eq!(out.records[0].get("receptions"), &FieldValue::Int(5));
    }
}
