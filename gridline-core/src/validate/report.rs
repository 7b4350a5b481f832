use serde::{Deserialize, Serialize};
use std::fmt;

/// What happened to rows that broke a range rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeAction {
    Dropped,
    Capped,
}

/// One finding. Issues are only recorded when their count is non-zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationIssue {
    MissingColumns {
        columns: Vec<String>,
    },
    Duplicates {
        count: usize,
    },
    OutOfRange {
        field: String,
        count: usize,
        min: f64,
        max: f64,
        action: RangeAction,
    },
    NullRequired {
        field: String,
        count: usize,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingColumns { columns } => {
                write!(f, "Missing required columns: {}", columns.join(", "))
            }
            ValidationIssue::Duplicates { count } => {
                write!(f, "Removed {count} duplicate records")
            }
            ValidationIssue::OutOfRange {
                field,
                count,
                min,
                max,
                action: RangeAction::Dropped,
            } => write!(
                f,
                "Found {count} records with invalid {field} outside [{min}, {max}]; rows removed"
            ),
            ValidationIssue::OutOfRange {
                field,
                count,
                min,
                max,
                action: RangeAction::Capped,
            } => write!(
                f,
                "Found {count} records with {field} out of range [{min}, {max}]; values capped"
            ),
            ValidationIssue::NullRequired { field, count } => {
                write!(f, "Found {count} null values in {field}; rows removed")
            }
        }
    }
}

/// Outcome of one validation pass.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub input_rows: usize,
    pub output_rows: usize,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// Human-readable issue lines, in the order they were found.
    pub fn messages(&self) -> Vec<String> {
        self.issues.iter().map(ToString::to_string).collect()
    }

    /// True when the whole batch was rejected for missing columns.
    pub fn rejected(&self) -> bool {
        self.issues
            .iter()
            .any(|i| matches!(i, ValidationIssue::MissingColumns { .. }))
    }

    pub fn rows_removed(&self) -> usize {
        self.input_rows.saturating_sub(self.output_rows)
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_render_bounds_without_trailing_zeros() {
        let issue = ValidationIssue::OutOfRange {
            field: "yards_gained".into(),
            count: 2,
            min: -99.0,
            max: 99.0,
            action: RangeAction::Capped,
        };
        assert_eq!(
            issue.to_string(),
            "Found 2 records with yards_gained out of range [-99, 99]; values capped"
        );
    }

    #[test]
    fn issue_json_is_tagged() {
        let json = serde_json::to_string(&ValidationIssue::Duplicates { count: 3 }).unwrap();
        assert_eq!(json, r#"{"type":"DUPLICATES","count":3}"#);
    }
}
