//! Terminal status records returned by every pipeline run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use gridline_core::domain::{DataType, HighWaterMark, TemporalKey};
use gridline_core::extract::{AttemptFailure, ExtractionPlan};
use gridline_core::validate::ValidationReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    NoData,
    ValidationFailed,
    LoadFailed,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::NoData => "no_data",
            RunStatus::ValidationFailed => "validation_failed",
            RunStatus::LoadFailed => "load_failed",
            RunStatus::Error => "error",
        }
    }

    /// Whether a caller may go on to the next stage.
    pub fn can_proceed(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::NoData)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which rows an extraction run should cover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRequest {
    pub data_type: DataType,
    /// Explicit seasons; when set the high-water mark is not consulted.
    pub seasons: Option<Vec<i32>>,
    /// Ignore the high-water mark and extract the full configured scope.
    pub force: bool,
}

impl ExtractionRequest {
    pub fn incremental(data_type: DataType) -> Self {
        Self {
            data_type,
            seasons: None,
            force: false,
        }
    }
}

/// Outcome of one extraction run.
///
/// Upstream results stay populated when a later step fails, so a
/// `load_failed` status still shows what was extracted and validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStatus {
    pub data_type: DataType,
    pub status: RunStatus,
    pub plan: Option<ExtractionPlan>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub rows_extracted: usize,
    pub rows_validated: usize,
    pub rows_loaded: usize,
    pub attempts: u32,
    pub failures: Vec<AttemptFailure>,
    pub issues: Vec<String>,
    pub validation: Option<ValidationReport>,
    pub message: Option<String>,
}

impl ExtractionStatus {
    pub(crate) fn begin(data_type: DataType) -> Self {
        let now = Utc::now();
        Self {
            data_type,
            status: RunStatus::Success,
            plan: None,
            started_at: now,
            finished_at: now,
            rows_extracted: 0,
            rows_validated: 0,
            rows_loaded: 0,
            attempts: 0,
            failures: Vec::new(),
            issues: Vec::new(),
            validation: None,
            message: None,
        }
    }

    pub(crate) fn finish(mut self, status: RunStatus, message: Option<String>) -> Self {
        self.status = status;
        self.message = message;
        self.finished_at = Utc::now();
        self
    }
}

/// Outcome of one transformation or consensus stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageStatus {
    pub stage: String,
    pub status: RunStatus,
    pub records_in: usize,
    pub records_out: usize,
    pub message: Option<String>,
}

impl StageStatus {
    pub fn new(stage: impl Into<String>, status: RunStatus) -> Self {
        Self {
            stage: stage.into(),
            status,
            records_in: 0,
            records_out: 0,
            message: None,
        }
    }

    pub(crate) fn counts(mut self, records_in: usize, records_out: usize) -> Self {
        self.records_in = records_in;
        self.records_out = records_out;
        self
    }

    pub(crate) fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Options for a transformation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformOptions {
    /// Also roll play-by-play rows up through game and week.
    pub include_detailed: bool,
    /// Recompute fantasy points from stat columns instead of trusting the source.
    pub force_recalc: bool,
}

/// Every stage of one transformation run, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub options: TransformOptions,
    pub stages: Vec<StageStatus>,
}

impl TransformationSummary {
    /// `error` if any stage errored, `success` if any stage wrote rows,
    /// otherwise `no_data`.
    pub fn overall(&self) -> RunStatus {
        if let Some(bad) = self.stages.iter().find(|s| !s.status.can_proceed()) {
            return bad.status;
        }
        if self.stages.iter().any(|s| s.status == RunStatus::Success) {
            RunStatus::Success
        } else {
            RunStatus::NoData
        }
    }
}

/// Consensus run for one week: projection normalization then merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusSummary {
    pub key: TemporalKey,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stages: Vec<StageStatus>,
}

impl ConsensusSummary {
    pub fn overall(&self) -> RunStatus {
        self.stages
            .iter()
            .map(|s| s.status)
            .find(|s| !s.can_proceed())
            .or_else(|| self.stages.last().map(|s| s.status))
            .unwrap_or(RunStatus::NoData)
    }
}

/// Row count and high-water mark of one raw table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Freshness {
    pub data_type: DataType,
    pub table: String,
    pub rows: usize,
    pub high_water_mark: Option<HighWaterMark>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(statuses: &[RunStatus]) -> TransformationSummary {
        TransformationSummary {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            options: TransformOptions::default(),
            stages: statuses
                .iter()
                .map(|s| StageStatus::new("stage", *s))
                .collect(),
        }
    }

    #[test]
    fn overall_prefers_failures() {
        assert_eq!(
            summary(&[RunStatus::Success, RunStatus::LoadFailed]).overall(),
            RunStatus::LoadFailed
        );
        assert_eq!(
            summary(&[RunStatus::NoData, RunStatus::Success]).overall(),
            RunStatus::Success
        );
        assert_eq!(summary(&[RunStatus::NoData]).overall(), RunStatus::NoData);
    }

    #[test]
    fn statuses_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&RunStatus::ValidationFailed).unwrap(),
            "\"validation_failed\""
        );
        assert_eq!(RunStatus::LoadFailed.to_string(), "load_failed");
        assert!(!RunStatus::Error.can_proceed());
    }
}
