//! Run log: JSONL append-only record of every pipeline run.
//!
//! One JSON object per line, so a crash mid-write loses at most the last
//! entry and the file can be tailed or streamed.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::status::{ConsensusSummary, ExtractionStatus, RunStatus, TransformationSummary};

/// The status a run returned, tagged by run kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "run", rename_all = "snake_case")]
pub enum RunRecord {
    Extraction(ExtractionStatus),
    Transformation(TransformationSummary),
    Consensus(ConsensusSummary),
}

impl RunRecord {
    pub fn status(&self) -> RunStatus {
        match self {
            RunRecord::Extraction(s) => s.status,
            RunRecord::Transformation(s) => s.overall(),
            RunRecord::Consensus(s) => s.overall(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub recorded_at: DateTime<Utc>,
    pub status: RunStatus,
    pub record: RunRecord,
}

impl RunLogEntry {
    pub fn new(record: RunRecord) -> Self {
        Self {
            recorded_at: Utc::now(),
            status: record.status(),
            record,
        }
    }
}

/// JSONL run log file.
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one entry, creating the file and its directory if needed.
    pub fn append(&self, entry: &RunLogEntry) -> io::Result<()> {
        let json = serde_json::to_string(entry)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        writeln!(file, "{json}")?;
        file.flush()
    }

    /// Read every entry. Malformed lines are skipped.
    pub fn read_all(&self) -> io::Result<Vec<RunLogEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = io::BufReader::new(fs::File::open(&self.path)?);
        let mut entries = Vec::new();
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RunLogEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(line = number + 1, error = %e, "skipping malformed run log line"),
            }
        }
        Ok(entries)
    }

    /// The most recent `n` entries, oldest first.
    pub fn tail(&self, n: usize) -> io::Result<Vec<RunLogEntry>> {
        let mut entries = self.read_all()?;
        let skip = entries.len().saturating_sub(n);
        Ok(entries.split_off(skip))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StageStatus;
    use gridline_core::domain::{DataType, TemporalKey};

    fn consensus(status: RunStatus) -> RunLogEntry {
        RunLogEntry::new(RunRecord::Consensus(ConsensusSummary {
            key: TemporalKey::week(2024, 5),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            stages: vec![StageStatus::new("consensus_projections", status)],
        }))
    }

    #[test]
    fn append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::new(dir.path().join("logs/runs.jsonl"));
        assert!(log.read_all().unwrap().is_empty());

        let extraction = ExtractionStatus::begin(DataType::Rosters)
            .finish(RunStatus::NoData, Some("up to date".into()));
        log.append(&RunLogEntry::new(RunRecord::Extraction(extraction))).unwrap();
        log.append(&consensus(RunStatus::Success)).unwrap();

        let entries = log.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status, RunStatus::NoData);
        assert!(matches!(entries[1].record, RunRecord::Consensus(_)));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.jsonl");
        let log = RunLog::new(&path);
        log.append(&consensus(RunStatus::Error)).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json").unwrap();
        log.append(&consensus(RunStatus::Success)).unwrap();

        let entries = log.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(log.tail(1).unwrap()[0].status, RunStatus::Success);
    }

    #[test]
    fn record_is_tagged_by_kind() {
        let json = serde_json::to_string(&consensus(RunStatus::Success)).unwrap();
        assert!(json.contains("\"run\":\"consensus\""));
    }
}
