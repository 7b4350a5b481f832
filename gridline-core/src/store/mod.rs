//! Warehouse storage.
//!
//! Tables live in one of three tiers: raw (bronze), cleaned (silver) and
//! analytics (gold). Raw tables are append-only; cleaned and analytics tables
//! are rewritten one (season, week) key at a time, so re-running a stage for a
//! key replaces its rows instead of duplicating them.

pub mod memory;
pub mod parquet;
pub mod pool;

pub use memory::MemoryWarehouse;
pub use parquet::{ParquetWarehouse, TableMeta};
pub use pool::WarehousePool;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::{HighWaterMark, RawRecord, RecordBatch, TemporalKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Bronze,
    Silver,
    Gold,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Bronze => "bronze",
            Tier::Silver => "silver",
            Tier::Gold => "gold",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bronze" | "raw" => Ok(Tier::Bronze),
            "silver" | "cleaned" => Ok(Tier::Silver),
            "gold" | "analytics" => Ok(Tier::Gold),
            other => Err(format!("unknown tier '{other}'")),
        }
    }
}

/// Fully qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub tier: Tier,
    pub table: String,
}

impl TableRef {
    pub fn new(tier: Tier, table: impl Into<String>) -> Self {
        Self {
            tier,
            table: table.into(),
        }
    }

    pub fn bronze(table: impl Into<String>) -> Self {
        Self::new(Tier::Bronze, table)
    }

    pub fn silver(table: impl Into<String>) -> Self {
        Self::new(Tier::Silver, table)
    }

    pub fn gold(table: impl Into<String>) -> Self {
        Self::new(Tier::Gold, table)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.tier, self.table)
    }
}

/// Row filter for reads. `None` fields match everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadFilter {
    pub season: Option<i32>,
    pub week: Option<u32>,
}

impl ReadFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn season(season: i32) -> Self {
        Self {
            season: Some(season),
            week: None,
        }
    }

    pub fn key(key: TemporalKey) -> Self {
        Self {
            season: Some(key.season),
            week: key.week,
        }
    }

    pub fn matches(&self, record: &RawRecord) -> bool {
        if let Some(season) = self.season {
            if record.season() != Some(season) {
                return false;
            }
        }
        if let Some(week) = self.week {
            if record.week() != Some(week) {
                return false;
            }
        }
        true
    }
}

/// Structured error types for storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("table {0} does not exist")]
    NoSuchTable(String),

    #[error("row for {found} cannot be written under key {expected}")]
    KeyMismatch {
        expected: TemporalKey,
        found: String,
    },

    #[error("row has no season; {table} is partitioned by season")]
    MissingPartitionKey { table: String },

    #[error("storage I/O error: {0}")]
    Io(String),

    #[error("parquet error: {0}")]
    Parquet(String),

    #[error("metadata error: {0}")]
    Meta(String),

    #[error("warehouse lock poisoned")]
    Poisoned,

    #[error("connection failed: {0}")]
    Connect(String),
}

/// Whether a row belongs under `key` exactly (week must match, absent included).
pub fn row_has_key(record: &RawRecord, key: TemporalKey) -> bool {
    record.season() == Some(key.season) && record.week() == key.week
}

/// Highest season present, and the highest week within it.
pub fn high_water_mark<'a>(records: impl IntoIterator<Item = &'a RawRecord>) -> Option<HighWaterMark> {
    let mut mark: Option<HighWaterMark> = None;
    for record in records {
        let Some(season) = record.season() else { continue };
        let week = record.week();
        mark = Some(match mark {
            Some(m) if m.season > season => m,
            Some(m) if m.season == season => HighWaterMark {
                season,
                week: m.week.max(week),
            },
            _ => HighWaterMark { season, week },
        });
    }
    mark
}

/// Tiered table storage shared by every pipeline stage.
pub trait Warehouse: Send + Sync {
    /// Append rows to a table, creating it if needed. Returns rows written.
    fn append_batch(&self, target: &TableRef, batch: &RecordBatch) -> Result<usize, StoreError>;

    /// Latest (season, week) in a table; `None` when the table is empty or absent.
    fn read_high_water_mark(&self, target: &TableRef) -> Result<Option<HighWaterMark>, StoreError>;

    /// Delete every row stored under `key`, then insert `batch`. Every row of
    /// `batch` must carry `key`. Returns rows written.
    fn replace_batch(
        &self,
        target: &TableRef,
        key: TemporalKey,
        batch: &RecordBatch,
    ) -> Result<usize, StoreError>;

    /// Rows matching `filter`. An absent table reads as empty.
    fn read(&self, target: &TableRef, filter: ReadFilter) -> Result<RecordBatch, StoreError>;

    /// Tables in a tier.
    fn list_tables(&self, tier: Tier) -> Result<Vec<String>, StoreError>;

    fn row_count(&self, target: &TableRef) -> Result<usize, StoreError> {
        Ok(self.read(target, ReadFilter::all())?.len())
    }
}

/// Fail with `KeyMismatch` if any row is not under `key`.
pub(crate) fn check_key(key: TemporalKey, batch: &RecordBatch) -> Result<(), StoreError> {
    match batch.iter().find(|r| !row_has_key(r, key)) {
        Some(r) => Err(StoreError::KeyMismatch {
            expected: key,
            found: r
                .temporal_key()
                .map_or_else(|| "a row without season".to_string(), |k| k.to_string()),
        }),
        None => Ok(()),
    }
}
