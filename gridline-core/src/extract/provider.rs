//! Fetcher trait and structured fetch errors.
//!
//! The Fetcher trait abstracts over upstream sources (file drops, HTTP feeds)
//! so the controller can retry and cache without knowing where rows come from.

use thiserror::Error;

use crate::domain::{DataType, RecordBatch};

/// Structured error types for fetch operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("source unreachable: {0}")]
    Unreachable(String),

    #[error("source data malformed: {0}")]
    Malformed(String),

    #[error("source I/O error: {0}")]
    Io(String),

    #[error("{data_type} is not offered by source '{source_name}'")]
    Unsupported {
        data_type: DataType,
        source_name: String,
    },

    #[error("fetch error: {0}")]
    Other(String),
}

/// Trait for upstream sources.
///
/// An empty batch means the source has nothing for that unit; it is not an error.
pub trait Fetcher: Send + Sync {
    /// Human-readable name of this source, recorded as row provenance.
    fn name(&self) -> &str;

    /// Fetch every row of `data_type` for one season.
    fn fetch(&self, data_type: DataType, season: i32) -> Result<RecordBatch, FetchError>;
}
