//! Gridline Runner: pipeline orchestration over `gridline-core`.
//!
//! This crate provides:
//! - TOML pipeline configuration with per-section defaults
//! - CSV file-drop source feeding the extraction controller
//! - Extraction, transformation and consensus runs with terminal statuses
//! - JSONL run log
//! - CSV export and ranked consensus tables

pub mod config;
pub mod export;
pub mod history;
pub mod pipeline;
pub mod source;
pub mod status;

pub use config::{
    ConfigError, ConsensusConfig, ExtractionConfig, LoggingConfig, PipelineConfig, StorageConfig,
    ValidationConfig,
};
pub use export::{batch_to_csv, export_table, format_consensus_table, top_consensus};
pub use history::{RunLog, RunLogEntry, RunRecord};
pub use pipeline::Pipeline;
pub use source::{parse_cell, CsvFileFetcher};
pub use status::{
    ConsensusSummary, ExtractionRequest, ExtractionStatus, Freshness, RunStatus, StageStatus,
    TransformOptions, TransformationSummary,
};
