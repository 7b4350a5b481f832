//! Hierarchical roll-up: event → game → week → season.
//!
//! Each step takes records of exactly the level below and groups them by the
//! target level's key. Sums add, means are observation-weighted, maxes take the
//! maximum, and ratios are recomputed from the new sums. Output is sorted by
//! key, so re-running a roll-up over the same input yields the same rows.

pub mod ratios;
pub mod rollup;
pub mod schema;

pub use ratios::derive_ratios;
pub use rollup::{AggregateError, Aggregator, RollupReport};
pub use schema::{LevelSchema, ResolvedFields, SchemaError, MAX_STATS, MEAN_STATS, SUM_STATS};
