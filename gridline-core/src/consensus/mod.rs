//! Multi-source projection consensus.
//!
//! Raw projection rows are normalized (names, teams, scoring) into
//! `ProjectionRecord`s, then merged per (subject, season, week) into
//! `ConsensusRecord`s with dispersion and a confidence rating.

pub mod merger;
pub mod normalize;
pub mod priority;

pub use merger::{summarize, ConsensusMerger};
pub use normalize::ProjectionNormalizer;
pub use priority::SourcePriority;
