//! Domain types for the gridline warehouse

pub mod aggregate;
pub mod consensus;
pub mod data_type;
pub mod ids;
pub mod record;

pub use aggregate::{AggregateKey, AggregateLevel, AggregateRecord, MeanStat, SubjectContext};
pub use consensus::{Confidence, ConsensusRecord, FieldSummary, ProjectionRecord};
pub use data_type::DataType;
pub use ids::SubjectId;
pub use record::{
    FieldValue, HighWaterMark, Provenance, RawRecord, RecordBatch, TemporalKey,
};

/// Round to two decimal places, the precision every derived figure is stored at.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
