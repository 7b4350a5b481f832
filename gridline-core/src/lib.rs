//! Gridline Core: records, validation, roll-ups, consensus, extraction control, storage.
//!
//! This crate contains the heart of the medallion pipeline:
//! - Domain types (raw records, batches, aggregates, consensus rows)
//! - Rule-driven validator with drop/cap semantics and an issue report
//! - Hierarchical roll-up aggregator (event → game → week → season)
//! - Extraction controller with fixed-delay retry and an incremental planner
//! - Consensus merger over multi-source projections
//! - Warehouse trait with in-memory and Parquet-backed stores

pub mod aggregate;
pub mod consensus;
pub mod domain;
pub mod extract;
pub mod normalize;
pub mod scoring;
pub mod store;
pub mod validate;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: types shared across stage threads are Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::RawRecord>();
        require_sync::<domain::RawRecord>();
        require_send::<domain::RecordBatch>();
        require_sync::<domain::RecordBatch>();
        require_send::<domain::AggregateRecord>();
        require_sync::<domain::AggregateRecord>();
        require_send::<domain::ConsensusRecord>();
        require_sync::<domain::ConsensusRecord>();
        require_send::<domain::ProjectionRecord>();
        require_sync::<domain::ProjectionRecord>();

        // Stage components
        require_send::<validate::Validator>();
        require_sync::<validate::Validator>();
        require_send::<aggregate::Aggregator>();
        require_sync::<aggregate::Aggregator>();
        require_send::<consensus::ConsensusMerger>();
        require_sync::<consensus::ConsensusMerger>();
        require_send::<extract::ExtractionController>();
        require_send::<extract::IncrementalPlanner>();
        require_sync::<extract::IncrementalPlanner>();

        // Storage
        require_send::<store::MemoryWarehouse>();
        require_sync::<store::MemoryWarehouse>();
        require_send::<store::ParquetWarehouse>();
        require_sync::<store::ParquetWarehouse>();
        require_send::<store::WarehousePool>();
        require_sync::<store::WarehousePool>();
    }

    /// Warehouse is object-safe so stages can hold `Arc<dyn Warehouse>`.
    #[test]
    fn warehouse_trait_is_object_safe() {
        fn _check(store: &dyn store::Warehouse, target: &store::TableRef) {
            let _ = store.read_high_water_mark(target);
        }
    }
}
