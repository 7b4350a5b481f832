use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{check_key, high_water_mark, row_has_key, ReadFilter, StoreError, TableRef, Tier, Warehouse};
use crate::domain::{HighWaterMark, RecordBatch, TemporalKey};

/// In-process warehouse. Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    tables: Mutex<BTreeMap<TableRef, RecordBatch>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<TableRef, RecordBatch>>, StoreError> {
        self.tables.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl Warehouse for MemoryWarehouse {
    fn append_batch(&self, target: &TableRef, batch: &RecordBatch) -> Result<usize, StoreError> {
        let mut tables = self.lock()?;
        tables.entry(target.clone()).or_default().extend(batch.clone());
        Ok(batch.len())
    }

    fn read_high_water_mark(&self, target: &TableRef) -> Result<Option<HighWaterMark>, StoreError> {
        let tables = self.lock()?;
        Ok(tables.get(target).and_then(|t| high_water_mark(&t.records)))
    }

    fn replace_batch(
        &self,
        target: &TableRef,
        key: TemporalKey,
        batch: &RecordBatch,
    ) -> Result<usize, StoreError> {
        check_key(key, batch)?;
        let mut tables = self.lock()?;
        let table = tables.entry(target.clone()).or_default();
        table.retain(|r| !row_has_key(r, key));
        table.extend(batch.clone());
        Ok(batch.len())
    }

    fn read(&self, target: &TableRef, filter: ReadFilter) -> Result<RecordBatch, StoreError> {
        let tables = self.lock()?;
        let Some(table) = tables.get(target) else {
            return Ok(RecordBatch::new());
        };
        Ok(RecordBatch {
            columns: table.columns.clone(),
            records: table
                .records
                .iter()
                .filter(|r| filter.matches(r))
                .cloned()
                .collect(),
        })
    }

    fn list_tables(&self, tier: Tier) -> Result<Vec<String>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .keys()
            .filter(|t| t.tier == tier)
            .map(|t| t.table.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RawRecord;

    fn week_rows(season: i32, week: u32, n: usize) -> RecordBatch {
        (0..n)
            .map(|i| {
                RawRecord::new("t")
                    .with("player_id", format!("P{i}"))
                    .with("season", season)
                    .with("week", week)
            })
            .collect()
    }

    #[test]
    fn append_accumulates_and_marks() {
        let store = MemoryWarehouse::new();
        let t = TableRef::bronze("raw_weekly_stats");
        assert_eq!(store.read_high_water_mark(&t).unwrap(), None);

        store.append_batch(&t, &week_rows(2024, 1, 3)).unwrap();
        store.append_batch(&t, &week_rows(2024, 2, 2)).unwrap();
        assert_eq!(store.row_count(&t).unwrap(), 5);
        assert_eq!(
            store.read_high_water_mark(&t).unwrap(),
            Some(HighWaterMark {
                season: 2024,
                week: Some(2)
            })
        );
    }

    #[test]
    fn replace_is_idempotent_per_key() {
        let store = MemoryWarehouse::new();
        let t = TableRef::gold("consensus_projections");
        let key = TemporalKey::week(2024, 3);

        store.replace_batch(&t, key, &week_rows(2024, 3, 4)).unwrap();
        store.replace_batch(&t, key, &week_rows(2024, 3, 4)).unwrap();
        store.replace_batch(&t, TemporalKey::week(2024, 4), &week_rows(2024, 4, 1)).unwrap();

        assert_eq!(store.read(&t, ReadFilter::key(key)).unwrap().len(), 4);
        assert_eq!(store.row_count(&t).unwrap(), 5);
        assert_eq!(store.list_tables(Tier::Gold).unwrap(), vec!["consensus_projections"]);
    }

    #[test]
    fn absent_table_reads_empty() {
        let store = MemoryWarehouse::new();
        assert!(store
            .read(&TableRef::silver("nothing"), ReadFilter::all())
            .unwrap()
            .is_empty());
    }
}
