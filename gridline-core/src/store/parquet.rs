//! Parquet warehouse with Hive-style partitioning.
//!
//! Layout: `{root}/{tier}/{table}/season={S}/week={W}.parquet`, or
//! `season={S}/season.parquet` for rows without a week.
//!
//! Features:
//! - Atomic writes (write to .tmp, rename into place)
//! - One file per (season, week) key, so replacing a key rewrites one file
//! - High-water mark read from partition names without opening files
//! - Quarantine for corrupt files ({filename}.quarantined)
//! - Metadata sidecar per table (row counts and content hash per partition)

use chrono::{DateTime, Utc};
use polars::prelude::{
    Column, DataFrame, DataType as PolarsType, ParquetReader, ParquetWriter, PolarsError,
    SerReader, Series,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use super::{check_key, ReadFilter, StoreError, TableRef, Tier, Warehouse};
use crate::domain::{FieldValue, HighWaterMark, RawRecord, RecordBatch, TemporalKey};

const SOURCE_COLUMN: &str = "_source";
const INGESTED_COLUMN: &str = "_ingested_at";
const SEASON_FILE: &str = "season.parquet";

impl From<PolarsError> for StoreError {
    fn from(e: PolarsError) -> Self {
        StoreError::Parquet(e.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

/// Per-partition entry in the metadata sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionMeta {
    pub rows: usize,
    pub data_hash: String,
    pub written_at: DateTime<Utc>,
}

/// Metadata sidecar for a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMeta {
    pub tier: Tier,
    pub table: String,
    pub partitions: BTreeMap<String, PartitionMeta>,
    pub updated_at: DateTime<Utc>,
}

impl TableMeta {
    pub fn total_rows(&self) -> usize {
        self.partitions.values().map(|p| p.rows).sum()
    }
}

/// The Parquet warehouse.
pub struct ParquetWarehouse {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl ParquetWarehouse {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Root directory of the warehouse.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for a table: `{root}/{tier}/{table}/`
    fn table_dir(&self, target: &TableRef) -> PathBuf {
        self.root.join(target.tier.as_str()).join(&target.table)
    }

    /// Directory for one season: `{table_dir}/season={S}/`
    fn season_dir(&self, target: &TableRef, season: i32) -> PathBuf {
        self.table_dir(target).join(format!("season={season}"))
    }

    /// Path to the file holding one key.
    fn partition_path(&self, target: &TableRef, key: TemporalKey) -> PathBuf {
        let dir = self.season_dir(target, key.season);
        match key.week {
            Some(week) => dir.join(format!("week={week}.parquet")),
            None => dir.join(SEASON_FILE),
        }
    }

    fn meta_path(&self, target: &TableRef) -> PathBuf {
        self.table_dir(target).join("meta.json")
    }

    /// Metadata sidecar for a table, if one has been written.
    pub fn table_meta(&self, target: &TableRef) -> Option<TableMeta> {
        let content = fs::read_to_string(self.meta_path(target)).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn update_meta(
        &self,
        target: &TableRef,
        key: TemporalKey,
        batch: Option<&RecordBatch>,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut meta = self.table_meta(target).unwrap_or_else(|| TableMeta {
            tier: target.tier,
            table: target.table.clone(),
            partitions: BTreeMap::new(),
            updated_at: now,
        });
        let name = partition_name(key);
        match batch {
            Some(batch) => {
                let bytes = serde_json::to_vec(&batch.records)
                    .map_err(|e| StoreError::Meta(format!("hash serialization: {e}")))?;
                meta.partitions.insert(
                    name,
                    PartitionMeta {
                        rows: batch.len(),
                        data_hash: blake3::hash(&bytes).to_hex().to_string(),
                        written_at: now,
                    },
                );
            }
            None => {
                meta.partitions.remove(&name);
            }
        }
        meta.updated_at = now;
        let json = serde_json::to_string_pretty(&meta)
            .map_err(|e| StoreError::Meta(format!("meta serialization: {e}")))?;
        fs::write(self.meta_path(target), json)
            .map_err(|e| StoreError::Meta(format!("meta write: {e}")))
    }

    /// Write one key's file atomically, or remove it when `batch` is empty.
    fn write_partition(
        &self,
        target: &TableRef,
        key: TemporalKey,
        batch: &RecordBatch,
    ) -> Result<(), StoreError> {
        let path = self.partition_path(target, key);
        if batch.is_empty() {
            if path.exists() {
                fs::remove_file(&path)?;
            }
            return self.update_meta(target, key, None);
        }

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut df = batch_to_dataframe(batch)?;
        let tmp_path = path.with_extension("parquet.tmp");
        write_parquet(&mut df, &tmp_path)?;

        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            StoreError::Io(format!("atomic rename failed: {e}"))
        })?;
        debug!(table = %target, %key, rows = batch.len(), "partition written");
        self.update_meta(target, key, Some(batch))
    }

    /// Load one file; corrupt files are quarantined and read as empty.
    fn load_partition(&self, path: &Path) -> Result<RecordBatch, StoreError> {
        if !path.exists() {
            return Ok(RecordBatch::new());
        }
        match read_parquet(path) {
            Ok(batch) => Ok(batch),
            Err(e) => {
                let quarantine = path.with_extension("parquet.quarantined");
                warn!(path = %path.display(), error = %e, "quarantining corrupt partition");
                fs::rename(path, &quarantine)?;
                Ok(RecordBatch::new())
            }
        }
    }

    /// Season numbers with a directory under the table, ascending.
    fn seasons(&self, target: &TableRef) -> Result<Vec<i32>, StoreError> {
        let dir = self.table_dir(target);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut seasons = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(season) = name.strip_prefix("season=").and_then(|s| s.parse().ok()) {
                seasons.push(season);
            }
        }
        seasons.sort_unstable();
        Ok(seasons)
    }

    /// Partition files in a season directory, as (week, path). Week is `None`
    /// for the season-grain file.
    fn partitions_in(&self, season_dir: &Path) -> Result<Vec<(Option<u32>, PathBuf)>, StoreError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(season_dir)? {
            let path = entry?.path();
            // Skip non-parquet files (.tmp, .quarantined)
            if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name == SEASON_FILE {
                out.push((None, path.clone()));
            } else if let Some(week) = name
                .strip_prefix("week=")
                .and_then(|s| s.strip_suffix(".parquet"))
                .and_then(|s| s.parse().ok())
            {
                out.push((Some(week), path.clone()));
            }
        }
        out.sort();
        Ok(out)
    }
}

fn partition_name(key: TemporalKey) -> String {
    match key.week {
        Some(w) => format!("season={}/week={w}", key.season),
        None => format!("season={}", key.season),
    }
}

impl Warehouse for ParquetWarehouse {
    fn append_batch(&self, target: &TableRef, batch: &RecordBatch) -> Result<usize, StoreError> {
        if batch.is_empty() {
            return Ok(0);
        }
        if batch.iter().any(|r| r.season().is_none()) {
            return Err(StoreError::MissingPartitionKey {
                table: target.to_string(),
            });
        }
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        fs::create_dir_all(self.table_dir(target))?;

        for (key, part) in batch.partition_by_key() {
            let mut existing = self.load_partition(&self.partition_path(target, key))?;
            existing.extend(part);
            self.write_partition(target, key, &existing)?;
        }
        Ok(batch.len())
    }

    fn read_high_water_mark(&self, target: &TableRef) -> Result<Option<HighWaterMark>, StoreError> {
        for season in self.seasons(target)?.into_iter().rev() {
            let parts = self.partitions_in(&self.season_dir(target, season))?;
            if parts.is_empty() {
                continue;
            }
            let week = parts.iter().filter_map(|(w, _)| *w).max();
            return Ok(Some(HighWaterMark { season, week }));
        }
        Ok(None)
    }

    fn replace_batch(
        &self,
        target: &TableRef,
        key: TemporalKey,
        batch: &RecordBatch,
    ) -> Result<usize, StoreError> {
        check_key(key, batch)?;
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        fs::create_dir_all(self.table_dir(target))?;
        self.write_partition(target, key, batch)?;
        Ok(batch.len())
    }

    fn read(&self, target: &TableRef, filter: ReadFilter) -> Result<RecordBatch, StoreError> {
        let mut out = RecordBatch::new();
        for season in self.seasons(target)? {
            if filter.season.is_some_and(|s| s != season) {
                continue;
            }
            for (week, path) in self.partitions_in(&self.season_dir(target, season))? {
                if filter.week.is_some() && week != filter.week {
                    continue;
                }
                out.extend(self.load_partition(&path)?);
            }
        }
        out.retain(|r| filter.matches(r));
        Ok(out)
    }

    fn list_tables(&self, tier: Tier) -> Result<Vec<String>, StoreError> {
        let dir = self.root.join(tier.as_str());
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut tables = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.path().is_dir() {
                tables.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        tables.sort();
        Ok(tables)
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

/// Storage type chosen for a column from the values it holds.
///
/// The widest kind present wins: any text makes the column text, otherwise
/// any float makes it float. Cells are widened to that kind on write, so a
/// column mixing `Int` and `Text` reads back with every cell as `Text`, and
/// one mixing `Int` and `Float` reads back as `Float`. Feeds that need a
/// stable type must send the column with one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Text,
    Float,
    Int,
    Bool,
}

fn infer_kind(values: &[&FieldValue]) -> ColumnKind {
    let (mut text, mut float, mut int, mut boolean) = (false, false, false, false);
    for v in values {
        match v {
            FieldValue::Text(_) => text = true,
            FieldValue::Float(_) => float = true,
            FieldValue::Int(_) => int = true,
            FieldValue::Bool(_) => boolean = true,
            FieldValue::Null => {}
        }
    }
    if text {
        ColumnKind::Text
    } else if float {
        ColumnKind::Float
    } else if int {
        ColumnKind::Int
    } else if boolean {
        ColumnKind::Bool
    } else {
        ColumnKind::Text
    }
}

fn values_to_column(name: &str, values: &[&FieldValue]) -> Column {
    match infer_kind(values) {
        ColumnKind::Text => Column::new(
            name.into(),
            values
                .iter()
                .map(|v| (!v.is_null()).then(|| v.to_string()))
                .collect::<Vec<Option<String>>>(),
        ),
        ColumnKind::Float => Column::new(
            name.into(),
            values.iter().map(|v| v.as_f64()).collect::<Vec<Option<f64>>>(),
        ),
        ColumnKind::Int => Column::new(
            name.into(),
            values
                .iter()
                .map(|v| match v {
                    FieldValue::Int(i) => Some(*i),
                    FieldValue::Bool(b) => Some(i64::from(*b)),
                    _ => None,
                })
                .collect::<Vec<Option<i64>>>(),
        ),
        ColumnKind::Bool => Column::new(
            name.into(),
            values
                .iter()
                .map(|v| match v {
                    FieldValue::Bool(b) => Some(*b),
                    _ => None,
                })
                .collect::<Vec<Option<bool>>>(),
        ),
    }
}

/// Convert a batch to a DataFrame, one column per declared column plus provenance.
fn batch_to_dataframe(batch: &RecordBatch) -> Result<DataFrame, StoreError> {
    let mut columns = Vec::with_capacity(batch.columns.len() + 2);
    for name in &batch.columns {
        let values: Vec<&FieldValue> = batch.records.iter().map(|r| r.get(name)).collect();
        columns.push(values_to_column(name, &values));
    }
    columns.push(Column::new(
        SOURCE_COLUMN.into(),
        batch
            .records
            .iter()
            .map(|r| r.provenance.source.clone())
            .collect::<Vec<String>>(),
    ));
    columns.push(Column::new(
        INGESTED_COLUMN.into(),
        batch
            .records
            .iter()
            .map(|r| r.provenance.ingested_at.map(|t| t.to_rfc3339()))
            .collect::<Vec<Option<String>>>(),
    ));
    Ok(DataFrame::new(columns)?)
}

fn series_values(series: &Series) -> Result<Vec<FieldValue>, StoreError> {
    let values = match series.dtype() {
        PolarsType::Int64 => series
            .i64()?
            .into_iter()
            .map(|v| v.map_or(FieldValue::Null, FieldValue::Int))
            .collect(),
        PolarsType::Float64 => series
            .f64()?
            .into_iter()
            .map(|v| v.map_or(FieldValue::Null, FieldValue::Float))
            .collect(),
        PolarsType::Boolean => series
            .bool()?
            .into_iter()
            .map(|v| v.map_or(FieldValue::Null, FieldValue::Bool))
            .collect(),
        PolarsType::String => series
            .str()?
            .into_iter()
            .map(|v| v.map_or(FieldValue::Null, |s| FieldValue::Text(s.to_string())))
            .collect(),
        dtype if dtype.is_integer() => return series_values(&series.cast(&PolarsType::Int64)?),
        dtype if dtype.is_float() => return series_values(&series.cast(&PolarsType::Float64)?),
        _ => return series_values(&series.cast(&PolarsType::String)?),
    };
    Ok(values)
}

/// Convert a DataFrame back to a batch. Null cells are left out of the row.
fn dataframe_to_batch(df: &DataFrame) -> Result<RecordBatch, StoreError> {
    let mut records: Vec<RawRecord> = (0..df.height()).map(|_| RawRecord::default()).collect();
    let mut columns = BTreeSet::new();

    for column in df.get_columns() {
        let name = column.name().to_string();
        let values = series_values(column.as_materialized_series())?;

        if name == SOURCE_COLUMN {
            for (record, value) in records.iter_mut().zip(values) {
                record.provenance.source = value.as_str().unwrap_or_default().to_string();
            }
            continue;
        }
        if name == INGESTED_COLUMN {
            for (record, value) in records.iter_mut().zip(values) {
                record.provenance.ingested_at = value
                    .as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|t| t.with_timezone(&Utc));
            }
            continue;
        }

        for (record, value) in records.iter_mut().zip(values) {
            if !value.is_null() {
                record.fields.insert(name.clone(), value);
            }
        }
        columns.insert(name);
    }
    Ok(RecordBatch { columns, records })
}

fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), StoreError> {
    let file = fs::File::create(path)?;
    ParquetWriter::new(file).finish(df)?;
    Ok(())
}

fn read_parquet(path: &Path) -> Result<RecordBatch, StoreError> {
    let file = fs::File::open(path)?;
    let df = ParquetReader::new(file).finish()?;
    dataframe_to_batch(&df)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::row_has_key;
    use chrono::TimeZone;

    fn warehouse() -> (tempfile::TempDir, ParquetWarehouse) {
        let dir = tempfile::tempdir().unwrap();
        let store = ParquetWarehouse::new(dir.path());
        (dir, store)
    }

    fn week_rows(season: i32, week: u32, n: usize) -> RecordBatch {
        (0..n)
            .map(|i| {
                let mut r = RawRecord::new("csv")
                    .with("player_id", format!("P{i}"))
                    .with("season", season)
                    .with("week", week)
                    .with("receiving_yards", 10.5 * i as f64)
                    .with("receptions", i as i64)
                    .with("active", i % 2 == 0);
                r.provenance.ingested_at = Some(Utc.with_ymd_and_hms(2024, 9, 10, 12, 0, 0).unwrap());
                r
            })
            .collect()
    }

    #[test]
    fn append_and_read_back_values() {
        let (_dir, store) = warehouse();
        let t = TableRef::bronze("raw_weekly_stats");
        store.append_batch(&t, &week_rows(2024, 1, 3)).unwrap();

        let back = store.read(&t, ReadFilter::all()).unwrap();
        assert_eq!(back.len(), 3);
        let r = &back.records[2];
        assert_eq!(r.text("player_id"), Some("P2"));
        assert_eq!(r.get("receptions"), &FieldValue::Int(2));
        assert_eq!(r.get("receiving_yards"), &FieldValue::Float(21.0));
        assert_eq!(r.get("active"), &FieldValue::Bool(true));
        assert_eq!(r.provenance.source, "csv");
        assert!(r.provenance.ingested_at.is_some());
    }

    #[test]
    fn mixed_kind_columns_widen_on_round_trip() {
        let (_dir, store) = warehouse();
        let t = TableRef::bronze("raw_rosters");
        let batch: RecordBatch = vec![
            RawRecord::new("csv")
                .with("season", 2024)
                .with("week", 1)
                .with("jersey", 17)
                .with("height", 74),
            RawRecord::new("csv")
                .with("season", 2024)
                .with("week", 1)
                .with("jersey", "17A")
                .with("height", 73.5),
        ]
        .into_iter()
        .collect();
        store.append_batch(&t, &batch).unwrap();

        let back = store.read(&t, ReadFilter::all()).unwrap();
        assert_eq!(back.records[0].get("jersey"), &FieldValue::Text("17".into()));
        assert_eq!(back.records[1].get("jersey"), &FieldValue::Text("17A".into()));
        assert_eq!(back.records[0].get("height"), &FieldValue::Float(74.0));
        assert_eq!(back.records[0].get("season"), &FieldValue::Int(2024));
    }

    #[test]
    fn append_adds_to_existing_partition() {
        let (_dir, store) = warehouse();
        let t = TableRef::bronze("raw_weekly_stats");
        store.append_batch(&t, &week_rows(2024, 1, 2)).unwrap();
        store.append_batch(&t, &week_rows(2024, 1, 3)).unwrap();
        assert_eq!(store.row_count(&t).unwrap(), 5);
        assert_eq!(store.table_meta(&t).unwrap().total_rows(), 5);
    }

    #[test]
    fn high_water_mark_from_partition_names() {
        let (_dir, store) = warehouse();
        let t = TableRef::bronze("raw_weekly_stats");
        assert_eq!(store.read_high_water_mark(&t).unwrap(), None);

        store.append_batch(&t, &week_rows(2023, 17, 1)).unwrap();
        store.append_batch(&t, &week_rows(2024, 2, 1)).unwrap();
        store.append_batch(&t, &week_rows(2024, 10, 1)).unwrap();
        assert_eq!(
            store.read_high_water_mark(&t).unwrap(),
            Some(HighWaterMark {
                season: 2024,
                week: Some(10)
            })
        );
    }

    #[test]
    fn replace_overwrites_one_key_only() {
        let (_dir, store) = warehouse();
        let t = TableRef::silver("player_week_stats");
        let k1 = TemporalKey::week(2024, 1);
        let k2 = TemporalKey::week(2024, 2);
        store.replace_batch(&t, k1, &week_rows(2024, 1, 4)).unwrap();
        store.replace_batch(&t, k2, &week_rows(2024, 2, 2)).unwrap();
        store.replace_batch(&t, k1, &week_rows(2024, 1, 1)).unwrap();

        let rows = store.read(&t, ReadFilter::all()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows.iter().filter(|r| row_has_key(r, k1)).count(), 1);
        assert_eq!(store.read(&t, ReadFilter::key(k2)).unwrap().len(), 2);
    }

    #[test]
    fn season_grain_rows_use_season_file() {
        let (_dir, store) = warehouse();
        let t = TableRef::gold("player_season_totals");
        let batch: RecordBatch = vec![RawRecord::new("agg")
            .with("player_id", "P1")
            .with("season", 2023)
            .with("passing_yards", 4100.0)]
        .into_iter()
        .collect();
        store.replace_batch(&t, TemporalKey::season(2023), &batch).unwrap();
        assert!(store.root().join("gold/player_season_totals/season=2023/season.parquet").exists());
        assert_eq!(
            store.read_high_water_mark(&t).unwrap(),
            Some(HighWaterMark {
                season: 2023,
                week: None
            })
        );
    }

    #[test]
    fn rows_without_season_are_rejected() {
        let (_dir, store) = warehouse();
        let batch: RecordBatch = vec![RawRecord::new("t").with("player_id", "P1")].into_iter().collect();
        let err = store
            .append_batch(&TableRef::bronze("raw_rosters"), &batch)
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingPartitionKey { .. }));
    }

    #[test]
    fn corrupt_partition_is_quarantined() {
        let (_dir, store) = warehouse();
        let t = TableRef::bronze("raw_weekly_stats");
        store.append_batch(&t, &week_rows(2024, 1, 2)).unwrap();
        let path = store.partition_path(&t, TemporalKey::week(2024, 1));
        fs::write(&path, b"not parquet").unwrap();

        let rows = store.read(&t, ReadFilter::all()).unwrap();
        assert!(rows.is_empty());
        assert!(path.with_extension("parquet.quarantined").exists());
    }

    #[test]
    fn list_tables_by_tier() {
        let (_dir, store) = warehouse();
        store
            .append_batch(&TableRef::bronze("raw_plays"), &week_rows(2024, 1, 1))
            .unwrap();
        store
            .append_batch(&TableRef::bronze("raw_weekly_stats"), &week_rows(2024, 1, 1))
            .unwrap();
        assert_eq!(
            store.list_tables(Tier::Bronze).unwrap(),
            vec!["raw_plays".to_string(), "raw_weekly_stats".to_string()]
        );
        assert!(store.list_tables(Tier::Gold).unwrap().is_empty());
    }
}
