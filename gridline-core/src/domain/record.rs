//! Raw records and batches: the unit of data moving between tiers.
//!
//! A `RawRecord` is a heterogeneous mapping from field name to value, plus
//! provenance. Absent fields read as null. A `RecordBatch` carries its
//! declared column set separately from the rows, so a column can be declared
//! even when every row leaves it empty.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum FieldValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

static NULL_VALUE: FieldValue = FieldValue::Null;

impl FieldValue {
    /// Null, or a float that is NaN.
    pub fn is_null(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Float(v) => v.is_nan(),
            _ => false,
        }
    }

    /// Numeric view. Booleans read as 0/1; text is parsed when it looks numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Float(v) if !v.is_nan() => Some(*v),
            FieldValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            FieldValue::Text(s) => s.trim().parse::<f64>().ok().filter(|v| !v.is_nan()),
            _ => None,
        }
    }

    /// Integral view. Floats qualify only when they carry no fraction.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            FieldValue::Float(v) if v.is_finite() && v.fract() == 0.0 => Some(*v as i64),
            FieldValue::Text(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldValue::Int(_) | FieldValue::Float(_))
    }

    /// Canonical text used when values take part in a composite key.
    ///
    /// Numerically equal ints and floats produce the same fragment.
    pub fn key_fragment(&self) -> String {
        match self {
            FieldValue::Null => "\u{0}".to_string(),
            FieldValue::Float(v) if v.is_nan() => "\u{0}".to_string(),
            FieldValue::Int(v) => format!("#{v}"),
            FieldValue::Float(v) => format!("#{v}"),
            FieldValue::Bool(b) => format!("?{b}"),
            FieldValue::Text(s) => format!("'{s}"),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => Ok(()),
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(v as i64)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::Int(v as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(FieldValue::Null, Into::into)
    }
}

/// Where a record came from and when it entered the warehouse.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Provenance {
    pub source: String,
    pub ingested_at: Option<DateTime<Utc>>,
}

impl Provenance {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ingested_at: None,
        }
    }
}

/// (season, week) pair. Week is absent for season-grain rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TemporalKey {
    pub season: i32,
    pub week: Option<u32>,
}

impl TemporalKey {
    pub fn week(season: i32, week: u32) -> Self {
        Self {
            season,
            week: Some(week),
        }
    }

    pub fn season(season: i32) -> Self {
        Self { season, week: None }
    }
}

impl fmt::Display for TemporalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.week {
            Some(w) => write!(f, "{} week {}", self.season, w),
            None => write!(f, "{}", self.season),
        }
    }
}

/// Latest (season, week) already present in a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HighWaterMark {
    pub season: i32,
    pub week: Option<u32>,
}

/// One row of source data.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawRecord {
    pub fields: BTreeMap<String, FieldValue>,
    pub provenance: Provenance,
}

impl RawRecord {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            fields: BTreeMap::new(),
            provenance: Provenance::new(source),
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: &str, value: impl Into<FieldValue>) {
        self.fields.insert(field.to_string(), value.into());
    }

    /// Value of `field`; absent fields read as null.
    pub fn get(&self, field: &str) -> &FieldValue {
        self.fields.get(field).unwrap_or(&NULL_VALUE)
    }

    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        self.fields.remove(field)
    }

    pub fn f64(&self, field: &str) -> Option<f64> {
        self.get(field).as_f64()
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.get(field).as_str()
    }

    pub fn season(&self) -> Option<i32> {
        self.get("season").as_i64().and_then(|v| i32::try_from(v).ok())
    }

    pub fn week(&self) -> Option<u32> {
        self.get("week").as_i64().and_then(|v| u32::try_from(v).ok())
    }

    /// (season, week) of this record, when it has a season.
    pub fn temporal_key(&self) -> Option<TemporalKey> {
        self.season().map(|season| TemporalKey {
            season,
            week: self.week(),
        })
    }

    /// Composite key over `columns`, used for duplicate detection.
    pub fn composite_key(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.get(c).key_fragment())
            .collect::<Vec<_>>()
            .join("\u{1f}")
    }
}

/// Rows plus the declared column set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecordBatch {
    pub columns: BTreeSet<String>,
    pub records: Vec<RawRecord>,
}

impl RecordBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Batch whose declared columns are the union of every record's fields.
    pub fn from_records(records: Vec<RawRecord>) -> Self {
        let columns = records
            .iter()
            .flat_map(|r| r.fields.keys().cloned())
            .collect();
        Self { columns, records }
    }

    /// Empty batch that still declares `columns`.
    pub fn with_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: RawRecord) {
        for key in record.fields.keys() {
            if !self.columns.contains(key) {
                self.columns.insert(key.clone());
            }
        }
        self.records.push(record);
    }

    pub fn extend(&mut self, other: RecordBatch) {
        self.columns.extend(other.columns);
        self.records.extend(other.records);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains(column)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RawRecord> {
        self.records.iter()
    }

    /// Keep only rows for which `keep` returns true. Declared columns stay.
    pub fn retain(&mut self, keep: impl FnMut(&RawRecord) -> bool) {
        self.records.retain(keep);
    }

    /// Split into one batch per (season, week). Rows without a season are skipped.
    pub fn partition_by_key(&self) -> BTreeMap<TemporalKey, RecordBatch> {
        let mut parts: BTreeMap<TemporalKey, RecordBatch> = BTreeMap::new();
        for record in &self.records {
            if let Some(key) = record.temporal_key() {
                parts
                    .entry(key)
                    .or_insert_with(|| RecordBatch {
                        columns: self.columns.clone(),
                        records: Vec::new(),
                    })
                    .records
                    .push(record.clone());
            }
        }
        parts
    }

    /// Stamp every row with the ingestion time.
    pub fn stamp_ingested(&mut self, at: DateTime<Utc>) {
        for record in &mut self.records {
            record.provenance.ingested_at = Some(at);
        }
    }
}

impl FromIterator<RawRecord> for RecordBatch {
    fn from_iter<T: IntoIterator<Item = RawRecord>>(iter: T) -> Self {
        let mut batch = RecordBatch::new();
        for record in iter {
            batch.push(record);
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_field_reads_as_null() {
        let record = RawRecord::new("test").with("season", 2023);
        assert!(record.get("week").is_null());
        assert_eq!(record.season(), Some(2023));
        assert_eq!(record.week(), None);
    }

    #[test]
    fn nan_counts_as_null() {
        assert!(FieldValue::Float(f64::NAN).is_null());
        assert_eq!(FieldValue::Float(f64::NAN).as_f64(), None);
    }

    #[test]
    fn numeric_key_fragments_ignore_representation() {
        assert_eq!(
            FieldValue::Int(5).key_fragment(),
            FieldValue::Float(5.0).key_fragment()
        );
        assert_ne!(
            FieldValue::Int(5).key_fragment(),
            FieldValue::Text("5".into()).key_fragment()
        );
    }

    #[test]
    fn float_week_reads_as_integer() {
        let record = RawRecord::new("test")
            .with("season", 2023.0)
            .with("week", 7.0);
        assert_eq!(record.temporal_key(), Some(TemporalKey::week(2023, 7)));
    }

    #[test]
    fn declared_columns_survive_empty_rows() {
        let mut batch = RecordBatch::with_columns(["player_id", "season"]);
        batch.retain(|_| false);
        assert!(batch.is_empty());
        assert!(batch.has_column("player_id"));
    }

    #[test]
    fn partition_groups_rows_by_season_and_week() {
        let batch: RecordBatch = vec![
            RawRecord::new("t").with("season", 2023).with("week", 1),
            RawRecord::new("t").with("season", 2023).with("week", 2),
            RawRecord::new("t").with("season", 2023).with("week", 1),
            RawRecord::new("t").with("week", 1),
        ]
        .into_iter()
        .collect();

        let parts = batch.partition_by_key();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[&TemporalKey::week(2023, 1)].len(), 2);
        assert_eq!(parts[&TemporalKey::week(2023, 2)].len(), 1);
    }

    #[test]
    fn field_value_json_is_untagged() {
        let record = RawRecord::new("t")
            .with("a", 1)
            .with("b", 1.5)
            .with("c", "x")
            .with("d", FieldValue::Null);
        let json = serde_json::to_string(&record.fields).unwrap();
        assert_eq!(json, r#"{"a":1,"b":1.5,"c":"x","d":null}"#);
        let back: BTreeMap<String, FieldValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record.fields);
    }
}
