//! CSV file-drop source.
//!
//! Reads `{root}/{data_type}/{season}.csv`. A missing file means the source has
//! nothing for that season; an unreadable or ragged file is a fetch error and
//! is retried by the controller.

use std::path::{Path, PathBuf};

use tracing::debug;

use gridline_core::domain::{DataType, FieldValue, RawRecord, RecordBatch};
use gridline_core::extract::{FetchError, Fetcher};

/// Type a CSV cell: empty and `NA` are null, then integer, float, boolean, text.
pub fn parse_cell(raw: &str) -> FieldValue {
    let cell = raw.trim();
    if cell.is_empty() || cell.eq_ignore_ascii_case("na") || cell.eq_ignore_ascii_case("nan") {
        return FieldValue::Null;
    }
    if let Ok(i) = cell.parse::<i64>() {
        return FieldValue::Int(i);
    }
    if let Ok(f) = cell.parse::<f64>() {
        if f.is_finite() {
            return FieldValue::Float(f);
        }
    }
    match cell.to_ascii_lowercase().as_str() {
        "true" => FieldValue::Bool(true),
        "false" => FieldValue::Bool(false),
        _ => FieldValue::Text(cell.to_string()),
    }
}

pub struct CsvFileFetcher {
    name: String,
    root: PathBuf,
}

impl CsvFileFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            name: "csv_files".to_string(),
            root: root.into(),
        }
    }

    /// Override the source name stamped on rows.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn path_for(&self, data_type: DataType, season: i32) -> PathBuf {
        self.root
            .join(data_type.as_str())
            .join(format!("{season}.csv"))
    }

    fn read_file(&self, path: &Path) -> Result<RecordBatch, FetchError> {
        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| FetchError::Io(format!("{}: {e}", path.display())))?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| FetchError::Malformed(format!("{}: {e}", path.display())))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut batch = RecordBatch::with_columns(headers.iter().cloned());
        for row in reader.records() {
            let row = row.map_err(|e| FetchError::Malformed(format!("{}: {e}", path.display())))?;
            let mut record = RawRecord::new(self.name.as_str());
            for (header, cell) in headers.iter().zip(row.iter()) {
                record.set(header, parse_cell(cell));
            }
            batch.push(record);
        }
        Ok(batch)
    }
}

impl Fetcher for CsvFileFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, data_type: DataType, season: i32) -> Result<RecordBatch, FetchError> {
        let path = self.path_for(data_type, season);
        if !path.exists() {
            debug!(path = %path.display(), "no file for season");
            return Ok(RecordBatch::new());
        }
        let batch = self.read_file(&path)?;
        debug!(path = %path.display(), rows = batch.len(), "file read");
        Ok(batch)
    }
}
