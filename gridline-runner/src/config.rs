//! Pipeline configuration, loaded from TOML.
//!
//! Every section has defaults, so an absent file or an empty one yields a
//! working configuration:
//!
//! ```toml
//! [extraction]
//! max_retries = 3
//! retry_delay_secs = 5
//! seasons = [2022, 2023, 2024]
//! season_max_week = 22
//! source_dir = "data/raw"
//!
//! [validation]
//! min_season = 2000
//! week_range = [1, 22]
//!
//! [validation.ranges]
//! yards_gained = [-99.0, 99.0]
//!
//! [consensus]
//! source_priority = ["betonline", "pinnacle"]
//! props_sources = ["betonline", "pinnacle"]
//!
//! [storage]
//! root = "warehouse"
//!
//! [logging]
//! filter = "gridline=info"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use gridline_core::consensus::SourcePriority;
use gridline_core::domain::DataType;
use gridline_core::extract::{IncrementalPlanner, RetryPolicy};
use gridline_core::validate::{default_measurement_bounds, FieldBound, ValidationRules};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    /// Explicit full-extraction scope. Defaults to the last five seasons.
    pub seasons: Option<Vec<i32>>,
    pub season_max_week: u32,
    /// Root of the CSV file drop: `{source_dir}/{data_type}/{season}.csv`.
    pub source_dir: PathBuf,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_secs: 5,
            seasons: None,
            season_max_week: 22,
            source_dir: PathBuf::from("data/raw"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub min_season: i32,
    pub week_range: [u32; 2],
    /// Measurement ranges; out-of-range values are capped.
    pub ranges: BTreeMap<String, [f64; 2]>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_season: 2000,
            week_range: [1, 22],
            ranges: default_measurement_bounds()
                .into_iter()
                .map(|b| (b.field, [b.min, b.max]))
                .collect(),
        }
    }
}

impl ValidationConfig {
    /// Rules for one data type. Seasons may run one year past `current_year`.
    pub fn rules_for(&self, data_type: DataType, current_year: i32) -> ValidationRules {
        let mut rules = ValidationRules::new(data_type.required_columns(), data_type.natural_key())
            .with_temporal_bound(FieldBound::new(
                "season",
                f64::from(self.min_season),
                f64::from(current_year + 1),
            ));
        if data_type.is_weekly() {
            rules = rules.with_temporal_bound(FieldBound::new(
                "week",
                f64::from(self.week_range[0]),
                f64::from(self.week_range[1]),
            ));
        }
        for (field, [min, max]) in &self.ranges {
            rules = rules.with_measurement_bound(FieldBound::new(field.as_str(), *min, *max));
        }
        rules
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Order in which sources supply descriptive fields.
    pub source_priority: Vec<String>,
    /// Sources whose projections come from betting props.
    pub props_sources: Vec<String>,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        let books = vec!["betonline".to_string(), "pinnacle".to_string()];
        Self {
            source_priority: books.clone(),
            props_sources: books,
        }
    }
}

impl ConsensusConfig {
    pub fn priority(&self) -> SourcePriority {
        SourcePriority::new(self.source_priority.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
    /// JSONL run log. Relative paths resolve under `root`.
    pub run_log: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("warehouse"),
            run_log: PathBuf::from("runs.jsonl"),
        }
    }
}

impl StorageConfig {
    pub fn run_log_path(&self) -> PathBuf {
        if self.run_log.is_absolute() {
            self.run_log.clone()
        } else {
            self.root.join(&self.run_log)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "gridline=info".to_string(),
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub extraction: ExtractionConfig,
    pub validation: ValidationConfig,
    pub consensus: ConsensusConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl PipelineConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and check a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.extraction.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "extraction.max_retries must be at least 1".into(),
            ));
        }
        if self.extraction.season_max_week == 0 {
            return Err(ConfigError::Invalid(
                "extraction.season_max_week must be at least 1".into(),
            ));
        }
        let [lo, hi] = self.validation.week_range;
        if lo > hi {
            return Err(ConfigError::Invalid(format!(
                "validation.week_range [{lo}, {hi}] is empty"
            )));
        }
        if let Some((field, [min, max])) = self.validation.ranges.iter().find(|(_, r)| r[0] > r[1]) {
            return Err(ConfigError::Invalid(format!(
                "validation.ranges.{field} [{min}, {max}] is empty"
            )));
        }
        if matches!(&self.extraction.seasons, Some(s) if s.is_empty()) {
            return Err(ConfigError::Invalid(
                "extraction.seasons must not be empty when set".into(),
            ));
        }
        Ok(())
    }

    /// Full-extraction scope: the configured seasons, or the five seasons
    /// ending at `current_season`.
    pub fn seasons(&self, current_season: i32) -> Vec<i32> {
        match &self.extraction.seasons {
            Some(seasons) => seasons.clone(),
            None => (current_season - 4..=current_season).collect(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.extraction.max_retries,
            delay: Duration::from_secs(self.extraction.retry_delay_secs),
        }
    }

    pub fn planner(&self, current_season: i32) -> IncrementalPlanner {
        IncrementalPlanner::new(
            self.seasons(current_season),
            self.extraction.season_max_week,
        )
    }
}
