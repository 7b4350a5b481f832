//! Validation rules per data type.

use serde::{Deserialize, Serialize};

use crate::domain::DataType;

/// Inclusive numeric bounds on one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldBound {
    pub field: String,
    pub min: f64,
    pub max: f64,
}

impl FieldBound {
    pub fn new(field: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            field: field.into(),
            min,
            max,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

pub const MIN_SEASON: i32 = 2000;
pub const MAX_WEEK: u32 = 22;

/// Default caps on measurement fields.
pub fn default_measurement_bounds() -> Vec<FieldBound> {
    vec![
        FieldBound::new("yards_gained", -99.0, 99.0),
        FieldBound::new("air_yards", -99.0, 99.0),
        FieldBound::new("yards_after_catch", 0.0, 99.0),
        FieldBound::new("fantasy_points_ppr", -10.0, 100.0),
    ]
}

/// Everything the validator needs to know about one data type.
///
/// Temporal bounds drop out-of-range rows; measurement bounds cap values.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationRules {
    pub required: Vec<String>,
    pub natural_key: Vec<String>,
    pub temporal_bounds: Vec<FieldBound>,
    pub measurement_bounds: Vec<FieldBound>,
}

impl ValidationRules {
    pub fn new(required: &[&str], natural_key: &[&str]) -> Self {
        Self {
            required: required.iter().map(|s| s.to_string()).collect(),
            natural_key: natural_key.iter().map(|s| s.to_string()).collect(),
            temporal_bounds: Vec::new(),
            measurement_bounds: Vec::new(),
        }
    }

    pub fn with_temporal_bound(mut self, bound: FieldBound) -> Self {
        self.temporal_bounds.push(bound);
        self
    }

    pub fn with_measurement_bound(mut self, bound: FieldBound) -> Self {
        self.measurement_bounds.retain(|b| b.field != bound.field);
        self.measurement_bounds.push(bound);
        self
    }

    /// Standard rules for a data type. Seasons run from 2000 to the year after
    /// `current_year`; weeks from 1 to 22.
    pub fn for_data_type(data_type: DataType, current_year: i32) -> Self {
        let mut rules = Self::new(data_type.required_columns(), data_type.natural_key())
            .with_temporal_bound(FieldBound::new(
                "season",
                MIN_SEASON as f64,
                (current_year + 1) as f64,
            ));
        if data_type.is_weekly() {
            rules = rules.with_temporal_bound(FieldBound::new("week", 1.0, MAX_WEEK as f64));
        }
        for bound in default_measurement_bounds() {
            rules = rules.with_measurement_bound(bound);
        }
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rosters_have_no_week_bound() {
        let rules = ValidationRules::for_data_type(DataType::Rosters, 2024);
        assert_eq!(rules.temporal_bounds.len(), 1);
        assert_eq!(rules.temporal_bounds[0].max, 2025.0);
    }

    #[test]
    fn measurement_bound_replaces_same_field() {
        let rules = ValidationRules::for_data_type(DataType::PlayByPlay, 2024)
            .with_measurement_bound(FieldBound::new("air_yards", -50.0, 80.0));
        let air: Vec<_> = rules
            .measurement_bounds
            .iter()
            .filter(|b| b.field == "air_yards")
            .collect();
        assert_eq!(air.len(), 1);
        assert_eq!(air[0].max, 80.0);
    }
}
