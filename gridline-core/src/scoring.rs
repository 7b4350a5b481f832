//! Fantasy scoring formats.

use serde::{Deserialize, Serialize};

use crate::domain::{round2, RawRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringFormat {
    Standard,
    Ppr,
    HalfPpr,
}

/// Points per unit of each canonical stat, shared by every format.
const BASE_WEIGHTS: &[(&str, f64)] = &[
    ("passing_yards", 0.04),
    ("passing_tds", 4.0),
    ("interceptions", -2.0),
    ("rushing_yards", 0.1),
    ("rushing_tds", 6.0),
    ("receiving_yards", 0.1),
    ("receiving_tds", 6.0),
    ("fumbles_lost", -2.0),
    ("passing_2pt", 2.0),
    ("rushing_2pt", 2.0),
    ("receiving_2pt", 2.0),
];

impl ScoringFormat {
    pub const ALL: [ScoringFormat; 3] = [
        ScoringFormat::Standard,
        ScoringFormat::Ppr,
        ScoringFormat::HalfPpr,
    ];

    pub fn reception_points(&self) -> f64 {
        match self {
            ScoringFormat::Standard => 0.0,
            ScoringFormat::Ppr => 1.0,
            ScoringFormat::HalfPpr => 0.5,
        }
    }

    /// Column the points for this format are stored under.
    pub fn column(&self) -> &'static str {
        match self {
            ScoringFormat::Standard => "fantasy_points_standard",
            ScoringFormat::Ppr => "fantasy_points_ppr",
            ScoringFormat::HalfPpr => "fantasy_points_half_ppr",
        }
    }

    /// Score a stat line given a lookup by canonical stat name. Missing stats count as 0.
    pub fn score(&self, stat: impl Fn(&str) -> Option<f64>) -> f64 {
        let base: f64 = BASE_WEIGHTS
            .iter()
            .map(|(name, weight)| stat(*name).unwrap_or(0.0) * weight)
            .sum();
        round2(base + stat("receptions").unwrap_or(0.0) * self.reception_points())
    }

    pub fn score_record(&self, record: &RawRecord) -> f64 {
        self.score(|name| record.f64(name))
    }
}

/// Fill `fantasy_points_half_ppr` from the standard and PPR columns when only those are present.
pub fn fill_half_ppr(record: &mut RawRecord) {
    if record.f64(ScoringFormat::HalfPpr.column()).is_some() {
        return;
    }
    let standard = record
        .f64(ScoringFormat::Standard.column())
        .or_else(|| record.f64("fantasy_points"));
    if let (Some(std), Some(ppr)) = (standard, record.f64(ScoringFormat::Ppr.column())) {
        record.set(ScoringFormat::HalfPpr.column(), round2((std + ppr) / 2.0));
    }
}

/// Recompute all three formats from the raw stat columns.
pub fn rescore(record: &mut RawRecord) {
    for format in ScoringFormat::ALL {
        let points = format.score_record(record);
        record.set(format.column(), points);
    }
}
