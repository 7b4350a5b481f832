//! Projection rows and the consensus rows merged from them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::ids::SubjectId;
use super::record::{FieldValue, RawRecord, TemporalKey};

/// How much the sources agree about a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// HIGH: 2+ sources and stdev < 2. MEDIUM: 2+ sources, or stdev < 4.
    /// LOW otherwise. An undefined stdev (one source) never satisfies a
    /// threshold, so a single source is always LOW.
    pub fn classify(source_count: usize, std_dev: Option<f64>) -> Self {
        let spread_below = |limit: f64| std_dev.is_some_and(|sd| sd < limit);
        if source_count >= 2 && spread_below(2.0) {
            Confidence::High
        } else if source_count >= 2 || spread_below(4.0) {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "HIGH",
            Confidence::Medium => "MEDIUM",
            Confidence::Low => "LOW",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HIGH" => Ok(Confidence::High),
            "MEDIUM" => Ok(Confidence::Medium),
            "LOW" => Ok(Confidence::Low),
            other => Err(format!("unknown confidence '{other}'")),
        }
    }
}

/// Dispersion of one numeric field across sources.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldSummary {
    pub mean: f64,
    /// Sample standard deviation; undefined for fewer than two values.
    pub std_dev: Option<f64>,
    pub min: f64,
    pub max: f64,
}

/// One source's projection for one subject and week, after normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionRecord {
    pub subject: SubjectId,
    pub key: TemporalKey,
    pub source: String,
    pub position: Option<String>,
    pub team: Option<String>,
    pub points_ppr: Option<f64>,
    pub points_standard: Option<f64>,
    pub points_half_ppr: Option<f64>,
    /// Projected stat values keyed by canonical stat name.
    pub stats: BTreeMap<String, f64>,
    pub has_props: bool,
    /// 1.0 when the source projected yardage, 0.5 otherwise.
    pub completeness: f64,
}

impl ProjectionRecord {
    pub fn to_record(&self) -> RawRecord {
        let mut record = RawRecord::new(self.source.as_str())
            .with("player_name", self.subject.as_str())
            .with("season", self.key.season)
            .with("week", self.key.week)
            .with("source", self.source.as_str())
            .with("position", self.position.clone())
            .with("team", self.team.clone())
            .with("fantasy_points_ppr", self.points_ppr)
            .with("fantasy_points_standard", self.points_standard)
            .with("fantasy_points_half_ppr", self.points_half_ppr)
            .with("has_props", self.has_props)
            .with("confidence_score", self.completeness);
        for (stat, value) in &self.stats {
            record.set(&format!("proj_{stat}"), *value);
        }
        record
    }

    pub fn from_record(record: &RawRecord) -> Option<Self> {
        let subject = record.text("player_name")?.to_string();
        let key = record.temporal_key()?;
        let source = record.text("source")?.to_string();
        let stats = record
            .fields
            .iter()
            .filter_map(|(k, v)| {
                let stat = k.strip_prefix("proj_")?;
                Some((stat.to_string(), v.as_f64()?))
            })
            .collect();
        Some(Self {
            subject: SubjectId(subject),
            key,
            source,
            position: record.text("position").map(str::to_string),
            team: record.text("team").map(str::to_string),
            points_ppr: record.f64("fantasy_points_ppr"),
            points_standard: record.f64("fantasy_points_standard"),
            points_half_ppr: record.f64("fantasy_points_half_ppr"),
            stats,
            has_props: matches!(record.get("has_props"), FieldValue::Bool(true))
                || record.get("has_props").as_i64() == Some(1),
            completeness: record.f64("confidence_score").unwrap_or(0.5),
        })
    }
}

/// Merged projection for one subject and week.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusRecord {
    pub subject: SubjectId,
    pub key: TemporalKey,
    pub position: Option<String>,
    pub team: Option<String>,
    /// Primary value (PPR points) across sources.
    pub points_ppr: FieldSummary,
    pub points_standard: Option<FieldSummary>,
    /// Mean projected stat values across sources that supplied them.
    pub stat_means: BTreeMap<String, f64>,
    /// Primary value per source.
    pub source_values: BTreeMap<String, f64>,
    pub source_count: usize,
    pub confidence: Confidence,
    pub has_props: bool,
}

impl ConsensusRecord {
    pub fn floor(&self) -> f64 {
        self.points_ppr.min
    }

    pub fn ceiling(&self) -> f64 {
        self.points_ppr.max
    }

    pub fn to_record(&self) -> RawRecord {
        let mut record = RawRecord::new("consensus")
            .with("player_name", self.subject.as_str())
            .with("season", self.key.season)
            .with("week", self.key.week)
            .with("position", self.position.clone())
            .with("team", self.team.clone())
            .with("consensus_points_ppr", self.points_ppr.mean)
            .with("projection_std_dev", self.points_ppr.std_dev)
            .with("floor_points_ppr", self.points_ppr.min)
            .with("ceiling_points_ppr", self.points_ppr.max)
            .with(
                "consensus_points_standard",
                self.points_standard.map(|s| s.mean),
            )
            .with("num_sources", self.source_count as i64)
            .with("confidence_rating", self.confidence.as_str())
            .with("has_props", self.has_props);
        for (source, value) in &self.source_values {
            record.set(&format!("{source}_proj"), *value);
        }
        for (stat, value) in &self.stat_means {
            record.set(&format!("proj_{stat}"), *value);
        }
        record
    }

    /// Rebuild from a stored row. Only the standard-points mean survives storage.
    pub fn from_record(record: &RawRecord) -> Option<Self> {
        let subject = record.text("player_name")?.to_string();
        let key = record.temporal_key()?;
        let points_ppr = FieldSummary {
            mean: record.f64("consensus_points_ppr")?,
            std_dev: record.f64("projection_std_dev"),
            min: record.f64("floor_points_ppr")?,
            max: record.f64("ceiling_points_ppr")?,
        };
        let points_standard = record.f64("consensus_points_standard").map(|mean| FieldSummary {
            mean,
            std_dev: None,
            min: mean,
            max: mean,
        });
        let source_values = record
            .fields
            .iter()
            .filter_map(|(k, v)| Some((k.strip_suffix("_proj")?.to_string(), v.as_f64()?)))
            .collect();
        let stat_means = record
            .fields
            .iter()
            .filter_map(|(k, v)| Some((k.strip_prefix("proj_")?.to_string(), v.as_f64()?)))
            .collect();
        Some(Self {
            subject: SubjectId(subject),
            key,
            position: record.text("position").map(str::to_string),
            team: record.text("team").map(str::to_string),
            points_ppr,
            points_standard,
            stat_means,
            source_values,
            source_count: record
                .get("num_sources")
                .as_i64()
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(0),
            confidence: record
                .text("confidence_rating")
                .and_then(|s| s.parse().ok())
                .unwrap_or(Confidence::Low),
            has_props: matches!(record.get("has_props"), FieldValue::Bool(true)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_thresholds() {
        assert_eq!(Confidence::classify(2, Some(0.28)), Confidence::High);
        assert_eq!(Confidence::classify(3, Some(1.99)), Confidence::High);
        assert_eq!(Confidence::classify(3, Some(2.0)), Confidence::Medium);
        assert_eq!(Confidence::classify(2, Some(9.5)), Confidence::Medium);
        assert_eq!(Confidence::classify(1, Some(3.0)), Confidence::Medium);
        assert_eq!(Confidence::classify(1, Some(4.0)), Confidence::Low);
        assert_eq!(Confidence::classify(1, None), Confidence::Low);
    }

    #[test]
    fn confidence_serializes_upper_case() {
        assert_eq!(
            serde_json::to_string(&Confidence::Medium).unwrap(),
            "\"MEDIUM\""
        );
    }

    #[test]
    fn projection_row_keeps_stats_and_flags() {
        let mut stats = BTreeMap::new();
        stats.insert("passing_yards".to_string(), 265.5);
        let proj = ProjectionRecord {
            subject: SubjectId::new("Josh Allen"),
            key: TemporalKey::week(2024, 3),
            source: "pinnacle".into(),
            position: Some("QB".into()),
            team: Some("BUF".into()),
            points_ppr: Some(21.3),
            points_standard: Some(21.3),
            points_half_ppr: Some(21.3),
            stats,
            has_props: true,
            completeness: 1.0,
        };
        let back = ProjectionRecord::from_record(&proj.to_record()).unwrap();
        assert_eq!(back, proj);
    }

    #[test]
    fn consensus_row_exposes_floor_and_ceiling() {
        let rec = ConsensusRecord {
            subject: SubjectId::new("A"),
            key: TemporalKey::week(2024, 1),
            position: None,
            team: None,
            points_ppr: FieldSummary {
                mean: 10.2,
                std_dev: Some(0.28),
                min: 10.0,
                max: 10.4,
            },
            points_standard: None,
            stat_means: BTreeMap::new(),
            source_values: BTreeMap::from([("x".to_string(), 10.0), ("y".to_string(), 10.4)]),
            source_count: 2,
            confidence: Confidence::Medium,
            has_props: false,
        };
        assert_eq!(rec.floor(), 10.0);
        assert_eq!(rec.ceiling(), 10.4);
        let back = ConsensusRecord::from_record(&rec.to_record()).unwrap();
        assert_eq!(back.source_values, rec.source_values);
        assert_eq!(back.confidence, Confidence::Medium);
    }
}
