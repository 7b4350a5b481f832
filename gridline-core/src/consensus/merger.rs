use std::collections::BTreeMap;

use tracing::debug;

use super::priority::SourcePriority;
use crate::domain::{
    round2, Confidence, ConsensusRecord, FieldSummary, ProjectionRecord, SubjectId, TemporalKey,
};

/// Mean, sample stdev, min and max, each rounded to two places.
///
/// Returns `None` for an empty slice. The stdev is `None` for a single value.
pub fn summarize(values: &[f64]) -> Option<FieldSummary> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std_dev = (values.len() >= 2).then(|| {
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        round2(var.sqrt())
    });
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some(FieldSummary {
        mean: round2(mean),
        std_dev,
        min: round2(min),
        max: round2(max),
    })
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Merges per-source projections into one consensus row per subject and week.
#[derive(Debug, Clone, Default)]
pub struct ConsensusMerger {
    priority: SourcePriority,
}

impl ConsensusMerger {
    pub fn new(priority: SourcePriority) -> Self {
        Self { priority }
    }

    /// Merge projection rows.
    ///
    /// Rows whose PPR points are missing or exactly zero are excluded. A source
    /// that appears more than once for the same subject contributes the mean of
    /// its rows, for points and for every stat. Output is ordered by (season, week, subject).
    pub fn merge(&self, rows: &[ProjectionRecord]) -> Vec<ConsensusRecord> {
        let mut groups: BTreeMap<(TemporalKey, SubjectId), Vec<&ProjectionRecord>> =
            BTreeMap::new();
        let mut excluded = 0usize;
        for row in rows {
            match row.points_ppr {
                Some(p) if p != 0.0 && p.is_finite() => groups
                    .entry((row.key, row.subject.clone()))
                    .or_default()
                    .push(row),
                _ => excluded += 1,
            }
        }
        if excluded > 0 {
            debug!(excluded, "projection rows without a usable primary value");
        }

        groups
            .into_iter()
            .filter_map(|((key, subject), mut members)| {
                members.sort_by(|a, b| {
                    self.priority
                        .rank(&a.source)
                        .cmp(&self.priority.rank(&b.source))
                });
                self.merge_group(key, subject, &members)
            })
            .collect()
    }

    fn merge_group(
        &self,
        key: TemporalKey,
        subject: SubjectId,
        members: &[&ProjectionRecord],
    ) -> Option<ConsensusRecord> {
        // Per-source collapse, keeping priority order.
        let mut order: Vec<&str> = Vec::new();
        let mut ppr: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        let mut standard: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for row in members {
            let source = row.source.as_str();
            if !order.contains(&source) {
                order.push(source);
            }
            if let Some(p) = row.points_ppr {
                ppr.entry(source).or_default().push(p);
            }
            if let Some(s) = row.points_standard {
                standard.entry(source).or_default().push(s);
            }
        }

        let per_source: Vec<(&str, f64)> = order
            .iter()
            .filter_map(|s| ppr.get(s).map(|v| (*s, mean(v))))
            .collect();
        let ppr_values: Vec<f64> = per_source.iter().map(|(_, v)| *v).collect();
        let points_ppr = summarize(&ppr_values)?;
        let standard_values: Vec<f64> = order
            .iter()
            .filter_map(|s| standard.get(s).map(|v| mean(v)))
            .collect();

        // Stats collapse per source too, so a source with several rows counts once.
        let mut source_stats: BTreeMap<&str, BTreeMap<&str, Vec<f64>>> = BTreeMap::new();
        for row in members {
            let stats = source_stats.entry(row.source.as_str()).or_default();
            for (stat, v) in &row.stats {
                stats.entry(stat.as_str()).or_default().push(*v);
            }
        }
        let mut stat_values: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for stats in source_stats.values() {
            for (stat, v) in stats {
                stat_values.entry(*stat).or_default().push(mean(v));
            }
        }

        let source_count = per_source.len();
        Some(ConsensusRecord {
            subject,
            key,
            position: members.iter().find_map(|r| r.position.clone()),
            team: members.iter().find_map(|r| r.team.clone()),
            points_standard: summarize(&standard_values),
            stat_means: stat_values
                .into_iter()
                .map(|(stat, v)| (stat.to_string(), round2(mean(&v))))
                .collect(),
            source_values: per_source
                .iter()
                .map(|(s, v)| (s.to_string(), round2(*v)))
                .collect(),
            source_count,
            confidence: Confidence::classify(source_count, points_ppr.std_dev),
            has_props: members.iter().any(|r| r.has_props),
            points_ppr,
        })
    }
}
