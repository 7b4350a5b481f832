//! Derived ratios, recomputed from summed components.

use std::collections::BTreeMap;

use super::schema::RATIOS;
use crate::domain::round2;

/// Compute every ratio whose numerator and a denominator are present in `sums`.
///
/// The first denominator with a positive value wins; a present but zero
/// denominator yields 0.0.
pub fn derive_ratios(sums: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    for ratio in RATIOS {
        let Some(numerator) = sums.get(ratio.numerator) else {
            continue;
        };
        let present: Vec<f64> = ratio
            .denominators
            .iter()
            .filter_map(|d| sums.get(*d).copied())
            .collect();
        if present.is_empty() {
            continue;
        }
        let value = match present.iter().find(|d| **d > 0.0) {
            Some(den) => round2(numerator / den * ratio.scale),
            None => 0.0,
        };
        out.insert(ratio.name.to_string(), value);
    }
    out
}
