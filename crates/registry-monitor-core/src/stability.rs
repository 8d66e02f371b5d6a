//! Stability analysis between a staged snapshot and the current baseline.
//!
//! ```text
//! intersection_ratio = |staging ∩ baseline| / |baseline|
//! count_ratio        = |staging| / |baseline|
//! is_stable          = intersection_ratio >= intersection_min
//!                      && count_ratio in [count_ratio_min, count_ratio_max]
//! ```
//!
//! An empty baseline yields zeros and `is_stable = false`. That is "no
//! evidence yet", not a failure; the mode policy decides what it means.

use serde::Serialize;

use crate::config::StabilityBounds;
use crate::models::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StabilityMetrics {
    pub intersection_ratio: f64,
    pub count_ratio: f64,
    pub is_stable: bool,
    pub staging_count: usize,
    pub baseline_count: usize,
    pub intersection_count: usize,
}

impl StabilityMetrics {
    pub fn has_baseline(&self) -> bool {
        self.baseline_count > 0
    }
}

pub fn analyze(staging: &Snapshot, baseline: &Snapshot, bounds: &StabilityBounds) -> StabilityMetrics {
    if baseline.is_empty() {
        return StabilityMetrics {
            intersection_ratio: 0.0,
            count_ratio: 0.0,
            is_stable: false,
            staging_count: staging.len(),
            baseline_count: 0,
            intersection_count: 0,
        };
    }

    let staging_ids = staging.ids();
    let intersection_count = baseline
        .ids()
        .iter()
        .filter(|id| staging_ids.contains(*id))
        .count();

    let intersection_ratio = intersection_count as f64 / baseline.len() as f64;
    let count_ratio = staging.len() as f64 / baseline.len() as f64;

    StabilityMetrics {
        intersection_ratio,
        count_ratio,
        is_stable: is_stable(intersection_ratio, count_ratio, bounds),
        staging_count: staging.len(),
        baseline_count: baseline.len(),
        intersection_count,
    }
}

/// The stability predicate on its own, for callers holding raw ratios.
pub fn is_stable(intersection_ratio: f64, count_ratio: f64, bounds: &StabilityBounds) -> bool {
    intersection_ratio >= bounds.intersection_min
        && count_ratio >= bounds.count_ratio_min
        && count_ratio <= bounds.count_ratio_max
}
