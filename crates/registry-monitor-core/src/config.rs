//! Immutable thresholds for the validation pipeline.
//!
//! [`MonitorConfig`] is built once by the application (from its TOML file)
//! and passed by reference into the gate, the stability analyzer, the change
//! detector, and the mode policy. Nothing in the core reads global state.

use anyhow::{bail, Result};
use regex::Regex;

use crate::status::Status;

pub const DEFAULT_ID_PATTERN: &str = r"^seia_\d{7,15}$";

/// Bounds a staged snapshot must satisfy to count as stable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilityBounds {
    /// Minimum `|staging ∩ baseline| / |baseline|`.
    pub intersection_min: f64,
    /// Inclusive lower bound of `|staging| / |baseline|`.
    pub count_ratio_min: f64,
    /// Inclusive upper bound of `|staging| / |baseline|`.
    pub count_ratio_max: f64,
}

impl Default for StabilityBounds {
    fn default() -> Self {
        Self {
            intersection_min: 0.80,
            count_ratio_min: 0.80,
            count_ratio_max: 1.20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Every identifier in a snapshot must match this pattern.
    pub id_pattern: Regex,
    /// Minimum share of approved records in a snapshot.
    pub approved_min_ratio: f64,
    pub stability: StabilityBounds,
    /// Hard corruption floor for the intersection ratio, enforced in NORMAL.
    pub intersection_floor: f64,
    /// Consecutive stable BOOTSTRAP runs needed to enter NORMAL.
    pub stable_runs_required: u32,
    /// NORMAL discards a snapshot with more new approved records than this.
    pub new_approved_threshold: usize,
    /// `(previous, current)` status pairs reported as relevant transitions.
    pub relevant_transitions: Vec<(Status, Status)>,
}

impl MonitorConfig {
    /// Replace the identifier pattern, rejecting patterns that do not compile.
    pub fn with_id_pattern(mut self, pattern: &str) -> Result<Self> {
        self.id_pattern = Regex::new(pattern)
            .map_err(|e| anyhow::anyhow!("invalid id pattern '{}': {}", pattern, e))?;
        Ok(self)
    }

    /// Check ratio ranges and counters.
    pub fn validate(&self) -> Result<()> {
        let ratios = [
            ("approved_min_ratio", self.approved_min_ratio),
            ("intersection_min", self.stability.intersection_min),
            ("intersection_floor", self.intersection_floor),
        ];
        for (name, value) in ratios {
            if !(0.0..=1.0).contains(&value) {
                bail!("{} must be in [0.0, 1.0], got {}", name, value);
            }
        }
        if self.stability.count_ratio_min < 0.0 {
            bail!("count_ratio_min must be >= 0.0");
        }
        if self.stability.count_ratio_min > self.stability.count_ratio_max {
            bail!(
                "count_ratio_min ({}) must not exceed count_ratio_max ({})",
                self.stability.count_ratio_min,
                self.stability.count_ratio_max
            );
        }
        if self.stable_runs_required == 0 {
            bail!("stable_runs_required must be >= 1");
        }
        Ok(())
    }

    pub fn is_relevant_transition(&self, previous: Status, current: Status) -> bool {
        self.relevant_transitions
            .iter()
            .any(|&(from, to)| from == previous && to == current)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            id_pattern: Regex::new(DEFAULT_ID_PATTERN).expect("default id pattern compiles"),
            approved_min_ratio: 0.90,
            stability: StabilityBounds::default(),
            intersection_floor: 0.50,
            stable_runs_required: 2,
            new_approved_threshold: 20,
            relevant_transitions: vec![(Status::UnderReviewActive, Status::Approved)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MonitorConfig::default();
        config.validate().unwrap();
        assert!(config.id_pattern.is_match("seia_2160123456"));
        assert!(!config.id_pattern.is_match("hash_0123456789abcdef"));
        assert!(config.is_relevant_transition(Status::UnderReviewActive, Status::Approved));
        assert!(!config.is_relevant_transition(Status::InAdmission, Status::Approved));
    }

    #[test]
    fn test_validate_rejects_inverted_count_bounds() {
        let mut config = MonitorConfig::default();
        config.stability.count_ratio_min = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_pattern_is_an_error() {
        assert!(MonitorConfig::default().with_id_pattern("seia_(").is_err());
    }
}
