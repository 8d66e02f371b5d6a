//! Operational mode state machine.
//!
//! [`decide`] is a pure function from the persisted [`MonitorState`] and the
//! evidence gathered for one staged snapshot to a [`Decision`]. It performs
//! no I/O; the pipeline carries the decision out against the store.
//!
//! | Mode       | Validation failure        | Otherwise                                              |
//! |------------|---------------------------|--------------------------------------------------------|
//! | BOOTSTRAP  | discard, QUARANTINE       | promote; stable runs with a baseline advance the counter |
//! | NORMAL     | discard, QUARANTINE       | anomaly: discard, stay NORMAL; else promote and report |
//! | QUARANTINE | always discard            | always discard                                         |
//!
//! NORMAL also fails validation when the intersection ratio drops below
//! [`MonitorConfig::intersection_floor`]. Only a forced bootstrap leaves
//! QUARANTINE.

use crate::config::MonitorConfig;
use crate::error::Violation;
use crate::gate::ValidationResult;
use crate::models::{MonitorMode, MonitorState};
use crate::stability::StabilityMetrics;

/// Evidence the policy decides on.
#[derive(Debug, Clone, Copy)]
pub struct Assessment<'a> {
    pub validation: &'a ValidationResult,
    pub stability: &'a StabilityMetrics,
    /// Number of new approved identifiers found by change detection.
    pub new_approved: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Promote staging to baseline and persist `next`.
    Promote {
        next: MonitorState,
        /// Send the change report (NORMAL only).
        publish: bool,
    },
    /// Discard staging, persist `next` (QUARANTINE), alert.
    Reject {
        next: MonitorState,
        violation: Violation,
    },
    /// Discard staging and alert; state is left untouched.
    Anomaly { new_approved: usize, threshold: usize },
    /// QUARANTINE: discard staging and alert; state is left untouched.
    Frozen,
}

impl Decision {
    pub fn promotes(&self) -> bool {
        matches!(self, Decision::Promote { .. })
    }
}

pub fn decide(state: MonitorState, assessment: Assessment<'_>, config: &MonitorConfig) -> Decision {
    match state.mode {
        MonitorMode::Bootstrap => decide_bootstrap(state, assessment, config),
        MonitorMode::Normal => decide_normal(state, assessment, config),
        MonitorMode::Quarantine => Decision::Frozen,
    }
}

fn quarantine(violation: Violation) -> Decision {
    Decision::Reject {
        next: MonitorState {
            mode: MonitorMode::Quarantine,
            consecutive_stable_runs: 0,
        },
        violation,
    }
}

fn decide_bootstrap(state: MonitorState, a: Assessment<'_>, config: &MonitorConfig) -> Decision {
    if let Some(violation) = a.validation.violation(config) {
        return quarantine(violation);
    }

    // First baseline, or an unstable bootstrap run: promote and restart the count.
    if !a.stability.has_baseline() || !a.stability.is_stable {
        return Decision::Promote {
            next: MonitorState {
                mode: MonitorMode::Bootstrap,
                consecutive_stable_runs: 0,
            },
            publish: false,
        };
    }

    let counter = state.consecutive_stable_runs.saturating_add(1);
    let mode = if counter >= config.stable_runs_required {
        MonitorMode::Normal
    } else {
        MonitorMode::Bootstrap
    };
    Decision::Promote {
        next: MonitorState {
            mode,
            consecutive_stable_runs: counter,
        },
        publish: false,
    }
}

fn decide_normal(state: MonitorState, a: Assessment<'_>, config: &MonitorConfig) -> Decision {
    if let Some(violation) = a.validation.violation(config) {
        return quarantine(violation);
    }
    if a.stability.intersection_ratio < config.intersection_floor {
        return quarantine(Violation::IntersectionFloor {
            ratio: a.stability.intersection_ratio,
            floor: config.intersection_floor,
        });
    }
    if a.new_approved > config.new_approved_threshold {
        return Decision::Anomaly {
            new_approved: a.new_approved,
            threshold: config.new_approved_threshold,
        };
    }
    Decision::Promote {
        next: state,
        publish: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::SchemaReport;

    fn valid() -> ValidationResult {
        ValidationResult {
            id_schema_ok: true,
            approved_ratio: 1.0,
            approved_count: 10,
            schema: SchemaReport {
                total: 10,
                offending: vec![],
            },
        }
    }

    fn metrics(intersection_ratio: f64, count_ratio: f64, baseline_count: usize) -> StabilityMetrics {
        StabilityMetrics {
            intersection_ratio,
            count_ratio,
            is_stable: crate::stability::is_stable(
                intersection_ratio,
                count_ratio,
                &Default::default(),
            ),
            staging_count: 10,
            baseline_count,
            intersection_count: 0,
        }
    }

    fn state(mode: MonitorMode, consecutive_stable_runs: u32) -> MonitorState {
        MonitorState {
            mode,
            consecutive_stable_runs,
        }
    }

    fn run(s: MonitorState, v: &ValidationResult, m: &StabilityMetrics, new_approved: usize) -> Decision {
        decide(
            s,
            Assessment {
                validation: v,
                stability: m,
                new_approved,
            },
            &MonitorConfig::default(),
        )
    }

    #[test]
    fn test_bootstrap_first_baseline_promotes_with_zero_counter() {
        let d = run(MonitorState::initial(), &valid(), &metrics(0.0, 0.0, 0), 1);
        assert_eq!(
            d,
            Decision::Promote {
                next: state(MonitorMode::Bootstrap, 0),
                publish: false
            }
        );
    }

    #[test]
    fn test_bootstrap_reaches_normal_exactly_at_threshold() {
        let stable = metrics(1.0, 1.0, 10);
        let first = run(state(MonitorMode::Bootstrap, 0), &valid(), &stable, 0);
        assert_eq!(
            first,
            Decision::Promote {
                next: state(MonitorMode::Bootstrap, 1),
                publish: false
            }
        );
        let second = run(state(MonitorMode::Bootstrap, 1), &valid(), &stable, 0);
        assert_eq!(
            second,
            Decision::Promote {
                next: state(MonitorMode::Normal, 2),
                publish: false
            }
        );
    }

    #[test]
    fn test_bootstrap_unstable_resets_counter_but_promotes() {
        let d = run(state(MonitorMode::Bootstrap, 1), &valid(), &metrics(0.6, 1.0, 10), 0);
        assert_eq!(
            d,
            Decision::Promote {
                next: state(MonitorMode::Bootstrap, 0),
                publish: false
            }
        );
    }

    #[test]
    fn test_bootstrap_validation_failure_quarantines() {
        let mut v = valid();
        v.approved_ratio = 0.5;
        match run(MonitorState::initial(), &v, &metrics(1.0, 1.0, 10), 0) {
            Decision::Reject { next, violation } => {
                assert_eq!(next.mode, MonitorMode::Quarantine);
                assert!(matches!(violation, Violation::ApprovedRatio { .. }));
            }
            other => panic!("expected reject, got {:?}", other),
        }
    }

    #[test]
    fn test_bootstrap_ignores_intersection_floor() {
        let d = run(state(MonitorMode::Bootstrap, 0), &valid(), &metrics(0.1, 1.0, 10), 0);
        assert!(d.promotes());
    }

    #[test]
    fn test_normal_checks_ratio_then_schema_then_floor() {
        let mut v = valid();
        v.approved_ratio = 0.2;
        v.id_schema_ok = false;
        v.schema.offending = vec!["bad".into()];
        match run(state(MonitorMode::Normal, 2), &v, &metrics(0.1, 1.0, 10), 0) {
            Decision::Reject { violation, .. } => {
                assert!(matches!(violation, Violation::ApprovedRatio { .. }))
            }
            other => panic!("expected reject, got {:?}", other),
        }

        v.approved_ratio = 1.0;
        match run(state(MonitorMode::Normal, 2), &v, &metrics(0.1, 1.0, 10), 0) {
            Decision::Reject { violation, .. } => {
                assert!(matches!(violation, Violation::Schema { .. }))
            }
            other => panic!("expected reject, got {:?}", other),
        }

        match run(state(MonitorMode::Normal, 2), &valid(), &metrics(0.4, 1.0, 100), 0) {
            Decision::Reject { next, violation } => {
                assert_eq!(next, state(MonitorMode::Quarantine, 0));
                assert!(matches!(violation, Violation::IntersectionFloor { .. }));
            }
            other => panic!("expected reject, got {:?}", other),
        }
    }

    #[test]
    fn test_normal_anomaly_above_threshold_only() {
        let m = metrics(1.0, 1.5, 50);
        assert_eq!(
            run(state(MonitorMode::Normal, 2), &valid(), &m, 25),
            Decision::Anomaly {
                new_approved: 25,
                threshold: 20
            }
        );
        assert!(run(state(MonitorMode::Normal, 2), &valid(), &m, 20).promotes());
    }

    #[test]
    fn test_normal_promotes_and_publishes_even_when_unstable() {
        let d = run(state(MonitorMode::Normal, 2), &valid(), &metrics(0.7, 1.3, 10), 0);
        assert_eq!(
            d,
            Decision::Promote {
                next: state(MonitorMode::Normal, 2),
                publish: true
            }
        );
    }

    #[test]
    fn test_quarantine_is_frozen_for_any_input() {
        let mut bad = valid();
        bad.approved_ratio = 0.0;
        for v in [valid(), bad] {
            assert_eq!(
                run(state(MonitorMode::Quarantine, 0), &v, &metrics(1.0, 1.0, 10), 0),
                Decision::Frozen
            );
        }
    }
}
