//! Error taxonomy for a monitoring run.
//!
//! [`Violation`] is an expected data-quality verdict: the snapshot was
//! retrieved fine but cannot be trusted. [`MonitorError`] is a fault that
//! aborts the run. Keeping them apart stops a schema violation from being
//! handled like a network outage.

use thiserror::Error;

/// Broad class of a [`Violation`], as reported in alerts and run records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationCategory {
    SchemaViolation,
    IntegrityViolation,
}

impl ViolationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationCategory::SchemaViolation => "schema_violation",
            ViolationCategory::IntegrityViolation => "integrity_violation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Violation {
    #[error("identifier schema mismatch: {} of {total} identifiers do not match (sample: {})", .offending.len(), sample(.offending))]
    Schema { offending: Vec<String>, total: usize },

    #[error("approved ratio {:.1}% is below the minimum {:.1}%", .ratio * 100.0, .min * 100.0)]
    ApprovedRatio { ratio: f64, min: f64 },

    #[error("intersection ratio {:.1}% is below the hard floor {:.1}%; possible data contamination", .ratio * 100.0, .floor * 100.0)]
    IntersectionFloor { ratio: f64, floor: f64 },
}

impl Violation {
    pub fn category(&self) -> ViolationCategory {
        match self {
            Violation::Schema { .. } => ViolationCategory::SchemaViolation,
            Violation::ApprovedRatio { .. } | Violation::IntersectionFloor { .. } => {
                ViolationCategory::IntegrityViolation
            }
        }
    }
}

fn sample(ids: &[String]) -> String {
    ids.iter().take(5).cloned().collect::<Vec<_>>().join(", ")
}

/// Faults that abort a run before a mode decision is carried out.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The snapshot source failed or returned nothing usable.
    #[error("retrieval failed: {0}")]
    Retrieval(String),

    /// A storage operation failed; the store rolled back to its pre-call state.
    #[error("storage failure: {0:#}")]
    Storage(anyhow::Error),
}

impl From<anyhow::Error> for MonitorError {
    fn from(err: anyhow::Error) -> Self {
        MonitorError::Storage(err)
    }
}
