//! Validation gate: stateless checks on a staged snapshot.
//!
//! Both checks look only at the staged records. They never need the
//! baseline and never touch storage.
//!
//! - **Schema**: every identifier matches [`MonitorConfig::id_pattern`].
//! - **Approved ratio**: the share of approved records is at least
//!   [`MonitorConfig::approved_min_ratio`]. A retrieval that silently lost
//!   its status filter returns a mostly non-approved population and fails
//!   here.

use regex::Regex;
use tracing::{info, warn};

use crate::config::MonitorConfig;
use crate::error::Violation;
use crate::models::Snapshot;

/// Outcome of the identifier schema check.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaReport {
    pub total: usize,
    /// Offending identifiers in identifier order.
    pub offending: Vec<String>,
}

impl SchemaReport {
    pub fn is_ok(&self) -> bool {
        self.offending.is_empty()
    }
}

/// Derived gate result for one staged snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    pub id_schema_ok: bool,
    pub approved_ratio: f64,
    pub approved_count: usize,
    pub schema: SchemaReport,
}

impl ValidationResult {
    /// First failed soft check, approved ratio before schema.
    pub fn violation(&self, config: &MonitorConfig) -> Option<Violation> {
        if self.approved_ratio < config.approved_min_ratio {
            return Some(Violation::ApprovedRatio {
                ratio: self.approved_ratio,
                min: config.approved_min_ratio,
            });
        }
        if !self.id_schema_ok {
            return Some(Violation::Schema {
                offending: self.schema.offending.clone(),
                total: self.schema.total,
            });
        }
        None
    }
}

pub fn check_schema(snapshot: &Snapshot, pattern: &Regex) -> SchemaReport {
    let offending: Vec<String> = snapshot
        .records()
        .filter(|r| !pattern.is_match(&r.id))
        .map(|r| r.id.clone())
        .collect();

    if !offending.is_empty() {
        warn!(
            offending = offending.len(),
            total = snapshot.len(),
            sample = ?offending.iter().take(5).collect::<Vec<_>>(),
            "identifiers with unexpected format"
        );
    }

    SchemaReport {
        total: snapshot.len(),
        offending,
    }
}

/// Fraction of approved records; `0.0` for an empty snapshot.
pub fn approved_ratio(snapshot: &Snapshot) -> f64 {
    if snapshot.is_empty() {
        return 0.0;
    }
    snapshot.approved_count() as f64 / snapshot.len() as f64
}

pub fn validate(snapshot: &Snapshot, config: &MonitorConfig) -> ValidationResult {
    let schema = check_schema(snapshot, &config.id_pattern);
    let approved_count = snapshot.approved_count();
    let ratio = approved_ratio(snapshot);

    info!(
        approved = approved_count,
        total = snapshot.len(),
        ratio = %format!("{:.1}%", ratio * 100.0),
        "approved ratio"
    );

    ValidationResult {
        id_schema_ok: schema.is_ok(),
        approved_ratio: ratio,
        approved_count,
        schema,
    }
}
