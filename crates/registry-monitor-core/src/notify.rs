//! Notification seam.
//!
//! Two kinds of message leave the pipeline: a change report after a NORMAL
//! promotion, and an alert when a snapshot is refused. Delivery is
//! fire-and-forget: the pipeline logs a notifier error and carries on.

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::ChangeResult;
use crate::stability::StabilityMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A validation failure just moved the monitor into QUARANTINE.
    QuarantineEntered,
    /// The monitor is in QUARANTINE and refused another snapshot.
    QuarantineActive,
    /// The NORMAL circuit breaker discarded a snapshot.
    Anomaly,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::QuarantineEntered => "quarantine_entered",
            AlertKind::QuarantineActive => "quarantine_active",
            AlertKind::Anomaly => "anomaly",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub reason: String,
    pub metrics: StabilityMetrics,
    pub total_retrieved: usize,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver the change report of a successful NORMAL promotion.
    async fn report(&self, changes: &ChangeResult) -> Result<()>;

    async fn alert(&self, alert: &Alert) -> Result<()>;
}
