//! Core data types that flow through the ingestion validation pipeline.
//!
//! A [`Record`] is one monitored registry entry. A [`Snapshot`] is a
//! deduplicated set of records captured by one retrieval. [`MonitorState`]
//! is the persisted operational mode, and [`RunRecord`] is the append-only
//! audit row written for every non-dry invocation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::status::Status;

/// One monitored registry entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable identifier, e.g. `seia_2160123456`.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub holder: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    /// Filing date as published by the registry (kept verbatim).
    #[serde(default)]
    pub filed_on: Option<String>,
    /// Status string exactly as the registry shows it.
    #[serde(default)]
    pub status_raw: String,
    pub status: Status,
    /// Detail page URL or other opaque pointer back into the registry.
    #[serde(default)]
    pub detail_ref: Option<String>,
    #[serde(default)]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Record {
    /// Build a record whose normalized status is derived from `status_raw`.
    pub fn new(id: impl Into<String>, name: impl Into<String>, status_raw: impl Into<String>) -> Self {
        let status_raw = status_raw.into();
        let status = Status::from_raw(&status_raw);
        Self {
            id: id.into(),
            name: name.into(),
            holder: None,
            category: None,
            region: None,
            filed_on: None,
            status_raw,
            status,
            detail_ref: None,
            first_seen: None,
            last_updated: None,
        }
    }
}

/// A deduplicated, order-irrelevant set of records keyed by identifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    records: BTreeMap<String, Record>,
    duplicates: usize,
}

impl Snapshot {
    /// Index records by identifier. When an identifier appears more than
    /// once, the last occurrence wins.
    pub fn from_records(records: Vec<Record>) -> Self {
        let mut map = BTreeMap::new();
        let mut duplicates = 0;
        for record in records {
            if map.insert(record.id.clone(), record).is_some() {
                duplicates += 1;
            }
        }
        Self {
            records: map,
            duplicates,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of input rows dropped because their identifier repeated.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn ids(&self) -> BTreeSet<&str> {
        self.records.keys().map(String::as_str).collect()
    }

    /// Records in identifier order.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    pub fn to_vec(&self) -> Vec<Record> {
        self.records.values().cloned().collect()
    }

    pub fn approved_count(&self) -> usize {
        self.records().filter(|r| r.status.is_approved()).count()
    }

    /// SHA-256 over sorted `(id, status)` pairs, hex encoded.
    ///
    /// Two snapshots with the same identifiers and normalized statuses share
    /// a digest regardless of retrieval order or cosmetic field changes.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for record in self.records() {
            hasher.update(record.id.as_bytes());
            hasher.update([0u8]);
            hasher.update(record.status.as_str().as_bytes());
            hasher.update([b'\n']);
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Operational mode of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorMode {
    /// Establishing a trusted baseline; no reports are sent.
    Bootstrap,
    /// Regular operation with change detection and reports.
    Normal,
    /// Baseline frozen until an operator forces a bootstrap.
    Quarantine,
}

impl MonitorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorMode::Bootstrap => "BOOTSTRAP",
            MonitorMode::Normal => "NORMAL",
            MonitorMode::Quarantine => "QUARANTINE",
        }
    }
}

impl fmt::Display for MonitorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MonitorMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BOOTSTRAP" => Ok(MonitorMode::Bootstrap),
            "NORMAL" => Ok(MonitorMode::Normal),
            "QUARANTINE" => Ok(MonitorMode::Quarantine),
            other => anyhow::bail!(
                "unknown monitor mode '{}': expected BOOTSTRAP, NORMAL, or QUARANTINE",
                other
            ),
        }
    }
}

/// Persisted singleton owned by the mode policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorState {
    pub mode: MonitorMode,
    pub consecutive_stable_runs: u32,
}

impl MonitorState {
    /// State used before the first run and after a forced bootstrap.
    pub fn initial() -> Self {
        Self {
            mode: MonitorMode::Bootstrap,
            consecutive_stable_runs: 0,
        }
    }
}

impl Default for MonitorState {
    fn default() -> Self {
        Self::initial()
    }
}

/// A normalized status transition for one continuing identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: String,
    pub name: String,
    pub previous_raw: String,
    pub current_raw: String,
    pub previous: Status,
    pub current: Status,
    pub region: Option<String>,
    pub detail_ref: Option<String>,
    pub relevant: bool,
    pub at: DateTime<Utc>,
}

/// Aggregate output of change detection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeResult {
    /// New identifiers whose normalized status is approved.
    pub new_records: Vec<Record>,
    /// Status transitions that match the relevant-transition allow-list.
    pub relevant_changes: Vec<ChangeEvent>,
    /// Every status transition, relevant or not.
    pub all_changes: Vec<ChangeEvent>,
    /// New identifiers that were not approved (counted, not emitted).
    pub new_other_count: usize,
    /// Identifiers present in the previous snapshot but not the current.
    pub removed_count: usize,
}

impl ChangeResult {
    pub fn has_changes(&self) -> bool {
        !self.new_records.is_empty() || !self.relevant_changes.is_empty()
    }
}

/// Append-only audit row, one per non-dry invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    /// Mode the run was dispatched in.
    pub mode: MonitorMode,
    /// Short outcome label (`promoted`, `rejected`, `anomaly`, `quarantined`, `failed`).
    pub outcome: String,
    pub total_records: usize,
    pub pages_fetched: u32,
    pub method: String,
    pub new_count: usize,
    pub relevant_change_count: usize,
    pub snapshot_digest: Option<String>,
    pub success: bool,
    pub errors: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_last_duplicate_wins() {
        let snapshot = Snapshot::from_records(vec![
            Record::new("seia_1000001", "first", "En Calificación"),
            Record::new("seia_1000002", "other", "Aprobado"),
            Record::new("seia_1000001", "second", "Aprobado"),
        ]);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.duplicates(), 1);
        let kept = snapshot.get("seia_1000001").unwrap();
        assert_eq!(kept.name, "second");
        assert_eq!(kept.status, Status::Approved);
        assert_eq!(snapshot.approved_count(), 2);
    }

    #[test]
    fn test_digest_ignores_order_and_cosmetic_fields() {
        let mut a = Record::new("seia_1000001", "A", "Aprobado");
        let b = Record::new("seia_1000002", "B", "Rechazado");
        let first = Snapshot::from_records(vec![a.clone(), b.clone()]);
        a.name = "A (renamed)".to_string();
        let second = Snapshot::from_records(vec![b, a]);
        assert_eq!(first.digest(), second.digest());

        let changed = Snapshot::from_records(vec![Record::new("seia_1000001", "A", "Desistido")]);
        assert_ne!(first.digest(), changed.digest());
    }

    #[test]
    fn test_mode_parse_rejects_unknown() {
        assert_eq!("NORMAL".parse::<MonitorMode>().unwrap(), MonitorMode::Normal);
        assert!("normal".parse::<MonitorMode>().is_err());
        assert!("PAUSED".parse::<MonitorMode>().is_err());
    }
}
