//! Storage abstraction for Registry Monitor.
//!
//! The [`Store`] trait is the only way the pipeline touches durable state:
//! the staging area, the trusted baseline, the [`MonitorState`] singleton,
//! the run audit log, and the change history. Backends must make
//! [`stage`](Store::stage), [`promote`](Store::promote), and
//! [`discard`](Store::discard) all-or-nothing: a failure leaves baseline,
//! staging, mode state and history exactly as they were before the call.
//!
//! A promotion commits the new baseline together with the next
//! [`MonitorState`] and the run's status changes, so a run can never leave
//! a promoted baseline without the history that explains it.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{ChangeEvent, MonitorState, Record, RunRecord};

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`stage`](Store::stage) | Replace the staging area with a snapshot |
/// | [`promote`](Store::promote) | Replace baseline with staging, clear staging, write state and history |
/// | [`discard`](Store::discard) | Clear staging and optionally write state, leave baseline alone |
/// | [`read_state`](Store::read_state) / [`write_state`](Store::write_state) | Operational mode singleton |
/// | [`append_run_record`](Store::append_run_record) | Audit log |
/// | [`history_for`](Store::history_for) | Status change history |
///
/// Timestamps are kept at millisecond resolution. [`Monitor`] truncates its
/// clock to milliseconds, so every backend returns exactly what it was given.
///
/// [`Monitor`]: crate::pipeline::Monitor
#[async_trait]
pub trait Store: Send + Sync {
    /// Atomically replace the whole staging area with `records`.
    async fn stage(&self, records: &[Record]) -> Result<()>;

    /// Atomically replace the baseline with the staging content, clear
    /// staging, write `next_state` (when given) and append `history`.
    ///
    /// Identifiers already in the baseline keep their `first_seen`; new ones
    /// get `at`. Every promoted record gets `last_updated = at`. Returns the
    /// number of promoted records.
    async fn promote(
        &self,
        at: DateTime<Utc>,
        next_state: Option<&MonitorState>,
        history: &[ChangeEvent],
    ) -> Result<usize>;

    /// Atomically clear staging and write `next_state` (when given), without
    /// touching the baseline.
    async fn discard(&self, next_state: Option<&MonitorState>) -> Result<()>;

    async fn read_baseline(&self) -> Result<Vec<Record>>;

    async fn read_staging(&self) -> Result<Vec<Record>>;

    /// Read the mode singleton, or [`MonitorState::initial`] if none was
    /// ever written. An unknown persisted mode is an error.
    async fn read_state(&self) -> Result<MonitorState>;

    async fn write_state(&self, state: &MonitorState) -> Result<()>;

    async fn append_run_record(&self, record: &RunRecord) -> Result<()>;

    async fn last_run_record(&self) -> Result<Option<RunRecord>>;

    /// Change history of one identifier, newest first.
    async fn history_for(&self, id: &str, limit: usize) -> Result<Vec<ChangeEvent>>;
}

/// Apply promotion timestamps to a staged record.
pub fn stamp_promoted(
    mut record: Record,
    previous_first_seen: Option<DateTime<Utc>>,
    at: DateTime<Utc>,
) -> Record {
    record.first_seen = Some(previous_first_seen.unwrap_or(at));
    record.last_updated = Some(at);
    record
}
