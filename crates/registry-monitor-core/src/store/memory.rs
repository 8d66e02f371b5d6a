//! In-memory [`Store`] implementation for tests and dry tooling.
//!
//! All state sits behind one `std::sync::RwLock`, so every operation is
//! trivially atomic: the new value is built first and swapped in under the
//! write lock. [`FailPoint`]s let tests make the next call of an operation
//! fail after its work is prepared but before anything is swapped in.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, RwLock};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{ChangeEvent, MonitorState, Record, RunRecord};

use super::{stamp_promoted, Store};

/// Operations that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Stage,
    Promote,
    Discard,
    WriteState,
    AppendHistory,
}

#[derive(Default)]
struct Inner {
    baseline: BTreeMap<String, Record>,
    staging: Vec<Record>,
    state: Option<MonitorState>,
    runs: Vec<RunRecord>,
    history: Vec<ChangeEvent>,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
    fail: Mutex<HashSet<FailPoint>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `point` fail.
    pub fn inject_failure(&self, point: FailPoint) {
        if let Ok(mut fail) = self.fail.lock() {
            fail.insert(point);
        }
    }

    /// All run records, oldest first.
    pub fn run_records(&self) -> Vec<RunRecord> {
        self.inner
            .read()
            .map(|inner| inner.runs.clone())
            .unwrap_or_default()
    }

    fn check(&self, point: FailPoint) -> Result<()> {
        let mut fail = self.fail.lock().map_err(|_| anyhow!("fail-point lock poisoned"))?;
        if fail.remove(&point) {
            bail!("injected failure in {:?}", point);
        }
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| anyhow!("store lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| anyhow!("store lock poisoned"))
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn stage(&self, records: &[Record]) -> Result<()> {
        let staged = records.to_vec();
        self.check(FailPoint::Stage)?;
        self.write()?.staging = staged;
        Ok(())
    }

    async fn promote(
        &self,
        at: DateTime<Utc>,
        next_state: Option<&MonitorState>,
        history: &[ChangeEvent],
    ) -> Result<usize> {
        let mut inner = self.write()?;

        let mut next = BTreeMap::new();
        for record in &inner.staging {
            let first_seen = inner.baseline.get(&record.id).and_then(|r| r.first_seen);
            next.insert(record.id.clone(), stamp_promoted(record.clone(), first_seen, at));
        }

        // Fail with everything built but nothing swapped in.
        self.check(FailPoint::Promote)?;
        if next_state.is_some() {
            self.check(FailPoint::WriteState)?;
        }
        if !history.is_empty() {
            self.check(FailPoint::AppendHistory)?;
        }

        let count = next.len();
        inner.baseline = next;
        inner.staging.clear();
        if let Some(state) = next_state {
            inner.state = Some(*state);
        }
        inner.history.extend_from_slice(history);
        Ok(count)
    }

    async fn discard(&self, next_state: Option<&MonitorState>) -> Result<()> {
        let mut inner = self.write()?;
        self.check(FailPoint::Discard)?;
        if next_state.is_some() {
            self.check(FailPoint::WriteState)?;
        }
        inner.staging.clear();
        if let Some(state) = next_state {
            inner.state = Some(*state);
        }
        Ok(())
    }

    async fn read_baseline(&self) -> Result<Vec<Record>> {
        Ok(self.read()?.baseline.values().cloned().collect())
    }

    async fn read_staging(&self) -> Result<Vec<Record>> {
        Ok(self.read()?.staging.clone())
    }

    async fn read_state(&self) -> Result<MonitorState> {
        Ok(self.read()?.state.unwrap_or_else(MonitorState::initial))
    }

    async fn write_state(&self, state: &MonitorState) -> Result<()> {
        self.check(FailPoint::WriteState)?;
        self.write()?.state = Some(*state);
        Ok(())
    }

    async fn append_run_record(&self, record: &RunRecord) -> Result<()> {
        self.write()?.runs.push(record.clone());
        Ok(())
    }

    async fn last_run_record(&self) -> Result<Option<RunRecord>> {
        Ok(self.read()?.runs.last().cloned())
    }

    async fn history_for(&self, id: &str, limit: usize) -> Result<Vec<ChangeEvent>> {
        Ok(self
            .read()?
            .history
            .iter()
            .rev()
            .filter(|e| e.id == id)
            .take(limit)
            .cloned()
            .collect())
    }
}
