//! Snapshot retrieval seam.
//!
//! The pipeline never scrapes or downloads anything itself; it asks a
//! [`SnapshotSource`] for a [`Retrieval`]. Concrete sources (JSON file,
//! HTTP, fallback chains) live in the application crate.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::Record;

/// How a retrieval went, as reported by the source.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalMeta {
    /// Name of the source (or chain) that produced the records.
    pub method: String,
    pub pages_fetched: u32,
    pub total_records: usize,
    pub duration_secs: f64,
    pub success: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub records: Vec<Record>,
    pub meta: RetrievalMeta,
}

impl Retrieval {
    /// A successful retrieval of `records` by `method`.
    pub fn ok(method: impl Into<String>, records: Vec<Record>) -> Self {
        let total_records = records.len();
        Self {
            records,
            meta: RetrievalMeta {
                method: method.into(),
                pages_fetched: 1,
                total_records,
                duration_secs: 0.0,
                success: true,
                errors: Vec::new(),
            },
        }
    }

    pub fn failed(method: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            records: Vec::new(),
            meta: RetrievalMeta {
                method: method.into(),
                success: false,
                errors: vec![error.into()],
                ..Default::default()
            },
        }
    }

    /// Reason this retrieval must not be staged, if any.
    ///
    /// A source reporting failure, or reporting success with no records and
    /// no explanation, aborts the run.
    pub fn rejection_reason(&self) -> Option<String> {
        if !self.meta.success {
            return Some(if self.meta.errors.is_empty() {
                format!("source '{}' reported failure", self.meta.method)
            } else {
                self.meta.errors.join("; ")
            });
        }
        if self.records.is_empty() {
            return Some(format!("source '{}' returned no records", self.meta.method));
        }
        None
    }
}

/// Produces one full snapshot of the monitored registry.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch a snapshot. An `Err` is treated like a failed [`Retrieval`].
    async fn fetch(&self) -> Result<Retrieval>;
}

/// A source that hands out a fixed list of records.
pub struct StaticSource {
    name: String,
    records: Vec<Record>,
}

impl StaticSource {
    pub fn new(name: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            name: name.into(),
            records,
        }
    }
}

#[async_trait]
impl SnapshotSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Retrieval> {
        Ok(Retrieval::ok(self.name.clone(), self.records.clone()))
    }
}
