//! Concrete snapshot sources.
//!
//! Every source reads the same JSON snapshot document, either a bare array
//! of records or an object with a `records` array and an optional `pages`
//! count:
//!
//! ```json
//! { "pages": 3, "records": [
//!     { "id": "seia_2160123456", "name": "Parque Eólico Norte",
//!       "status_raw": "Aprobado", "region": "Antofagasta" }
//! ] }
//! ```
//!
//! `status` (normalized) is optional; when absent it is derived from
//! `status_raw`.
//!
//! - [`FileSource`] reads the document from disk.
//! - [`HttpSource`] GETs it, retrying 429/5xx and network errors with
//!   exponential backoff.
//! - [`FallbackSource`] tries several sources in order.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use registry_monitor_core::models::Record;
use registry_monitor_core::source::{Retrieval, RetrievalMeta, SnapshotSource};
use registry_monitor_core::Status;

use crate::config::{SourceConfig, SourceKind};

#[derive(Debug, Deserialize)]
struct SourceRecord {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    holder: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    filed_on: Option<String>,
    #[serde(default)]
    status_raw: String,
    #[serde(default)]
    status: Option<Status>,
    #[serde(default)]
    detail_ref: Option<String>,
}

impl From<SourceRecord> for Record {
    fn from(raw: SourceRecord) -> Self {
        let status = raw.status.unwrap_or_else(|| Status::from_raw(&raw.status_raw));
        Record {
            id: raw.id.trim().to_string(),
            name: raw.name,
            holder: raw.holder,
            category: raw.category,
            region: raw.region,
            filed_on: raw.filed_on,
            status_raw: raw.status_raw,
            status,
            detail_ref: raw.detail_ref,
            first_seen: None,
            last_updated: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SnapshotDocument {
    Bare(Vec<SourceRecord>),
    Paged {
        records: Vec<SourceRecord>,
        #[serde(default)]
        pages: Option<u32>,
    },
}

/// Parse a JSON snapshot document into a successful [`Retrieval`].
pub fn parse_document(bytes: &[u8], method: &str, started: Instant) -> Result<Retrieval> {
    let document: SnapshotDocument =
        serde_json::from_slice(bytes).with_context(|| "Invalid snapshot document")?;

    let (records, pages) = match document {
        SnapshotDocument::Bare(records) => (records, 1),
        SnapshotDocument::Paged { records, pages } => (records, pages.unwrap_or(1)),
    };
    let records: Vec<Record> = records.into_iter().map(Record::from).collect();

    Ok(Retrieval {
        meta: RetrievalMeta {
            method: method.to_string(),
            pages_fetched: pages,
            total_records: records.len(),
            duration_secs: started.elapsed().as_secs_f64(),
            success: true,
            errors: Vec::new(),
        },
        records,
    })
}

/// Reads a snapshot document from a local file.
pub struct FileSource {
    name: String,
    path: PathBuf,
}

impl FileSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl SnapshotSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Retrieval> {
        let started = Instant::now();
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("Failed to read snapshot file: {}", self.path.display()))?;
        let retrieval = parse_document(&bytes, &self.name, started)?;
        info!(source = %self.name, records = retrieval.records.len(), "snapshot file read");
        Ok(retrieval)
    }
}

/// GETs a snapshot document over HTTP with retry and backoff.
///
/// - HTTP 429 and 5xx: retry
/// - other 4xx: fail immediately
/// - network errors: retry
pub struct HttpSource {
    name: String,
    url: String,
    client: reqwest::Client,
    max_retries: u32,
    backoff_base: Duration,
}

impl HttpSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration, max_retries: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("regmon/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            name: name.into(),
            url: url.into(),
            client,
            max_retries,
            backoff_base: Duration::from_secs(1),
        })
    }

    /// Base delay of the exponential backoff (1s by default).
    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }
}

#[async_trait]
impl SnapshotSource for HttpSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Retrieval> {
        let started = Instant::now();
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1x, 2x, 4x, 8x, ...
                let delay = self.backoff_base * (1u32 << (attempt - 1).min(5));
                warn!(source = %self.name, attempt, delay_ms = delay.as_millis() as u64, "retrying snapshot download");
                tokio::time::sleep(delay).await;
            }

            match self.client.get(&self.url).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let bytes = response.bytes().await?;
                        let retrieval = parse_document(&bytes, &self.name, started)?;
                        info!(source = %self.name, records = retrieval.records.len(), attempts = attempt + 1, "snapshot downloaded");
                        return Ok(retrieval);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow::anyhow!("{} returned {}: {}", self.url, status, body_text));
                        continue;
                    }

                    bail!("{} returned {}: {}", self.url, status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("snapshot download failed after retries")))
    }
}

/// Tries each source in order; the first successful, non-empty retrieval
/// wins. Errors from earlier attempts travel along in `meta.errors`.
pub struct FallbackSource {
    sources: Vec<Box<dyn SnapshotSource>>,
}

impl FallbackSource {
    pub fn new(sources: Vec<Box<dyn SnapshotSource>>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl SnapshotSource for FallbackSource {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn fetch(&self) -> Result<Retrieval> {
        let started = Instant::now();
        let mut errors = Vec::new();

        for source in &self.sources {
            let result = source.fetch().await;
            let reason = match result {
                Ok(mut retrieval) => match retrieval.rejection_reason() {
                    None => {
                        errors.append(&mut retrieval.meta.errors);
                        retrieval.meta.errors = errors;
                        return Ok(retrieval);
                    }
                    Some(reason) => reason,
                },
                Err(e) => format!("{:#}", e),
            };
            warn!(source = %source.name(), error = %reason, "source failed; trying next");
            errors.push(format!("{}: {}", source.name(), reason));
        }

        Ok(Retrieval {
            records: Vec::new(),
            meta: RetrievalMeta {
                method: self.name().to_string(),
                duration_secs: started.elapsed().as_secs_f64(),
                success: false,
                errors,
                ..Default::default()
            },
        })
    }
}

/// Build the configured source chain. A single source is used directly.
pub fn build_source(sources: &[SourceConfig]) -> Result<Box<dyn SnapshotSource>> {
    let mut built: Vec<Box<dyn SnapshotSource>> = Vec::with_capacity(sources.len());
    for source in sources {
        let boxed: Box<dyn SnapshotSource> = match source.kind {
            SourceKind::File => {
                let path = source
                    .path
                    .clone()
                    .with_context(|| format!("source '{}' has no path", source.name))?;
                Box::new(FileSource::new(&source.name, path))
            }
            SourceKind::Http => {
                let url = source
                    .url
                    .clone()
                    .with_context(|| format!("source '{}' has no url", source.name))?;
                Box::new(HttpSource::new(
                    &source.name,
                    url,
                    Duration::from_secs(source.timeout_secs),
                    source.max_retries,
                )?)
            }
        };
        built.push(boxed);
    }

    match built.len() {
        0 => bail!("no snapshot sources configured"),
        1 => Ok(built.remove(0)),
        _ => Ok(Box::new(FallbackSource::new(built))),
    }
}
