//! # Registry Monitor Core
//!
//! Backend-agnostic logic for Registry Monitor: the snapshot data model,
//! status normalization, integrity gates, stability analysis, change
//! detection, the operational mode policy, and the staged-commit pipeline
//! that ties them together.
//!
//! This crate contains no sqlx, network, or filesystem I/O. Storage,
//! retrieval, and notification are reached through the [`store::Store`],
//! [`source::SnapshotSource`], and [`notify::Notifier`] traits, so the whole
//! pipeline runs against [`store::memory::InMemoryStore`] in tests.
//!
//! ## Pipeline
//!
//! ```text
//! SnapshotSource ─▶ stage ─▶ gate ─▶ stability ─▶ policy ─┬─▶ promote ─▶ diff/history ─▶ report
//!                                                          └─▶ discard ─▶ alert
//! ```

pub mod config;
pub mod diff;
pub mod error;
pub mod gate;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod policy;
pub mod source;
pub mod stability;
pub mod status;
pub mod store;

pub use config::MonitorConfig;
pub use error::{MonitorError, Violation};
pub use models::{ChangeEvent, ChangeResult, MonitorMode, MonitorState, Record, RunRecord, Snapshot};
pub use pipeline::{Monitor, RunOptions, RunOutcome, RunReport};
pub use status::Status;
