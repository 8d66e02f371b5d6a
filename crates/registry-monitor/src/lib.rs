//! # Registry Monitor
//!
//! **A staged-commit ingestion monitor for public project registries.**
//!
//! Each run downloads a full snapshot of the registry, stages it, and only
//! promotes it to the trusted baseline when it passes the integrity gates
//! for the current operational mode. Change detection runs against the
//! trusted baseline, so a broken scrape never turns into a flood of bogus
//! "new" records.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────────┐   ┌──────────────┐
//! │   Sources    │──▶│  Pipeline (core)      │──▶│   SQLite     │
//! │ file / http  │   │ gate ▸ stability ▸    │   │ baseline     │
//! └──────────────┘   │ policy ▸ diff         │   │ staging      │
//!                    └──────────┬───────────┘   │ state / runs │
//!                               ▼               └──────────────┘
//!                        ┌─────────────┐
//!                        │  Notifiers  │
//!                        │ log/webhook │
//!                        └─────────────┘
//! ```
//!
//! The backend-agnostic logic lives in `registry-monitor-core`. This crate
//! adds configuration ([`config`]), the SQLite store ([`sqlite_store`]) and
//! schema ([`migrate`]), snapshot sources ([`source`]), notifiers
//! ([`notifier`]), logging ([`logging`]), and the `regmon` commands
//! ([`run_cmd`], [`status`]).

pub mod config;
pub mod db;
pub mod logging;
pub mod migrate;
pub mod notifier;
pub mod run_cmd;
pub mod source;
pub mod sqlite_store;
pub mod status;
