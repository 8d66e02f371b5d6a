//! `regmon run` and `regmon bootstrap`.
//!
//! Wires the SQLite store, the configured source chain, and the notifiers
//! into one [`Monitor`] invocation, guarded by the run lease.

use anyhow::Result;
use tracing::warn;
use uuid::Uuid;

use registry_monitor_core::{Monitor, MonitorMode, RunOptions, RunOutcome, RunReport};

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::notifier::FanoutNotifier;
use crate::source;
use crate::sqlite_store::SqliteStore;

/// Execute one pipeline run against the configured database.
///
/// Non-dry runs hold the run lease for their whole duration; a live lease
/// held elsewhere aborts the run before anything is written, run record
/// included.
pub async fn run_monitor(config: &Config, options: RunOptions) -> Result<RunReport> {
    let monitor_config = config.monitor_config()?;
    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;
    let store = SqliteStore::new(pool);
    let source = source::build_source(&config.sources)?;
    let notifier = FanoutNotifier::from_config(&config.notify)?;

    let holder = if options.dry_run {
        None
    } else {
        let holder = Uuid::new_v4().to_string();
        store.acquire_lease(&holder, config.lock.lease_secs).await?;
        Some(holder)
    };

    let result = Monitor::new(&monitor_config, &store, source.as_ref(), &notifier)
        .run(options)
        .await;

    if let Some(holder) = &holder {
        if let Err(e) = store.release_lease(holder).await {
            warn!(error = %format!("{:#}", e), "failed to release run lease");
        }
    }

    Ok(result?)
}

/// Print a run summary to stdout.
pub fn print_report(report: &RunReport, stable_runs_required: u32) {
    let record = &report.record;

    if report.dry_run {
        println!("Run complete (dry run, nothing written)");
    } else {
        println!("Run complete");
    }
    println!("  Outcome:        {}", record.outcome);
    if report.state_before.mode == report.state_after.mode {
        println!("  Mode:           {}", report.state_after.mode);
    } else {
        println!(
            "  Mode:           {} -> {}",
            report.state_before.mode, report.state_after.mode
        );
    }
    if report.state_after.mode == MonitorMode::Bootstrap {
        println!(
            "  Stable runs:    {}/{}",
            report.state_after.consecutive_stable_runs, stable_runs_required
        );
    }
    println!(
        "  Records:        {} (method: {}, pages: {})",
        record.total_records, record.method, record.pages_fetched
    );
    println!(
        "  Approved ratio: {:.1}%",
        report.validation.approved_ratio * 100.0
    );
    if report.stability.has_baseline() {
        println!(
            "  Intersection:   {:.1}%",
            report.stability.intersection_ratio * 100.0
        );
        println!("  Count ratio:    {:.3}", report.stability.count_ratio);
    } else {
        println!("  Intersection:   n/a (no baseline yet)");
    }
    println!("  New approved:   {}", report.changes.new_records.len());
    println!("  Relevant:       {}", report.changes.relevant_changes.len());
    if let Some(digest) = &record.snapshot_digest {
        println!("  Digest:         {}", &digest[..digest.len().min(16)]);
    }
    match &report.outcome {
        RunOutcome::Rejected(violation) => {
            println!("  Violation:      {}", violation.category().as_str());
            println!("  Reason:         {}", violation);
        }
        RunOutcome::AnomalyDetected { .. } | RunOutcome::Quarantined => {
            if let Some(errors) = &record.errors {
                println!("  Reason:         {}", errors);
            }
        }
        RunOutcome::Promoted => {}
    }
}

/// Guidance printed after `regmon bootstrap`.
pub fn print_bootstrap_next_steps(report: &RunReport, stable_runs_required: u32) {
    println!();
    match report.state_after.mode {
        MonitorMode::Normal => {
            println!("Bootstrap complete: the monitor is now in NORMAL mode.");
        }
        MonitorMode::Bootstrap => {
            let remaining =
                stable_runs_required.saturating_sub(report.state_after.consecutive_stable_runs);
            println!(
                "Bootstrap in progress: {} more stable run(s) needed. Continue with `regmon run`.",
                remaining.max(1)
            );
        }
        MonitorMode::Quarantine => {
            println!("Bootstrap rejected the snapshot; the monitor is in QUARANTINE.");
            println!("Fix the source, then run `regmon bootstrap` again.");
        }
    }
}
