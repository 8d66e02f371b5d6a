//! `regmon status`, `regmon history`, and `regmon config check`.

use anyhow::Result;

use registry_monitor_core::store::Store;
use registry_monitor_core::MonitorMode;

use crate::config::{Config, SourceKind};
use crate::db;
use crate::migrate;
use crate::sqlite_store::{format_ts_iso, SqliteStore};

async fn open_store(config: &Config) -> Result<SqliteStore> {
    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;
    Ok(SqliteStore::new(pool))
}

/// Print the mode, progress toward NORMAL, table sizes, and the last run.
pub async fn run_status(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let state = store.read_state().await?;
    let baseline = store.baseline_count().await?;
    let staging = store.staging_count().await?;
    let last = store.last_run_record().await?;
    let required = config.bootstrap.stable_runs_required;

    println!("Registry Monitor Status");
    println!("=======================");
    println!();
    println!("  Database:     {}", config.db.path.display());
    println!("  Mode:         {}", state.mode);
    match state.mode {
        MonitorMode::Bootstrap => {
            println!(
                "  Stable runs:  {}/{} ({} more needed)",
                state.consecutive_stable_runs,
                required,
                required.saturating_sub(state.consecutive_stable_runs)
            );
        }
        MonitorMode::Normal => {
            println!("  Stable runs:  {}", state.consecutive_stable_runs);
        }
        MonitorMode::Quarantine => {
            println!("  Baseline frozen. Run `regmon bootstrap` after checking the source.");
        }
    }
    println!("  Baseline:     {} records", baseline);
    if staging > 0 {
        println!("  Staging:      {} records (expected 0 between runs)", staging);
    } else {
        println!("  Staging:      0 records");
    }

    println!();
    match last {
        Some(run) => {
            println!("  Last run:     {}", format_ts_iso(run.started_at.timestamp()));
            println!(
                "    Outcome:    {} ({})",
                run.outcome,
                if run.success { "ok" } else { "failed" }
            );
            println!("    Mode:       {}", run.mode);
            println!("    Records:    {} via {}", run.total_records, run.method);
            println!("    New:        {}", run.new_count);
            println!("    Relevant:   {}", run.relevant_change_count);
            println!("    Duration:   {:.1}s", run.duration_secs);
            if let Some(errors) = &run.errors {
                println!("    Notes:      {}", errors);
            }
        }
        None => println!("  Last run:     never"),
    }

    Ok(())
}

/// Print the recorded status transitions of one identifier, newest first.
pub async fn run_history(config: &Config, id: &str, limit: usize) -> Result<()> {
    let store = open_store(config).await?;
    let events = store.history_for(id, limit).await?;

    if events.is_empty() {
        println!("No recorded changes for {}.", id);
        return Ok(());
    }

    println!("History for {} ({} change(s))", id, events.len());
    println!();
    for event in &events {
        println!(
            "  {}  {} -> {}{}",
            format_ts_iso(event.at.timestamp()),
            event.previous,
            event.current,
            if event.relevant { "  [relevant]" } else { "" }
        );
        println!("      \"{}\" -> \"{}\"", event.previous_raw, event.current_raw);
    }

    Ok(())
}

/// Print the effective configuration after defaults and validation.
pub fn run_config_check(config: &Config) -> Result<()> {
    let monitor = config.monitor_config()?;

    println!("Configuration OK");
    println!();
    println!("  Database:              {}", config.db.path.display());
    println!("  Sources:");
    for source in &config.sources {
        let target = match source.kind {
            SourceKind::File => source
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            SourceKind::Http => source.url.clone().unwrap_or_default(),
        };
        println!("    - {} ({:?}): {}", source.name, source.kind, target);
    }
    println!("  Id pattern:            {}", monitor.id_pattern.as_str());
    println!("  Approved min ratio:    {:.2}", monitor.approved_min_ratio);
    println!(
        "  Stability:             intersection >= {:.2}, count ratio in [{:.2}, {:.2}]",
        monitor.stability.intersection_min,
        monitor.stability.count_ratio_min,
        monitor.stability.count_ratio_max
    );
    println!("  Intersection floor:    {:.2}", monitor.intersection_floor);
    println!("  Stable runs required:  {}", monitor.stable_runs_required);
    println!("  Anomaly threshold:     {}", monitor.new_approved_threshold);
    for (from, to) in &monitor.relevant_transitions {
        println!("  Relevant transition:   {} -> {}", from, to);
    }
    println!(
        "  Notifications:         {}{}",
        if config.notify.enabled { "enabled" } else { "disabled" },
        if config.notify.webhook_url.is_some() {
            " (webhook)"
        } else {
            " (log only)"
        }
    );
    println!("  Run lease:             {}s", config.lock.lease_secs);

    Ok(())
}
