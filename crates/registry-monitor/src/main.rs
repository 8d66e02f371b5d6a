//! # Registry Monitor CLI (`regmon`)
//!
//! ## Usage
//!
//! ```bash
//! regmon --config ./config/regmon.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `regmon init` | Create the SQLite database and schema |
//! | `regmon run` | Fetch, validate, and promote or discard one snapshot |
//! | `regmon bootstrap` | Reset to BOOTSTRAP mode, then run |
//! | `regmon status` | Show mode, bootstrap progress, and the last run |
//! | `regmon history <id>` | Show the status changes of one record |
//! | `regmon config check` | Validate the config and print effective thresholds |
//!
//! ## Examples
//!
//! ```bash
//! # First-time setup
//! regmon init --config ./config/regmon.toml
//! regmon bootstrap --config ./config/regmon.toml
//!
//! # Scheduled run (cron, systemd timer)
//! regmon run --config ./config/regmon.toml
//!
//! # See what a run would do without writing anything
//! regmon run --dry-run --config ./config/regmon.toml
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use registry_monitor::{config, logging, migrate, run_cmd, status};
use registry_monitor_core::RunOptions;

/// Registry Monitor: a staged-commit ingestion monitor for public registries.
#[derive(Parser)]
#[command(
    name = "regmon",
    about = "Registry Monitor: staged-commit snapshot monitoring with integrity gates",
    version,
    long_about = "Registry Monitor stages every registry snapshot, checks it against \
    identifier-schema, approved-ratio, and stability gates, and only then promotes it to \
    the trusted baseline used for change detection. Suspicious snapshots are discarded \
    and alerted on; repeated failures freeze the baseline in QUARANTINE."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/regmon.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Run the pipeline once.
    Run {
        /// Validate, analyze, and diff without writing or notifying.
        #[arg(long)]
        dry_run: bool,
    },

    /// Force BOOTSTRAP mode (resetting the stable-run counter), then run.
    ///
    /// This is the only way out of QUARANTINE.
    Bootstrap {
        /// Evaluate as BOOTSTRAP without persisting the reset.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show operational mode, bootstrap progress, and the last run.
    Status,

    /// Show recorded status changes for one record identifier.
    History {
        /// Record identifier, e.g. `seia_2160123456`.
        id: String,

        /// Maximum number of changes to show.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Configuration utilities.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate the configuration and print the effective thresholds.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    let _log_guard = logging::init(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Run { dry_run } => {
            let report = run_cmd::run_monitor(
                &cfg,
                RunOptions {
                    dry_run,
                    force_bootstrap: false,
                },
            )
            .await?;
            run_cmd::print_report(&report, cfg.bootstrap.stable_runs_required);
        }
        Commands::Bootstrap { dry_run } => {
            let report = run_cmd::run_monitor(
                &cfg,
                RunOptions {
                    dry_run,
                    force_bootstrap: true,
                },
            )
            .await?;
            run_cmd::print_report(&report, cfg.bootstrap.stable_runs_required);
            run_cmd::print_bootstrap_next_steps(&report, cfg.bootstrap.stable_runs_required);
        }
        Commands::Status => {
            status::run_status(&cfg).await?;
        }
        Commands::History { id, limit } => {
            status::run_history(&cfg, &id, limit).await?;
        }
        Commands::Config {
            action: ConfigAction::Check,
        } => {
            status::run_config_check(&cfg)?;
        }
    }

    Ok(())
}
