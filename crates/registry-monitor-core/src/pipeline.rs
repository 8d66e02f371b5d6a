//! One monitoring run: fetch, stage, validate, analyze, decide, commit.
//!
//! [`Monitor::run`] is a single sequential unit of work. It performs one
//! transaction pair against the store (stage, then promote or discard, the
//! latter carrying the next mode state and change history with it),
//! notifies, and appends a [`RunRecord`]. In dry-run mode every step is
//! evaluated against in-memory snapshots and nothing is written or sent.

use std::time::Instant;

use chrono::{DateTime, SubsecRound, Utc};
use tracing::{error, info, warn};

use crate::config::MonitorConfig;
use crate::diff::detect_changes;
use crate::error::{MonitorError, Violation};
use crate::gate::{self, ValidationResult};
use crate::models::{ChangeEvent, ChangeResult, MonitorMode, MonitorState, RunRecord, Snapshot};
use crate::notify::{Alert, AlertKind, Notifier};
use crate::policy::{self, Assessment, Decision};
use crate::source::{Retrieval, SnapshotSource};
use crate::stability::{self, StabilityMetrics};
use crate::store::Store;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Evaluate everything but mutate no storage and send nothing.
    pub dry_run: bool,
    /// Reset to BOOTSTRAP with a zero stable-run counter before dispatch.
    pub force_bootstrap: bool,
}

/// Tagged result of a run that got as far as a mode decision.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Promoted,
    /// A validation failure moved the monitor into QUARANTINE.
    Rejected(Violation),
    AnomalyDetected { new_approved: usize, threshold: usize },
    /// The monitor was already in QUARANTINE; the snapshot was discarded.
    Quarantined,
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Promoted => "promoted",
            RunOutcome::Rejected(_) => "rejected",
            RunOutcome::AnomalyDetected { .. } => "anomaly",
            RunOutcome::Quarantined => "quarantined",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub record: RunRecord,
    pub outcome: RunOutcome,
    /// State the run was dispatched in (after a forced bootstrap reset).
    pub state_before: MonitorState,
    pub state_after: MonitorState,
    pub validation: ValidationResult,
    pub stability: StabilityMetrics,
    pub changes: ChangeResult,
    pub dry_run: bool,
}

/// Facts gathered before a run fails, used for its audit row.
struct Progress {
    mode: MonitorMode,
    total_records: usize,
    pages_fetched: u32,
    method: String,
    digest: Option<String>,
    staged: bool,
}

pub struct Monitor<'a, S: ?Sized, R: ?Sized, N: ?Sized> {
    config: &'a MonitorConfig,
    store: &'a S,
    source: &'a R,
    notifier: &'a N,
}

impl<'a, S, R, N> Monitor<'a, S, R, N>
where
    S: Store + ?Sized,
    R: SnapshotSource + ?Sized,
    N: Notifier + ?Sized,
{
    pub fn new(config: &'a MonitorConfig, store: &'a S, source: &'a R, notifier: &'a N) -> Self {
        Self {
            config,
            store,
            source,
            notifier,
        }
    }

    pub async fn run(&self, options: RunOptions) -> Result<RunReport, MonitorError> {
        // Stores keep milliseconds.
        let started_at = Utc::now().trunc_subsecs(3);
        let clock = Instant::now();
        let mut progress = Progress {
            mode: MonitorMode::Bootstrap,
            total_records: 0,
            pages_fetched: 0,
            method: self.source.name().to_string(),
            digest: None,
            staged: false,
        };

        let result = self.execute(options, started_at, clock, &mut progress).await;
        let err = match result {
            Ok(report) => return Ok(report),
            Err(err) => err,
        };

        error!(error = %err, dry_run = options.dry_run, "run failed");
        if options.dry_run {
            return Err(err);
        }

        if progress.staged {
            if let Err(e) = self.store.discard(None).await {
                error!(error = %format!("{:#}", e), "could not clear staging after failure");
            }
        }

        let record = RunRecord {
            started_at,
            duration_secs: clock.elapsed().as_secs_f64(),
            mode: progress.mode,
            outcome: "failed".to_string(),
            total_records: progress.total_records,
            pages_fetched: progress.pages_fetched,
            method: progress.method,
            new_count: 0,
            relevant_change_count: 0,
            snapshot_digest: progress.digest,
            success: false,
            errors: Some(err.to_string()),
        };
        if let Err(e) = self.store.append_run_record(&record).await {
            error!(error = %format!("{:#}", e), "could not record failed run");
        }
        Err(err)
    }

    async fn execute(
        &self,
        options: RunOptions,
        started_at: DateTime<Utc>,
        clock: Instant,
        progress: &mut Progress,
    ) -> Result<RunReport, MonitorError> {
        let dry = options.dry_run;

        let mut state = self.store.read_state().await?;
        if options.force_bootstrap {
            info!(previous = %state.mode, "forced bootstrap: resetting mode and stable-run counter");
            state = MonitorState::initial();
            if !dry {
                self.store.write_state(&state).await?;
            }
        }
        progress.mode = state.mode;
        info!(mode = %state.mode, stable_runs = state.consecutive_stable_runs, dry_run = dry, "run started");

        let retrieval = match self.source.fetch().await {
            Ok(retrieval) => retrieval,
            Err(e) => Retrieval::failed(self.source.name(), format!("{:#}", e)),
        };
        progress.method = retrieval.meta.method.clone();
        progress.pages_fetched = retrieval.meta.pages_fetched;
        progress.total_records = retrieval.records.len();
        for e in &retrieval.meta.errors {
            warn!(method = %retrieval.meta.method, error = %e, "retrieval reported error");
        }
        if let Some(reason) = retrieval.rejection_reason() {
            return Err(MonitorError::Retrieval(reason));
        }
        let retrieval_errors = retrieval.meta.errors.clone();

        let snapshot = Snapshot::from_records(retrieval.records);
        if snapshot.duplicates() > 0 {
            warn!(duplicates = snapshot.duplicates(), "duplicate identifiers in snapshot; kept last occurrence");
        }
        progress.total_records = snapshot.len();
        progress.digest = Some(snapshot.digest());

        if !dry {
            self.store.stage(&snapshot.to_vec()).await?;
            progress.staged = true;
            info!(records = snapshot.len(), "snapshot staged");
        }

        let baseline = Snapshot::from_records(self.store.read_baseline().await?);
        let validation = gate::validate(&snapshot, self.config);
        let metrics = stability::analyze(&snapshot, &baseline, &self.config.stability);
        info!(
            intersection = %format!("{:.3}", metrics.intersection_ratio),
            count_ratio = %format!("{:.3}", metrics.count_ratio),
            stable = metrics.is_stable,
            baseline = metrics.baseline_count,
            "stability analyzed"
        );

        let changes = if state.mode == MonitorMode::Normal {
            detect_changes(&baseline, &snapshot, self.config, started_at)
        } else {
            ChangeResult::default()
        };

        let decision = policy::decide(
            state,
            Assessment {
                validation: &validation,
                stability: &metrics,
                new_approved: changes.new_records.len(),
            },
            self.config,
        );

        let (outcome, state_after, success, note) = match decision {
            Decision::Promote { next, publish } => {
                if !dry {
                    let history: &[ChangeEvent] = if publish { &changes.all_changes } else { &[] };
                    let promoted = self
                        .store
                        .promote(started_at, (next != state).then_some(&next), history)
                        .await?;
                    progress.staged = false;
                    info!(records = promoted, mode = %next.mode, stable_runs = next.consecutive_stable_runs, "staging promoted");
                    if next.mode != state.mode {
                        info!(from = %state.mode, to = %next.mode, "mode transition");
                    }
                    if publish {
                        if let Err(e) = self.notifier.report(&changes).await {
                            warn!(error = %format!("{:#}", e), "change report delivery failed");
                        }
                    }
                }
                (RunOutcome::Promoted, next, true, None)
            }
            Decision::Reject { next, violation } => {
                let reason = violation.to_string();
                warn!(category = violation.category().as_str(), reason = %reason, "snapshot rejected; entering QUARANTINE");
                if !dry {
                    self.store.discard(Some(&next)).await?;
                    progress.staged = false;
                }
                self.alert(dry, AlertKind::QuarantineEntered, reason.clone(), &metrics, snapshot.len())
                    .await;
                (RunOutcome::Rejected(violation), next, false, Some(reason))
            }
            Decision::Anomaly {
                new_approved,
                threshold,
            } => {
                let reason = format!(
                    "{} new approved records exceed the anomaly threshold of {}; snapshot discarded",
                    new_approved, threshold
                );
                warn!(new_approved, threshold, "anomaly circuit breaker tripped");
                if !dry {
                    self.store.discard(None).await?;
                    progress.staged = false;
                }
                self.alert(dry, AlertKind::Anomaly, reason.clone(), &metrics, snapshot.len())
                    .await;
                (
                    RunOutcome::AnomalyDetected {
                        new_approved,
                        threshold,
                    },
                    state,
                    true,
                    Some(reason),
                )
            }
            Decision::Frozen => {
                let reason =
                    "monitor is in QUARANTINE; baseline frozen until a forced bootstrap".to_string();
                warn!("{}", reason);
                if !dry {
                    self.store.discard(None).await?;
                    progress.staged = false;
                }
                self.alert(dry, AlertKind::QuarantineActive, reason.clone(), &metrics, snapshot.len())
                    .await;
                (RunOutcome::Quarantined, state, true, Some(reason))
            }
        };

        let mut notes: Vec<String> = retrieval_errors;
        notes.extend(note);
        let record = RunRecord {
            started_at,
            duration_secs: clock.elapsed().as_secs_f64(),
            mode: state.mode,
            outcome: outcome.label().to_string(),
            total_records: snapshot.len(),
            pages_fetched: progress.pages_fetched,
            method: progress.method.clone(),
            new_count: changes.new_records.len(),
            relevant_change_count: changes.relevant_changes.len(),
            snapshot_digest: progress.digest.clone(),
            success,
            errors: if notes.is_empty() {
                None
            } else {
                Some(notes.join("; "))
            },
        };
        if !dry {
            self.store.append_run_record(&record).await?;
        }

        info!(
            outcome = outcome.label(),
            mode = %state_after.mode,
            records = record.total_records,
            new = record.new_count,
            relevant = record.relevant_change_count,
            "run complete"
        );

        Ok(RunReport {
            record,
            outcome,
            state_before: state,
            state_after,
            validation,
            stability: metrics,
            changes,
            dry_run: dry,
        })
    }

    async fn alert(
        &self,
        dry: bool,
        kind: AlertKind,
        reason: String,
        metrics: &StabilityMetrics,
        total_retrieved: usize,
    ) {
        if dry {
            return;
        }
        let alert = Alert {
            kind,
            reason,
            metrics: *metrics,
            total_retrieved,
        };
        if let Err(e) = self.notifier.alert(&alert).await {
            warn!(kind = %kind, error = %format!("{:#}", e), "alert delivery failed");
        }
    }
}
