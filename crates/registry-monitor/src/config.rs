//! Configuration parsing and validation.
//!
//! Registry Monitor is configured from a single TOML file (default
//! `./config/regmon.toml`). Every threshold has a default, so a minimal file
//! only needs `[db]` and one `[[sources]]` entry:
//!
//! ```toml
//! [db]
//! path = "./data/regmon.sqlite"
//!
//! [[sources]]
//! name = "registry-export"
//! kind = "file"
//! path = "./data/snapshot.json"
//! ```
//!
//! The parsed [`Config`] is turned into the core's immutable
//! [`MonitorConfig`] once, by [`Config::monitor_config`].

use anyhow::{bail, Context, Result};
use registry_monitor_core::config::{MonitorConfig, StabilityBounds};
use registry_monitor_core::Status;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable that overrides `[notify].webhook_url`.
pub const WEBHOOK_URL_ENV: &str = "REGMON_WEBHOOK_URL";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub gates: GatesConfig,
    #[serde(default)]
    pub stability: StabilityConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    #[serde(default)]
    pub anomaly: AnomalyConfig,
    #[serde(default)]
    pub changes: ChangesConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub lock: LockConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    File,
    Http,
}

/// One snapshot source. Sources are tried in file order.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    /// JSON snapshot file (`kind = "file"`).
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// JSON snapshot endpoint (`kind = "http"`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatesConfig {
    #[serde(default = "default_id_pattern")]
    pub id_pattern: String,
    #[serde(default = "default_approved_min_ratio")]
    pub approved_min_ratio: f64,
}

impl Default for GatesConfig {
    fn default() -> Self {
        Self {
            id_pattern: default_id_pattern(),
            approved_min_ratio: default_approved_min_ratio(),
        }
    }
}

fn default_id_pattern() -> String {
    registry_monitor_core::config::DEFAULT_ID_PATTERN.to_string()
}
fn default_approved_min_ratio() -> f64 {
    0.90
}

#[derive(Debug, Deserialize, Clone)]
pub struct StabilityConfig {
    #[serde(default = "default_intersection_min")]
    pub intersection_min: f64,
    #[serde(default = "default_count_ratio_min")]
    pub count_ratio_min: f64,
    #[serde(default = "default_count_ratio_max")]
    pub count_ratio_max: f64,
    /// Hard floor for the intersection ratio in NORMAL mode.
    #[serde(default = "default_intersection_floor")]
    pub intersection_floor: f64,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            intersection_min: default_intersection_min(),
            count_ratio_min: default_count_ratio_min(),
            count_ratio_max: default_count_ratio_max(),
            intersection_floor: default_intersection_floor(),
        }
    }
}

fn default_intersection_min() -> f64 {
    0.80
}
fn default_count_ratio_min() -> f64 {
    0.80
}
fn default_count_ratio_max() -> f64 {
    1.20
}
fn default_intersection_floor() -> f64 {
    0.50
}

#[derive(Debug, Deserialize, Clone)]
pub struct BootstrapConfig {
    #[serde(default = "default_stable_runs_required")]
    pub stable_runs_required: u32,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            stable_runs_required: default_stable_runs_required(),
        }
    }
}

fn default_stable_runs_required() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnomalyConfig {
    #[serde(default = "default_new_approved_threshold")]
    pub new_approved_threshold: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            new_approved_threshold: default_new_approved_threshold(),
        }
    }
}

fn default_new_approved_threshold() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChangesConfig {
    /// `[from, to]` pairs of normalized status names.
    #[serde(default = "default_relevant_transitions")]
    pub relevant_transitions: Vec<[String; 2]>,
}

impl Default for ChangesConfig {
    fn default() -> Self {
        Self {
            relevant_transitions: default_relevant_transitions(),
        }
    }
}

fn default_relevant_transitions() -> Vec<[String; 2]> {
    vec![["under_review_active".to_string(), "approved".to_string()]]
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub alert_on_anomaly: bool,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_notify_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            alert_on_anomaly: true,
            webhook_url: None,
            timeout_secs: default_notify_timeout_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_notify_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// Daily-rolling log file, in addition to stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LockConfig {
    /// A run lease older than this is considered abandoned.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_secs: default_lease_secs(),
        }
    }
}

fn default_lease_secs() -> u64 {
    3600
}

impl Config {
    /// Build the immutable thresholds passed into the core pipeline.
    pub fn monitor_config(&self) -> Result<MonitorConfig> {
        let mut relevant_transitions = Vec::with_capacity(self.changes.relevant_transitions.len());
        for [from, to] in &self.changes.relevant_transitions {
            let from: Status = from
                .parse()
                .with_context(|| "changes.relevant_transitions: bad 'from' status")?;
            let to: Status = to
                .parse()
                .with_context(|| "changes.relevant_transitions: bad 'to' status")?;
            relevant_transitions.push((from, to));
        }

        let config = MonitorConfig {
            approved_min_ratio: self.gates.approved_min_ratio,
            stability: StabilityBounds {
                intersection_min: self.stability.intersection_min,
                count_ratio_min: self.stability.count_ratio_min,
                count_ratio_max: self.stability.count_ratio_max,
            },
            intersection_floor: self.stability.intersection_floor,
            stable_runs_required: self.bootstrap.stable_runs_required,
            new_approved_threshold: self.anomaly.new_approved_threshold,
            relevant_transitions,
            ..MonitorConfig::default()
        }
        .with_id_pattern(&self.gates.id_pattern)?;

        config.validate()?;
        Ok(config)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if let Ok(url) = std::env::var(WEBHOOK_URL_ENV) {
        if !url.trim().is_empty() {
            config.notify.webhook_url = Some(url);
        }
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Thresholds and the id pattern
    config.monitor_config()?;

    if config.sources.is_empty() {
        bail!("at least one [[sources]] entry is required");
    }

    for source in &config.sources {
        if source.name.trim().is_empty() {
            bail!("sources.name must not be empty");
        }
        match source.kind {
            SourceKind::File if source.path.is_none() => {
                bail!("source '{}': kind = \"file\" requires path", source.name)
            }
            SourceKind::Http => match source.url.as_deref() {
                None => bail!("source '{}': kind = \"http\" requires url", source.name),
                Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                    bail!("source '{}': url must start with http:// or https://", source.name)
                }
                _ => {}
            },
            _ => {}
        }
        if source.timeout_secs == 0 {
            bail!("source '{}': timeout_secs must be > 0", source.name);
        }
    }

    if config.lock.lease_secs == 0 {
        bail!("lock.lease_secs must be > 0");
    }

    Ok(())
}
