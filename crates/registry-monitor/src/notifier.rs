//! Concrete notifiers.
//!
//! [`LogNotifier`] writes every report and alert to the log. [`WebhookNotifier`]
//! POSTs a plain JSON body to a URL. [`FanoutNotifier`] is what `regmon`
//! wires into the pipeline: it always logs and delivers to the webhook when
//! one is configured and delivery is enabled.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};

use registry_monitor_core::models::ChangeResult;
use registry_monitor_core::notify::{Alert, AlertKind, Notifier};

use crate::config::NotifyConfig;

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn report(&self, changes: &ChangeResult) -> Result<()> {
        info!(
            new_approved = changes.new_records.len(),
            relevant = changes.relevant_changes.len(),
            status_changes = changes.all_changes.len(),
            "change report"
        );
        for record in &changes.new_records {
            info!(id = %record.id, name = %record.name, region = ?record.region, "new approved record");
        }
        for event in &changes.relevant_changes {
            info!(id = %event.id, from = %event.previous, to = %event.current, "relevant transition");
        }
        Ok(())
    }

    async fn alert(&self, alert: &Alert) -> Result<()> {
        warn!(
            kind = %alert.kind,
            reason = %alert.reason,
            intersection = alert.metrics.intersection_ratio,
            count_ratio = alert.metrics.count_ratio,
            total_retrieved = alert.total_retrieved,
            "alert"
        );
        Ok(())
    }
}

pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    async fn post(&self, body: serde_json::Value) -> Result<()> {
        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("webhook {} returned {}: {}", self.url, status, text);
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn report(&self, changes: &ChangeResult) -> Result<()> {
        self.post(json!({
            "type": "report",
            "new_count": changes.new_records.len(),
            "relevant_count": changes.relevant_changes.len(),
            "status_change_count": changes.all_changes.len(),
            "new_records": changes.new_records,
            "relevant_changes": changes.relevant_changes,
        }))
        .await
    }

    async fn alert(&self, alert: &Alert) -> Result<()> {
        self.post(json!({
            "type": "alert",
            "kind": alert.kind,
            "reason": alert.reason,
            "metrics": alert.metrics,
            "total_retrieved": alert.total_retrieved,
        }))
        .await
    }
}

pub struct FanoutNotifier {
    log: LogNotifier,
    webhook: Option<WebhookNotifier>,
    enabled: bool,
    alert_on_anomaly: bool,
}

impl FanoutNotifier {
    pub fn from_config(config: &NotifyConfig) -> Result<Self> {
        let webhook = match &config.webhook_url {
            Some(url) => Some(WebhookNotifier::new(
                url.clone(),
                Duration::from_secs(config.timeout_secs),
            )?),
            None => None,
        };
        Ok(Self {
            log: LogNotifier,
            webhook,
            enabled: config.enabled,
            alert_on_anomaly: config.alert_on_anomaly,
        })
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn report(&self, changes: &ChangeResult) -> Result<()> {
        self.log.report(changes).await?;
        match &self.webhook {
            Some(webhook) if self.enabled => webhook.report(changes).await,
            _ => Ok(()),
        }
    }

    async fn alert(&self, alert: &Alert) -> Result<()> {
        self.log.alert(alert).await?;
        if alert.kind == AlertKind::Anomaly && !self.alert_on_anomaly {
            debug!("anomaly alert delivery disabled");
            return Ok(());
        }
        match &self.webhook {
            Some(webhook) if self.enabled => webhook.alert(alert).await,
            _ => Ok(()),
        }
    }
}
