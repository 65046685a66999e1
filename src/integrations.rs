//! HTTP-backed probes, channels and region-switch hooks used by `region-sentinel run`.

use crate::alerting::{AlertSignal, LogChannel, NotificationChannel};
use crate::config::ControlPlaneConfig;
use crate::region::{HealthProbe, Region, RegionSwitchExecutor};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Webhook notification channel definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookChannelConfig {
    pub name: String,
    pub url: String,
}

fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}

/// GETs the URL a region registers under this probe's name.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    name: String,
    client: Client,
}

impl HttpProbe {
    pub fn new(name: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            client: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, region: &Region) -> Result<bool> {
        let url = region.endpoint(&self.name).ok_or_else(|| {
            anyhow::anyhow!("region {} has no '{}' probe endpoint", region.id, self.name)
        })?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;

        let healthy = response.status().is_success();
        if !healthy {
            debug!(region = %region.id, probe = %self.name, status = %response.status(), "Probe endpoint unhealthy");
        }
        Ok(healthy)
    }
}

/// POSTs each alert as JSON.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    name: String,
    url: String,
    client: Client,
}

impl WebhookChannel {
    pub fn new(config: &WebhookChannelConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            name: config.name.clone(),
            url: config.url.clone(),
            client: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, signal: &AlertSignal) -> Result<bool> {
        let response = self
            .client
            .post(&self.url)
            .json(signal)
            .send()
            .await
            .with_context(|| format!("POST {} failed", self.url))?;

        if !response.status().is_success() {
            warn!(channel = %self.name, status = %response.status(), "Webhook rejected alert");
            return Ok(false);
        }
        Ok(true)
    }
}

#[derive(Debug, Serialize)]
struct SwitchRequest<'a> {
    target_region_id: &'a str,
    target_display_name: &'a str,
}

/// Region-switch hook that delegates the cutover to an external webhook.
#[derive(Debug, Clone)]
pub struct WebhookSwitchExecutor {
    url: String,
    client: Client,
}

impl WebhookSwitchExecutor {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            url: url.into(),
            client: http_client(timeout)?,
        })
    }
}

#[async_trait]
impl RegionSwitchExecutor for WebhookSwitchExecutor {
    async fn execute(&self, target: &Region) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&SwitchRequest {
                target_region_id: &target.id,
                target_display_name: &target.display_name,
            })
            .send()
            .await
            .with_context(|| format!("POST {} failed", self.url))?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "switch webhook returned {}",
                response.status()
            ));
        }
        info!(target = %target.id, "Switch webhook accepted cutover");
        Ok(())
    }
}

/// Records the cutover in the log only; traffic steering happens elsewhere.
#[derive(Debug, Default, Clone)]
pub struct LogOnlySwitchExecutor;

#[async_trait]
impl RegionSwitchExecutor for LogOnlySwitchExecutor {
    async fn execute(&self, target: &Region) -> Result<()> {
        warn!(
            target = %target.id,
            "No switch webhook configured; route traffic to {} manually",
            target.display_name
        );
        Ok(())
    }
}

/// Probes, channels and switch hook built from configuration alone.
#[derive(Debug)]
pub struct StockCollaborators {
    pub probes: Vec<Arc<dyn HealthProbe>>,
    pub channels: Vec<Arc<dyn NotificationChannel>>,
    pub executor: Arc<dyn RegionSwitchExecutor>,
}

impl StockCollaborators {
    /// One `HttpProbe` per probe name any region registers an endpoint for;
    /// one channel per name the severity policy references.
    pub fn from_config(config: &ControlPlaneConfig) -> Result<Self> {
        let probe_names: BTreeSet<&str> = config
            .regions
            .iter()
            .flat_map(|r| r.probe_endpoints.keys().map(String::as_str))
            .collect();
        let probes = probe_names
            .into_iter()
            .map(|name| {
                HttpProbe::new(name, config.health_check_timeout())
                    .map(|p| Arc::new(p) as Arc<dyn HealthProbe>)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut channels: Vec<Arc<dyn NotificationChannel>> = Vec::new();
        for webhook in &config.webhook_channels {
            channels.push(Arc::new(WebhookChannel::new(webhook, config.channel_timeout())?));
        }
        for name in config.severity_channel_policy.referenced_channels() {
            if !channels.iter().any(|c| c.name() == name) {
                channels.push(Arc::new(LogChannel::new(name)));
            }
        }

        let executor: Arc<dyn RegionSwitchExecutor> = match &config.switch_webhook_url {
            Some(url) => Arc::new(WebhookSwitchExecutor::new(url.clone(), config.channel_timeout())?),
            None => Arc::new(LogOnlySwitchExecutor),
        };

        info!(
            probes = probes.len(),
            channels = channels.len(),
            switch_webhook = config.switch_webhook_url.is_some(),
            "Built stock collaborators"
        );
        Ok(Self {
            probes,
            channels,
            executor,
        })
    }
}
