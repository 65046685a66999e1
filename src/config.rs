use crate::alerting::{AlertSeverity, EscalationPolicy, SeverityChannelPolicy};
use crate::integrations::WebhookChannelConfig;
use crate::region::{Region, RegionRole};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    /// Primary first by convention; candidates in failover priority order
    pub regions: Vec<Region>,

    /// Interval between region health passes
    pub health_check_interval_ms: u64,

    /// Per-probe timeout; a probe exceeding it counts as failed
    pub health_check_timeout_ms: u64,

    /// Consecutive failed passes before the active region is failed over
    pub max_consecutive_failures: u32,

    /// Switch regions without operator approval
    pub auto_failover_enabled: bool,

    /// Force operator approval even when auto failover is enabled
    pub manual_failover_required: bool,

    /// Return to the original primary once it recovers
    pub failback_enabled: bool,

    /// Minimum time spent failed over before failback is considered
    pub failback_delay_ms: u64,

    /// Window during which same-or-lower severity repeats are suppressed
    pub dedup_window_ms: u64,

    /// Delay before an unresolved Error/Critical alert is re-raised
    pub escalation_delay_ms: u64,

    /// Escalate once per alert, or keep re-raising until resolved
    pub escalation_policy: EscalationPolicy,

    /// Severity -> channel routing
    pub severity_channel_policy: SeverityChannelPolicy,

    /// Per-channel send timeout
    pub channel_timeout_ms: u64,

    /// Channels delivered over HTTP; other policy channels go to the log
    pub webhook_channels: Vec<WebhookChannelConfig>,

    /// Region-switch hook endpoint; without one cutovers are only logged
    pub switch_webhook_url: Option<String>,

    /// Dispatch records kept for audit
    pub max_audit_records: usize,

    /// Log level (error, warn, info, debug, trace)
    pub log_level: String,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            regions: Vec::new(),
            health_check_interval_ms: 30_000, // 30 seconds
            health_check_timeout_ms: 5_000,
            max_consecutive_failures: 3,
            auto_failover_enabled: true,
            manual_failover_required: false,
            failback_enabled: true,
            failback_delay_ms: 600_000, // 10 minutes
            dedup_window_ms: 300_000,   // 5 minutes
            escalation_delay_ms: 900_000, // 15 minutes, longer than the dedup window
            escalation_policy: EscalationPolicy::Once,
            severity_channel_policy: SeverityChannelPolicy::default(),
            channel_timeout_ms: 5_000,
            webhook_channels: Vec::new(),
            switch_webhook_url: None,
            max_audit_records: 1000,
            log_level: "info".to_string(),
        }
    }
}

impl ControlPlaneConfig {
    /// Load from an optional TOML file, then apply `SENTINEL_*` environment
    /// overrides (a `.env` file is honoured if present).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match env::var("SENTINEL_CONFIG_FILE") {
                Ok(file) => Self::from_file(Path::new(&file))?,
                Err(_) => Self::default(),
            },
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| anyhow::anyhow!("TOML parse error: {e}"))
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(v) = parse_env("SENTINEL_HEALTH_CHECK_INTERVAL_MS")? {
            self.health_check_interval_ms = v;
        }
        if let Some(v) = parse_env("SENTINEL_HEALTH_CHECK_TIMEOUT_MS")? {
            self.health_check_timeout_ms = v;
        }
        if let Some(v) = parse_env("SENTINEL_MAX_CONSECUTIVE_FAILURES")? {
            self.max_consecutive_failures = v;
        }
        if let Some(v) = parse_env("SENTINEL_AUTO_FAILOVER_ENABLED")? {
            self.auto_failover_enabled = v;
        }
        if let Some(v) = parse_env("SENTINEL_MANUAL_FAILOVER_REQUIRED")? {
            self.manual_failover_required = v;
        }
        if let Some(v) = parse_env("SENTINEL_FAILBACK_ENABLED")? {
            self.failback_enabled = v;
        }
        if let Some(v) = parse_env("SENTINEL_FAILBACK_DELAY_MS")? {
            self.failback_delay_ms = v;
        }
        if let Some(v) = parse_env("SENTINEL_DEDUP_WINDOW_MS")? {
            self.dedup_window_ms = v;
        }
        if let Some(v) = parse_env("SENTINEL_ESCALATION_DELAY_MS")? {
            self.escalation_delay_ms = v;
        }
        if let Ok(policy) = env::var("SENTINEL_ESCALATION_POLICY") {
            self.escalation_policy = match policy.to_ascii_lowercase().as_str() {
                "once" => EscalationPolicy::Once,
                "repeat" => EscalationPolicy::Repeat,
                other => {
                    return Err(anyhow::anyhow!(
                        "Invalid SENTINEL_ESCALATION_POLICY: {other}. Must be 'once' or 'repeat'"
                    ))
                }
            };
        }
        if let Some(v) = parse_env("SENTINEL_CHANNEL_TIMEOUT_MS")? {
            self.channel_timeout_ms = v;
        }
        if let Ok(url) = env::var("SENTINEL_SWITCH_WEBHOOK_URL") {
            self.switch_webhook_url = Some(url);
        }
        if let Ok(level) = env::var("SENTINEL_LOG_LEVEL") {
            self.log_level = level;
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.regions.is_empty() {
            return Err(anyhow::anyhow!("At least one region must be configured"));
        }

        let primaries = self
            .regions
            .iter()
            .filter(|r| r.role == RegionRole::Primary)
            .count();
        if primaries != 1 {
            return Err(anyhow::anyhow!(
                "Exactly one primary region is required, found {primaries}"
            ));
        }

        let mut seen = HashSet::new();
        for region in &self.regions {
            if region.id.trim().is_empty() {
                return Err(anyhow::anyhow!("Region id must not be empty"));
            }
            if !seen.insert(region.id.as_str()) {
                return Err(anyhow::anyhow!("Duplicate region id: {}", region.id));
            }
        }

        if self.health_check_interval_ms == 0 {
            return Err(anyhow::anyhow!("Health check interval must be greater than 0"));
        }
        if self.health_check_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Health check timeout must be greater than 0"));
        }
        if self.max_consecutive_failures == 0 {
            return Err(anyhow::anyhow!(
                "Max consecutive failures must be greater than 0"
            ));
        }
        if self.escalation_delay_ms == 0 {
            return Err(anyhow::anyhow!("Escalation delay must be greater than 0"));
        }
        if self.channel_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Channel timeout must be greater than 0"));
        }
        let mut webhook_names = HashSet::new();
        for webhook in &self.webhook_channels {
            if !webhook_names.insert(webhook.name.as_str()) {
                return Err(anyhow::anyhow!("Duplicate webhook channel: {}", webhook.name));
            }
            if !is_http_url(&webhook.url) {
                return Err(anyhow::anyhow!(
                    "Webhook channel {} must use an http(s) URL",
                    webhook.name
                ));
            }
        }
        if let Some(url) = &self.switch_webhook_url {
            if !is_http_url(url) {
                return Err(anyhow::anyhow!("Switch webhook must use an http(s) URL"));
            }
        }

        if self
            .severity_channel_policy
            .channels_for(AlertSeverity::Critical)
            .is_empty()
        {
            return Err(anyhow::anyhow!(
                "Critical alerts must route to at least one channel"
            ));
        }

        if self.health_check_timeout_ms >= self.health_check_interval_ms {
            tracing::warn!(
                "Probe timeout {}ms is not shorter than the check interval {}ms; passes will be skipped",
                self.health_check_timeout_ms,
                self.health_check_interval_ms
            );
        }

        Ok(())
    }

    pub fn primary(&self) -> Option<&Region> {
        self.regions.iter().find(|r| r.role == RegionRole::Primary)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    pub fn escalation_delay(&self) -> Duration {
        Duration::from_millis(self.escalation_delay_ms)
    }

    pub fn channel_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_timeout_ms)
    }

    /// Create a diagnostic report for troubleshooting
    pub fn create_diagnostic_report(&self) -> String {
        let mut report = String::new();
        report.push_str("=== Region Sentinel Configuration Report ===\n\n");

        report.push_str("Regions:\n");
        for (priority, region) in self.regions.iter().enumerate() {
            let role = match region.role {
                RegionRole::Primary => "primary".to_string(),
                RegionRole::Candidate => format!("candidate #{priority}"),
            };
            report.push_str(&format!(
                "  {} ({}) - {}, {} probe endpoint(s)\n",
                region.id,
                region.display_name,
                role,
                region.probe_endpoints.len()
            ));
        }

        report.push_str("\nHealth Checks:\n");
        report.push_str(&format!("  Interval: {}ms\n", self.health_check_interval_ms));
        report.push_str(&format!("  Probe timeout: {}ms\n", self.health_check_timeout_ms));
        report.push_str(&format!(
            "  Failover threshold: {} consecutive failures\n",
            self.max_consecutive_failures
        ));

        report.push_str("\nFailover:\n");
        report.push_str(&format!("  Automatic: {}\n", self.auto_failover_enabled));
        report.push_str(&format!(
            "  Manual approval required: {}\n",
            self.manual_failover_required
        ));
        report.push_str(&format!(
            "  Failback: {} (delay {}ms)\n",
            self.failback_enabled, self.failback_delay_ms
        ));

        report.push_str("\nAlerting:\n");
        report.push_str(&format!("  Dedup window: {}ms\n", self.dedup_window_ms));
        report.push_str(&format!(
            "  Escalation: {:?} after {}ms\n",
            self.escalation_policy, self.escalation_delay_ms
        ));
        for severity in AlertSeverity::ALL {
            report.push_str(&format!(
                "  {:<8} -> [{}]\n",
                severity.as_str(),
                self.severity_channel_policy.channels_for(severity).join(", ")
            ));
        }

        for webhook in &self.webhook_channels {
            report.push_str(&format!("  webhook {} -> {}\n", webhook.name, webhook.url));
        }
        report.push_str(&format!(
            "  Region switch hook: {}\n",
            self.switch_webhook_url.as_deref().unwrap_or("log only")
        ));

        report.push_str("\nValidation Results:\n");
        match self.validate() {
            Ok(_) => report.push_str("  ✅ All configuration checks passed\n"),
            Err(e) => report.push_str(&format!("  ❌ Configuration error: {e}\n")),
        }

        report.push_str("\n=== End Configuration Report ===\n");
        report
    }
}

fn is_http_url(url: &str) -> bool {
    url::Url::parse(url)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", name, e)),
        Err(_) => Ok(None),
    }
}

/// Sample configuration written by `region-sentinel init-config`
pub const SAMPLE_CONFIG: &str = r#"# Region Sentinel configuration
health_check_interval_ms = 30000
health_check_timeout_ms = 5000
max_consecutive_failures = 3
auto_failover_enabled = true
manual_failover_required = false
failback_enabled = true
failback_delay_ms = 600000
dedup_window_ms = 300000
escalation_delay_ms = 900000
escalation_policy = "once"
channel_timeout_ms = 5000
max_audit_records = 1000
log_level = "info"
# switch_webhook_url = "https://deploy.internal/hooks/region-switch"

# [[webhook_channels]]
# name = "pager"
# url = "https://events.pager.example.com/v2/enqueue"

[severity_channel_policy]
info = []
warning = ["chat"]
error = ["chat", "email"]
critical = ["chat", "email", "pager"]

[[regions]]
id = "us-east-1"
display_name = "US East"
role = "primary"

[regions.probe_endpoints]
datastore = "postgres://db.us-east-1.internal:5432"
cache = "redis://cache.us-east-1.internal:6379"
http = "https://api.us-east-1.example.com/healthz"

[[regions]]
id = "us-west-2"
display_name = "US West"
role = "candidate"

[[regions]]
id = "eu-west-1"
display_name = "EU West"
role = "candidate"
"#;
