pub mod catalog;
pub mod channels;
pub mod dedup;
pub mod dispatcher;
pub mod escalation;

pub use channels::*;
pub use dedup::*;
pub use dispatcher::*;
pub use escalation::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Alert severity. Declaration order is the total order used for dedup and
/// escalation: `Info < Warning < Error < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    pub const ALL: [AlertSeverity; 4] = [
        AlertSeverity::Info,
        AlertSeverity::Warning,
        AlertSeverity::Error,
        AlertSeverity::Critical,
    ];

    /// One level up; Critical saturates.
    pub fn promote(self) -> Self {
        match self {
            AlertSeverity::Info => AlertSeverity::Warning,
            AlertSeverity::Warning => AlertSeverity::Error,
            AlertSeverity::Error | AlertSeverity::Critical => AlertSeverity::Critical,
        }
    }

    /// Error and Critical alerts are re-raised if left unresolved.
    pub fn is_escalatable(self) -> bool {
        self >= AlertSeverity::Error
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Error => "error",
            AlertSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single alert flowing through dedup, escalation and dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSignal {
    pub key: String,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub metadata: HashMap<String, String>,
    pub target_tenant: Option<String>,
    pub escalated: bool,
    pub raised_at: DateTime<Utc>,
}

impl AlertSignal {
    pub fn new(
        key: impl Into<String>,
        severity: AlertSeverity,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            severity,
            title: title.into(),
            message: message.into(),
            metadata: HashMap::new(),
            target_tenant: None,
            escalated: false,
            raised_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }

    pub fn for_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.target_tenant = Some(tenant.into());
        self
    }

    /// Copy of this signal one severity level higher, marked as escalated.
    pub fn escalate(&self, unresolved_for_ms: u64) -> Self {
        let mut escalated = self.clone();
        escalated.severity = self.severity.promote();
        escalated.escalated = true;
        escalated.message = format!(
            "[ESCALATED after {}s unresolved] {}",
            unresolved_for_ms / 1000,
            self.message
        );
        escalated
            .metadata
            .insert("escalated".to_string(), "true".to_string());
        escalated
            .metadata
            .insert("escalated_from".to_string(), self.severity.to_string());
        escalated.raised_at = Utc::now();
        escalated
    }
}

/// Outbound notification transport (chat webhook, SMTP, pager API, ...).
///
/// `Ok(false)` means the transport rejected the alert; `Err` means the send
/// itself failed. Both are treated as a failed delivery for that channel only.
#[async_trait]
pub trait NotificationChannel: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;
    async fn send(&self, signal: &AlertSignal) -> anyhow::Result<bool>;
}

/// Static severity -> channel-name routing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityChannelPolicy {
    #[serde(default)]
    pub info: Vec<String>,
    #[serde(default)]
    pub warning: Vec<String>,
    #[serde(default)]
    pub error: Vec<String>,
    #[serde(default)]
    pub critical: Vec<String>,
}

impl Default for SeverityChannelPolicy {
    fn default() -> Self {
        Self {
            info: Vec::new(),
            warning: vec!["chat".to_string()],
            error: vec!["chat".to_string(), "email".to_string()],
            critical: vec![
                "chat".to_string(),
                "email".to_string(),
                "pager".to_string(),
            ],
        }
    }
}

impl SeverityChannelPolicy {
    pub fn channels_for(&self, severity: AlertSeverity) -> &[String] {
        match severity {
            AlertSeverity::Info => &self.info,
            AlertSeverity::Warning => &self.warning,
            AlertSeverity::Error => &self.error,
            AlertSeverity::Critical => &self.critical,
        }
    }

    /// Every channel name referenced anywhere in the table.
    pub fn referenced_channels(&self) -> Vec<&str> {
        let mut names: Vec<&str> = AlertSeverity::ALL
            .iter()
            .flat_map(|s| self.channels_for(*s).iter().map(String::as_str))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}
