use super::{AlertSeverity, AlertSignal, NotificationChannel};
use async_trait::async_trait;
use tracing::{error, info, warn};

/// Channel that renders alerts into the process log.
///
/// Useful as the only transport in development and drills, or alongside real
/// transports so every dispatched alert also lands in the structured log.
#[derive(Debug, Clone)]
pub struct LogChannel {
    name: String,
}

impl LogChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn render(&self, signal: &AlertSignal) -> String {
        let action = if signal.escalated { "ESCALATED" } else { "TRIGGERED" };
        let tenant = signal
            .target_tenant
            .as_deref()
            .map(|t| format!(" tenant={t}"))
            .unwrap_or_default();
        format!(
            "[ALERT {} via {}] {} - {}{}",
            action, self.name, signal.title, signal.message, tenant
        )
    }
}

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, signal: &AlertSignal) -> anyhow::Result<bool> {
        let line = self.render(signal);
        match signal.severity {
            AlertSeverity::Critical | AlertSeverity::Error => {
                error!(alert_key = %signal.key, "{}", line)
            }
            AlertSeverity::Warning => warn!(alert_key = %signal.key, "{}", line),
            AlertSeverity::Info => info!(alert_key = %signal.key, "{}", line),
        }
        Ok(true)
    }
}
