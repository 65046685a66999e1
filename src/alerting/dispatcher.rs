use super::{
    AlertDeduplicator, AlertSeverity, AlertSignal, DedupDecision, EscalationScheduler,
    NotificationChannel, SeverityChannelPolicy,
};
use crate::error::SentinelError;
use crate::monitoring::SentinelMetrics;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Result of one channel send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDelivery {
    pub channel: String,
    pub delivered: bool,
    pub error: Option<String>,
}

/// Audit entry: what was sent, to whom, and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub id: Uuid,
    pub alert_key: String,
    pub severity: AlertSeverity,
    pub title: String,
    pub escalated: bool,
    pub target_tenant: Option<String>,
    pub reason: String,
    pub deliveries: Vec<ChannelDelivery>,
    pub escalation_scheduled: bool,
    pub dispatched_at: DateTime<Utc>,
}

impl DispatchRecord {
    pub fn delivered_to(&self) -> Vec<&str> {
        self.deliveries
            .iter()
            .filter(|d| d.delivered)
            .map(|d| d.channel.as_str())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Suppressed { stored: AlertSeverity },
    Dispatched(DispatchRecord),
}

impl DispatchOutcome {
    pub fn is_dispatched(&self) -> bool {
        matches!(self, DispatchOutcome::Dispatched(_))
    }
}

/// Fans alerts out to notification channels according to the severity policy.
#[derive(Debug)]
pub struct AlertDispatcher {
    deduplicator: Arc<AlertDeduplicator>,
    scheduler: Arc<EscalationScheduler>,
    channels: Vec<Arc<dyn NotificationChannel>>,
    policy: SeverityChannelPolicy,
    channel_timeout: Duration,
    audit_log: RwLock<VecDeque<DispatchRecord>>,
    max_audit_records: usize,
    metrics: Arc<SentinelMetrics>,
}

impl AlertDispatcher {
    pub fn new(
        deduplicator: Arc<AlertDeduplicator>,
        scheduler: Arc<EscalationScheduler>,
        channels: Vec<Arc<dyn NotificationChannel>>,
        policy: SeverityChannelPolicy,
        metrics: Arc<SentinelMetrics>,
    ) -> Self {
        for name in policy.referenced_channels() {
            if !channels.iter().any(|c| c.name() == name) {
                warn!(channel = %name, "Severity policy references a channel that is not configured");
            }
        }

        Self {
            deduplicator,
            scheduler,
            channels,
            policy,
            channel_timeout: Duration::from_secs(5),
            audit_log: RwLock::new(VecDeque::new()),
            max_audit_records: 1000,
            metrics,
        }
    }

    pub fn with_channel_timeout(mut self, timeout: Duration) -> Self {
        self.channel_timeout = timeout;
        self
    }

    pub fn with_max_audit_records(mut self, max: usize) -> Self {
        self.max_audit_records = max.max(1);
        self
    }

    /// Run `signal` through dedup, fan-out and escalation scheduling.
    #[instrument(skip(self, signal), fields(alert_key = %signal.key, severity = %signal.severity))]
    pub async fn dispatch(self: &Arc<Self>, signal: AlertSignal) -> DispatchOutcome {
        let decision = if signal.escalated {
            self.deduplicator.record_escalation(&signal.key, signal.severity)
        } else {
            self.deduplicator.evaluate(&signal.key, signal.severity)
        };
        if let DedupDecision::Suppressed { stored } = decision {
            self.metrics.alerts_suppressed_total.inc();
            return DispatchOutcome::Suppressed { stored };
        }

        let deliveries = join_all(
            self.policy
                .channels_for(signal.severity)
                .iter()
                .map(|name| self.deliver(name, &signal)),
        )
        .await;

        let escalation_scheduled = signal.severity.is_escalatable()
            && self.scheduler.schedule(&signal, Arc::downgrade(self));

        let record = DispatchRecord {
            id: Uuid::new_v4(),
            alert_key: signal.key.clone(),
            severity: signal.severity,
            title: signal.title.clone(),
            escalated: signal.escalated,
            target_tenant: signal.target_tenant.clone(),
            reason: Self::describe(decision, signal.escalated),
            deliveries,
            escalation_scheduled,
            dispatched_at: Utc::now(),
        };

        self.metrics.record_dispatch(signal.severity.as_str());
        info!(
            alert_id = %record.id,
            delivered = ?record.delivered_to(),
            reason = %record.reason,
            escalation_scheduled,
            "Dispatched alert: {}",
            signal.title
        );

        self.push_audit(record.clone()).await;
        DispatchOutcome::Dispatched(record)
    }

    /// Resolution path: stop escalating `key` and forget its dedup record.
    pub fn resolve(&self, key: &str) -> bool {
        let cancelled = self.scheduler.cancel_escalation(key);
        let cleared = self.deduplicator.clear(key);
        cancelled || cleared
    }

    async fn deliver(&self, name: &str, signal: &AlertSignal) -> ChannelDelivery {
        let Some(channel) = self.channels.iter().find(|c| c.name() == name) else {
            self.metrics.record_channel_failure(name);
            return ChannelDelivery {
                channel: name.to_string(),
                delivered: false,
                error: Some("channel not configured".to_string()),
            };
        };

        let send = AssertUnwindSafe(tokio::time::timeout(
            self.channel_timeout,
            channel.send(signal),
        ))
        .catch_unwind();

        let error = match send.await {
            Ok(Ok(Ok(true))) => None,
            Ok(Ok(Ok(false))) => Some("rejected by channel".to_string()),
            Ok(Ok(Err(e))) => Some(e.to_string()),
            Ok(Err(_)) => Some(format!(
                "timed out after {}ms",
                self.channel_timeout.as_millis()
            )),
            Err(_) => Some("channel panicked".to_string()),
        };

        if let Some(reason) = &error {
            self.metrics.record_channel_failure(name);
            let failure = SentinelError::Dispatch {
                channel: name.to_string(),
                reason: reason.clone(),
            };
            error!(alert_key = %signal.key, "{}", failure);
        }

        ChannelDelivery {
            channel: name.to_string(),
            delivered: error.is_none(),
            error,
        }
    }

    fn describe(decision: DedupDecision, escalated: bool) -> String {
        let base = match decision {
            DedupDecision::New => "new alert".to_string(),
            DedupDecision::Expired => "dedup window expired".to_string(),
            DedupDecision::SeverityIncreased { previous } => {
                format!("severity increased from {previous}")
            }
            DedupDecision::Suppressed { stored } => format!("suppressed by {stored}"),
            DedupDecision::Escalation { previous: Some(previous) } => {
                format!("unresolved since {previous}")
            }
            DedupDecision::Escalation { previous: None } => "unresolved".to_string(),
        };
        if escalated {
            format!("{base} (escalation)")
        } else {
            base
        }
    }

    async fn push_audit(&self, record: DispatchRecord) {
        let mut log = self.audit_log.write().await;
        while log.len() >= self.max_audit_records {
            log.pop_front();
        }
        log.push_back(record);
    }

    /// Most recent dispatch records, newest first.
    pub async fn audit_log(&self, limit: Option<usize>) -> Vec<DispatchRecord> {
        let log = self.audit_log.read().await;
        let records = log.iter().rev().cloned();
        match limit {
            Some(limit) => records.take(limit).collect(),
            None => records.collect(),
        }
    }

    pub fn deduplicator(&self) -> &Arc<AlertDeduplicator> {
        &self.deduplicator
    }

    pub fn scheduler(&self) -> &Arc<EscalationScheduler> {
        &self.scheduler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::EscalationPolicy;
    use crate::drill::RecordingChannel;

    fn dispatcher_with(
        channels: Vec<Arc<dyn NotificationChannel>>,
        escalation_delay: Duration,
    ) -> Arc<AlertDispatcher> {
        let metrics = Arc::new(SentinelMetrics::new().unwrap());
        let dedup = Arc::new(AlertDeduplicator::new(Duration::from_secs(300)));
        let scheduler = Arc::new(EscalationScheduler::new(
            escalation_delay,
            EscalationPolicy::Once,
            metrics.clone(),
        ));
        Arc::new(
            AlertDispatcher::new(
                dedup,
                scheduler,
                channels,
                SeverityChannelPolicy::default(),
                metrics,
            )
            .with_channel_timeout(Duration::from_millis(500)),
        )
    }

    #[tokio::test]
    async fn test_routes_by_severity() {
        let chat = RecordingChannel::new("chat");
        let email = RecordingChannel::new("email");
        let pager = RecordingChannel::new("pager");
        let dispatcher = dispatcher_with(
            vec![chat.clone(), email.clone(), pager.clone()],
            Duration::from_secs(600),
        );

        dispatcher
            .dispatch(AlertSignal::new("w", AlertSeverity::Warning, "warn", "w"))
            .await;
        dispatcher
            .dispatch(AlertSignal::new("c", AlertSeverity::Critical, "crit", "c"))
            .await;

        assert_eq!(chat.count().await, 2);
        assert_eq!(email.count().await, 1);
        assert_eq!(pager.count().await, 1);
    }

    #[tokio::test]
    async fn test_suppressed_alert_touches_nothing() {
        let chat = RecordingChannel::new("chat");
        let dispatcher = dispatcher_with(vec![chat.clone()], Duration::from_secs(600));

        let first = dispatcher
            .dispatch(AlertSignal::new("k", AlertSeverity::Warning, "t", "m"))
            .await;
        let second = dispatcher
            .dispatch(AlertSignal::new("k", AlertSeverity::Warning, "t", "m"))
            .await;

        assert!(first.is_dispatched());
        assert!(matches!(
            second,
            DispatchOutcome::Suppressed {
                stored: AlertSeverity::Warning
            }
        ));
        assert_eq!(chat.count().await, 1);
        assert_eq!(dispatcher.audit_log(None).await.len(), 1);
    }

    #[tokio::test]
    async fn test_failing_channel_does_not_block_siblings() {
        let chat = RecordingChannel::new("chat");
        let email = RecordingChannel::failing("email");
        let pager = RecordingChannel::rejecting("pager");
        let dispatcher = dispatcher_with(
            vec![chat.clone(), email.clone(), pager.clone()],
            Duration::from_secs(600),
        );

        let outcome = dispatcher
            .dispatch(AlertSignal::new("x", AlertSeverity::Critical, "t", "m"))
            .await;

        let DispatchOutcome::Dispatched(record) = outcome else {
            panic!("critical alert should dispatch");
        };
        assert_eq!(record.delivered_to(), vec!["chat"]);
        assert_eq!(record.deliveries.len(), 3);
        assert!(record.escalation_scheduled);
        assert_eq!(chat.count().await, 1);
    }

    #[tokio::test]
    async fn test_unconfigured_channel_recorded_as_failure() {
        let chat = RecordingChannel::new("chat");
        let dispatcher = dispatcher_with(vec![chat.clone()], Duration::from_secs(600));

        let outcome = dispatcher
            .dispatch(AlertSignal::new("e", AlertSeverity::Error, "t", "m"))
            .await;
        let DispatchOutcome::Dispatched(record) = outcome else {
            panic!("error alert should dispatch");
        };
        let email = record
            .deliveries
            .iter()
            .find(|d| d.channel == "email")
            .unwrap();
        assert!(!email.delivered);
        assert_eq!(email.error.as_deref(), Some("channel not configured"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_escalates_once_to_critical() {
        let chat = RecordingChannel::new("chat");
        let pager = RecordingChannel::new("pager");
        let dispatcher = dispatcher_with(
            vec![chat.clone(), pager.clone()],
            Duration::from_secs(60),
        );

        dispatcher
            .dispatch(AlertSignal::new("err.rate", AlertSeverity::Error, "errors", "5xx"))
            .await;
        assert!(dispatcher.scheduler().is_scheduled("err.rate"));

        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::time::sleep(Duration::from_secs(300)).await;

        let paged = pager.received().await;
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].severity, AlertSeverity::Critical);
        assert!(paged[0].escalated);
        assert!(!dispatcher.scheduler().is_scheduled("err.rate"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_delay_prevents_escalation() {
        let pager = RecordingChannel::new("pager");
        let dispatcher = dispatcher_with(vec![pager.clone()], Duration::from_secs(60));

        dispatcher
            .dispatch(AlertSignal::new("err.rate", AlertSeverity::Error, "errors", "5xx"))
            .await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(dispatcher.resolve("err.rate"));
        assert!(!dispatcher.resolve("err.rate"));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(pager.count().await, 0);
    }

    #[tokio::test]
    async fn test_audit_log_is_bounded() {
        let chat = RecordingChannel::new("chat");
        let metrics = Arc::new(SentinelMetrics::new().unwrap());
        let dispatcher = Arc::new(
            AlertDispatcher::new(
                Arc::new(AlertDeduplicator::new(Duration::from_secs(300))),
                Arc::new(EscalationScheduler::new(
                    Duration::from_secs(600),
                    EscalationPolicy::Once,
                    metrics.clone(),
                )),
                vec![chat],
                SeverityChannelPolicy::default(),
                metrics,
            )
            .with_max_audit_records(3),
        );

        for i in 0..5 {
            dispatcher
                .dispatch(AlertSignal::new(format!("k{i}"), AlertSeverity::Warning, "t", "m"))
                .await;
        }

        let log = dispatcher.audit_log(None).await;
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].alert_key, "k4");
        assert_eq!(dispatcher.audit_log(Some(1)).await.len(), 1);
    }
}
