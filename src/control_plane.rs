use crate::alerting::{
    AlertDeduplicator, AlertDispatcher, AlertSignal, DispatchOutcome, DispatchRecord,
    EscalationScheduler, NotificationChannel,
};
use crate::config::ControlPlaneConfig;
use crate::error::{Result, SentinelError};
use crate::monitoring::{ControlPlaneStatus, SentinelMetrics};
use crate::region::{
    FailoverController, FailoverDecision, FailoverPolicy, FailoverState, HealthProbe, PassOutcome,
    RegionHealthMonitor, RegionSwitchExecutor,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Wires the health monitor, failover controller and alert pipeline together
/// from one configuration, and owns their background tasks.
#[derive(Debug)]
pub struct ControlPlane {
    config: ControlPlaneConfig,
    metrics: Arc<SentinelMetrics>,
    dispatcher: Arc<AlertDispatcher>,
    controller: Arc<FailoverController>,
    monitor: Arc<RegionHealthMonitor>,
    housekeeping: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl ControlPlane {
    pub fn new(
        config: ControlPlaneConfig,
        probes: Vec<Arc<dyn HealthProbe>>,
        channels: Vec<Arc<dyn NotificationChannel>>,
        executor: Arc<dyn RegionSwitchExecutor>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| SentinelError::Configuration(e.to_string()))?;

        let metrics = Arc::new(
            SentinelMetrics::new().map_err(|e| SentinelError::Metrics(e.to_string()))?,
        );

        let deduplicator = Arc::new(AlertDeduplicator::new(config.dedup_window()));
        let scheduler = Arc::new(EscalationScheduler::new(
            config.escalation_delay(),
            config.escalation_policy,
            metrics.clone(),
        ));
        let dispatcher = Arc::new(
            AlertDispatcher::new(
                deduplicator,
                scheduler,
                channels,
                config.severity_channel_policy.clone(),
                metrics.clone(),
            )
            .with_channel_timeout(config.channel_timeout())
            .with_max_audit_records(config.max_audit_records),
        );

        let controller = Arc::new(FailoverController::new(
            config.regions.clone(),
            FailoverPolicy::from(&config),
            executor,
            dispatcher.clone(),
            metrics.clone(),
        )?);

        let monitor = Arc::new(
            RegionHealthMonitor::new(
                config.regions.clone(),
                probes,
                controller.clone(),
                dispatcher.clone(),
                metrics.clone(),
            )
            .with_interval(config.health_check_interval())
            .with_probe_timeout(config.health_check_timeout()),
        );

        Ok(Self {
            config,
            metrics,
            dispatcher,
            controller,
            monitor,
            housekeeping: Mutex::new(None),
        })
    }

    /// Start periodic health checks and dedup housekeeping. Idempotent.
    pub async fn start(&self) {
        info!("🚀 Starting region sentinel control plane");
        self.monitor.start().await;

        let mut housekeeping = self.housekeeping.lock().await;
        if housekeeping.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let cancel = token.clone();
        let deduplicator = self.dispatcher.deduplicator().clone();
        let period = self.config.dedup_window().max(std::time::Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // first tick completes immediately; nothing can have expired yet
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = deduplicator.purge_expired();
                        if purged > 0 {
                            debug!(purged, "Purged expired dedup records");
                        }
                    }
                }
            }
        });
        *housekeeping = Some((token, handle));
        info!("✅ Control plane started");
    }

    /// Stop background work and cancel every pending escalation. Idempotent.
    pub async fn shutdown(&self) {
        info!("🛑 Shutting down control plane...");
        self.monitor.stop().await;

        if let Some((token, handle)) = self.housekeeping.lock().await.take() {
            token.cancel();
            if let Err(e) = handle.await {
                warn!("Dedup housekeeping task ended abnormally: {}", e);
            }
        }

        let cancelled = self.dispatcher.scheduler().cancel_all();
        if cancelled > 0 {
            info!(cancelled, "Cancelled pending escalations");
        }
        info!("🎉 Control plane shut down");
    }

    /// Run one health pass immediately, outside the interval loop.
    pub async fn trigger_health_check(&self) -> PassOutcome {
        self.monitor.perform_health_checks().await
    }

    /// Approve a pending manual failover, re-checked against current health.
    pub async fn approve_failover(&self) -> Result<FailoverDecision> {
        let snapshot = self.monitor.snapshot().await;
        self.controller.approve_failover(&snapshot).await
    }

    /// Route an application alert through dedup, channels and escalation.
    pub async fn raise_alert(&self, signal: AlertSignal) -> DispatchOutcome {
        self.dispatcher.dispatch(signal).await
    }

    /// Mark the condition behind `key` as resolved.
    pub fn resolve_alert(&self, key: &str) -> bool {
        self.dispatcher.resolve(key)
    }

    pub fn cancel_escalation(&self, key: &str) -> bool {
        self.dispatcher.scheduler().cancel_escalation(key)
    }

    pub async fn failover_state(&self) -> FailoverState {
        self.controller.get_status().await
    }

    pub async fn status(&self) -> ControlPlaneStatus {
        let health = self.monitor.snapshot().await;
        let state = self.controller.get_status().await;
        ControlPlaneStatus::assemble(
            self.monitor.regions(),
            &health,
            &state,
            self.controller.pending_target().await,
            self.dispatcher.deduplicator().counts_by_severity(),
            self.dispatcher.scheduler().pending_count(),
            self.monitor.is_running().await,
        )
    }

    pub async fn status_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.status().await)?)
    }

    pub async fn audit_log(&self, limit: Option<usize>) -> Vec<DispatchRecord> {
        self.dispatcher.audit_log(limit).await
    }

    /// Prometheus text exposition of all control plane metrics.
    pub fn metrics_text(&self) -> String {
        self.metrics.gather_metrics()
    }

    pub fn metrics(&self) -> &Arc<SentinelMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &ControlPlaneConfig {
        &self.config
    }
}
