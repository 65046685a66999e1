use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;
use tracing::error;

/// Prometheus metrics for the control plane
pub struct SentinelMetrics {
    registry: Arc<Registry>,

    // Health pass metrics
    pub health_passes_total: IntCounter,
    pub health_passes_skipped_total: IntCounter,
    pub probe_failures_total: IntCounter,

    // Failover metrics
    pub failovers_total: IntCounter,
    pub failbacks_total: IntCounter,
    pub switch_failures_total: IntCounter,
    pub failed_over: IntGauge,

    // Alert pipeline metrics
    pub alerts_dispatched_total: IntCounterVec,
    pub alerts_suppressed_total: IntCounter,
    pub channel_failures_total: IntCounterVec,
    pub escalations_fired_total: IntCounter,
    pub escalations_pending: IntGauge,
}

impl std::fmt::Debug for SentinelMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentinelMetrics")
            .field("health_passes_total", &self.health_passes_total.get())
            .field("failovers_total", &self.failovers_total.get())
            .finish_non_exhaustive()
    }
}

impl SentinelMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Arc::new(Registry::new());

        let health_passes_total = IntCounter::with_opts(Opts::new(
            "sentinel_health_passes_total",
            "Total number of completed region health passes",
        ))?;
        registry.register(Box::new(health_passes_total.clone()))?;

        let health_passes_skipped_total = IntCounter::with_opts(Opts::new(
            "sentinel_health_passes_skipped_total",
            "Health pass ticks skipped because a pass was still running",
        ))?;
        registry.register(Box::new(health_passes_skipped_total.clone()))?;

        let probe_failures_total = IntCounter::with_opts(Opts::new(
            "sentinel_probe_failures_total",
            "Probes that timed out or returned an error",
        ))?;
        registry.register(Box::new(probe_failures_total.clone()))?;

        let failovers_total = IntCounter::with_opts(Opts::new(
            "sentinel_failovers_total",
            "Committed failovers away from the active region",
        ))?;
        registry.register(Box::new(failovers_total.clone()))?;

        let failbacks_total = IntCounter::with_opts(Opts::new(
            "sentinel_failbacks_total",
            "Committed failbacks to the original primary",
        ))?;
        registry.register(Box::new(failbacks_total.clone()))?;

        let switch_failures_total = IntCounter::with_opts(Opts::new(
            "sentinel_switch_failures_total",
            "Region switch hook invocations that returned an error",
        ))?;
        registry.register(Box::new(switch_failures_total.clone()))?;

        let failed_over = IntGauge::with_opts(Opts::new(
            "sentinel_failed_over",
            "1 while traffic is served from a failover region",
        ))?;
        registry.register(Box::new(failed_over.clone()))?;

        let alerts_dispatched_total = IntCounterVec::new(
            Opts::new(
                "sentinel_alerts_dispatched_total",
                "Alerts that passed dedup and were fanned out",
            ),
            &["severity"],
        )?;
        registry.register(Box::new(alerts_dispatched_total.clone()))?;

        let alerts_suppressed_total = IntCounter::with_opts(Opts::new(
            "sentinel_alerts_suppressed_total",
            "Alerts suppressed as duplicates inside the dedup window",
        ))?;
        registry.register(Box::new(alerts_suppressed_total.clone()))?;

        let channel_failures_total = IntCounterVec::new(
            Opts::new(
                "sentinel_channel_failures_total",
                "Failed channel deliveries",
            ),
            &["channel"],
        )?;
        registry.register(Box::new(channel_failures_total.clone()))?;

        let escalations_fired_total = IntCounter::with_opts(Opts::new(
            "sentinel_escalations_fired_total",
            "Escalation timers that fired and re-raised an alert",
        ))?;
        registry.register(Box::new(escalations_fired_total.clone()))?;

        let escalations_pending = IntGauge::with_opts(Opts::new(
            "sentinel_escalations_pending",
            "Escalation timers currently scheduled",
        ))?;
        registry.register(Box::new(escalations_pending.clone()))?;

        Ok(Self {
            registry,
            health_passes_total,
            health_passes_skipped_total,
            probe_failures_total,
            failovers_total,
            failbacks_total,
            switch_failures_total,
            failed_over,
            alerts_dispatched_total,
            alerts_suppressed_total,
            channel_failures_total,
            escalations_fired_total,
            escalations_pending,
        })
    }

    pub fn record_dispatch(&self, severity: &str) {
        self.alerts_dispatched_total
            .with_label_values(&[severity])
            .inc();
    }

    pub fn record_channel_failure(&self, channel: &str) {
        self.channel_failures_total
            .with_label_values(&[channel])
            .inc();
    }

    pub fn dispatched_count(&self, severity: &str) -> u64 {
        self.alerts_dispatched_total
            .with_label_values(&[severity])
            .get()
    }

    /// Get metrics in Prometheus format
    pub fn gather_metrics(&self) -> String {
        use prometheus::TextEncoder;
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_else(|e| {
                error!("Failed to encode metrics: {}", e);
                String::new()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = SentinelMetrics::new().unwrap();
        assert_eq!(metrics.health_passes_total.get(), 0);
        assert_eq!(metrics.failed_over.get(), 0);
    }

    #[test]
    fn test_labelled_counters() {
        let metrics = SentinelMetrics::new().unwrap();
        metrics.record_dispatch("critical");
        metrics.record_dispatch("critical");
        metrics.record_channel_failure("pager");

        assert_eq!(metrics.dispatched_count("critical"), 2);
        assert_eq!(metrics.dispatched_count("warning"), 0);

        let text = metrics.gather_metrics();
        assert!(text.contains("sentinel_alerts_dispatched_total"));
        assert!(text.contains("pager"));
    }
}
