use super::{quorum_met, FailoverController, FailoverDecision, HealthProbe, Region, RegionHealthStatus};
use crate::alerting::{catalog, AlertDispatcher};
use crate::error::SentinelError;
use crate::monitoring::SentinelMetrics;
use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Result of a single health pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Completed(FailoverDecision),
    /// A previous pass was still running.
    Skipped,
}

/// Resets the in-progress flag even if the pass panics.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct MonitorTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Periodically probes every region and hands the snapshot to the
/// failover controller.
#[derive(Debug)]
pub struct RegionHealthMonitor {
    regions: Vec<Region>,
    probes: Vec<Arc<dyn HealthProbe>>,
    health: Arc<RwLock<HashMap<String, RegionHealthStatus>>>,
    controller: Arc<FailoverController>,
    dispatcher: Arc<AlertDispatcher>,
    metrics: Arc<SentinelMetrics>,
    interval: Duration,
    probe_timeout: Duration,
    outage_threshold: u32,
    pass_in_progress: AtomicBool,
    task: Mutex<Option<MonitorTask>>,
}

impl std::fmt::Debug for MonitorTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorTask")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}

impl RegionHealthMonitor {
    pub fn new(
        regions: Vec<Region>,
        probes: Vec<Arc<dyn HealthProbe>>,
        controller: Arc<FailoverController>,
        dispatcher: Arc<AlertDispatcher>,
        metrics: Arc<SentinelMetrics>,
    ) -> Self {
        let health = regions
            .iter()
            .map(|r| (r.id.clone(), RegionHealthStatus::unchecked(r.id.clone())))
            .collect();
        let outage_threshold = controller.policy().max_consecutive_failures;

        if probes.is_empty() {
            warn!("No health probes configured; every region will report unhealthy");
        }

        Self {
            regions,
            probes,
            health: Arc::new(RwLock::new(health)),
            controller,
            dispatcher,
            metrics,
            interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            outage_threshold,
            pass_in_progress: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Probe all regions, update their health, then evaluate failover.
    ///
    /// Returns `Skipped` without probing if another pass is still running.
    #[instrument(skip(self))]
    pub async fn perform_health_checks(&self) -> PassOutcome {
        if self
            .pass_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.metrics.health_passes_skipped_total.inc();
            debug!("Health pass already running, skipping");
            return PassOutcome::Skipped;
        }
        let _guard = PassGuard(&self.pass_in_progress);

        let results = join_all(self.regions.iter().map(|region| self.check_region(region))).await;
        let checked_at = Utc::now();

        let mut outages = Vec::new();
        let snapshot = {
            let mut health = self.health.write().await;
            for (region_id, healthy) in results {
                let status = health
                    .entry(region_id.clone())
                    .or_insert_with(|| RegionHealthStatus::unchecked(region_id.clone()));
                status.record_pass(healthy, checked_at);
                if !healthy && status.consecutive_failures == self.outage_threshold {
                    outages.push((region_id, status.consecutive_failures));
                }
            }
            health.clone()
        };
        self.metrics.health_passes_total.inc();

        for (region_id, failures) in outages {
            self.dispatcher
                .dispatch(catalog::region_outage(&region_id, failures))
                .await;
        }

        PassOutcome::Completed(self.controller.evaluate(&snapshot).await)
    }

    /// Run every probe for `region` concurrently and apply the quorum rule.
    async fn check_region(&self, region: &Region) -> (String, bool) {
        let outcomes = join_all(self.probes.iter().map(|probe| self.run_probe(probe, region))).await;
        let successes = outcomes.iter().filter(|ok| **ok).count();
        let healthy = quorum_met(successes, outcomes.len());

        debug!(
            region = %region.id,
            successes,
            total = outcomes.len(),
            healthy,
            "Region probe results"
        );
        (region.id.clone(), healthy)
    }

    /// A probe that errors, panics or exceeds the timeout counts as failed.
    async fn run_probe(&self, probe: &Arc<dyn HealthProbe>, region: &Region) -> bool {
        let check = AssertUnwindSafe(tokio::time::timeout(self.probe_timeout, probe.check(region)))
            .catch_unwind();

        let failure = match check.await {
            Ok(Ok(Ok(true))) => return true,
            Ok(Ok(Ok(false))) => "reported unhealthy".to_string(),
            Ok(Ok(Err(e))) => format!("error: {e}"),
            Ok(Err(_)) => format!("timed out after {}ms", self.probe_timeout.as_millis()),
            Err(_) => "panicked".to_string(),
        };

        self.metrics.probe_failures_total.inc();
        let failure = SentinelError::Probe {
            probe: probe.name().to_string(),
            region: region.id.clone(),
            reason: failure,
        };
        warn!("{}", failure);
        false
    }

    /// Start the interval loop. Calling start on a running monitor is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            debug!("Region health monitor already running");
            return;
        }

        info!(
            interval_ms = self.interval.as_millis() as u64,
            probe_timeout_ms = self.probe_timeout.as_millis() as u64,
            regions = self.regions.len(),
            probes = self.probes.len(),
            "Starting region health monitor"
        );

        let cancel = CancellationToken::new();
        let monitor = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                // A started pass always runs to completion, so a cutover the
                // switch hook has accepted is committed or alerted before stop returns.
                let pass = AssertUnwindSafe(monitor.perform_health_checks()).catch_unwind();
                if pass.await.is_err() {
                    error!("Region health pass panicked");
                    monitor.dispatcher.dispatch(catalog::health_pass_panicked()).await;
                }
            }
            info!("Region health monitor stopped");
        });

        *task = Some(MonitorTask { cancel, handle });
    }

    /// Stop the interval loop and wait for it to exit. A pass already in
    /// flight finishes first; its probes and channels are bounded by their
    /// timeouts. Idempotent.
    pub async fn stop(&self) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };
        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            if !e.is_cancelled() {
                error!("Region health monitor task failed: {}", e);
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Copy of the current per-region health table.
    pub async fn snapshot(&self) -> HashMap<String, RegionHealthStatus> {
        self.health.read().await.clone()
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::{
        AlertDeduplicator, EscalationPolicy, EscalationScheduler, SeverityChannelPolicy,
    };
    use crate::drill::{RecordingChannel, ScriptedExecutor, ScriptedProbe, StaticProbe};
    use crate::region::{FailoverPhase, FailoverPolicy};
    use chrono::Duration as ChronoDuration;

    fn build(probes: Vec<Arc<dyn HealthProbe>>, max_failures: u32) -> Arc<RegionHealthMonitor> {
        build_with(probes, max_failures, ScriptedExecutor::succeeding())
    }

    fn build_with(
        probes: Vec<Arc<dyn HealthProbe>>,
        max_failures: u32,
        executor: Arc<ScriptedExecutor>,
    ) -> Arc<RegionHealthMonitor> {
        let metrics = Arc::new(SentinelMetrics::new().unwrap());
        let dispatcher = Arc::new(AlertDispatcher::new(
            Arc::new(AlertDeduplicator::new(Duration::from_secs(300))),
            Arc::new(EscalationScheduler::new(
                Duration::from_secs(3600),
                EscalationPolicy::Once,
                metrics.clone(),
            )),
            vec![RecordingChannel::new("chat")],
            SeverityChannelPolicy::default(),
            metrics.clone(),
        ));
        let regions = vec![Region::primary("p", "Primary"), Region::candidate("a", "A")];
        let controller = Arc::new(
            FailoverController::new(
                regions.clone(),
                FailoverPolicy {
                    max_consecutive_failures: max_failures,
                    auto_failover_enabled: true,
                    manual_failover_required: false,
                    failback_enabled: false,
                    failback_delay: ChronoDuration::milliseconds(0),
                },
                executor,
                dispatcher.clone(),
                metrics.clone(),
            )
            .unwrap(),
        );
        Arc::new(
            RegionHealthMonitor::new(regions, probes, controller, dispatcher, metrics)
                .with_interval(Duration::from_millis(10))
                .with_probe_timeout(Duration::from_millis(50)),
        )
    }

    #[tokio::test]
    async fn test_one_flaky_probe_keeps_region_healthy() {
        let monitor = build(
            vec![
                StaticProbe::healthy("datastore"),
                StaticProbe::healthy("cache"),
                StaticProbe::unhealthy("http"),
            ],
            3,
        );

        monitor.perform_health_checks().await;
        let snapshot = monitor.snapshot().await;
        assert!(snapshot["p"].healthy);
        assert_eq!(snapshot["p"].consecutive_failures, 0);
        assert!(snapshot["p"].last_checked_at.is_some());
    }

    #[tokio::test]
    async fn test_failures_increment_and_reset() {
        let datastore = ScriptedProbe::new("datastore");
        datastore.script("p", [false, false, true]).await;
        let cache = ScriptedProbe::new("cache");
        cache.script("p", [false, false, true]).await;
        let monitor = build(
            vec![datastore, cache, StaticProbe::healthy("http")],
            10,
        );

        monitor.perform_health_checks().await;
        monitor.perform_health_checks().await;
        let snapshot = monitor.snapshot().await;
        assert!(!snapshot["p"].healthy);
        assert_eq!(snapshot["p"].consecutive_failures, 2);
        assert!(snapshot["p"].last_failure_at.is_some());

        monitor.perform_health_checks().await;
        assert_eq!(monitor.snapshot().await["p"].consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_hanging_probe_times_out_as_failure() {
        let monitor = build(
            vec![
                StaticProbe::hanging("datastore"),
                StaticProbe::hanging("cache"),
                StaticProbe::healthy("http"),
            ],
            3,
        );

        let outcome = tokio::time::timeout(Duration::from_secs(2), monitor.perform_health_checks())
            .await
            .expect("pass must not hang");
        assert!(matches!(outcome, PassOutcome::Completed(_)));
        assert!(!monitor.snapshot().await["p"].healthy);
    }

    #[tokio::test]
    async fn test_overlapping_pass_is_skipped() {
        let monitor = build(
            vec![
                StaticProbe::slow("datastore", Duration::from_millis(30)),
                StaticProbe::healthy("cache"),
                StaticProbe::healthy("http"),
            ],
            3,
        );

        let (first, second) = tokio::join!(
            monitor.perform_health_checks(),
            monitor.perform_health_checks()
        );
        let skipped = [&first, &second]
            .iter()
            .filter(|o| ***o == PassOutcome::Skipped)
            .count();
        assert_eq!(skipped, 1);
        assert!(matches!(monitor.perform_health_checks().await, PassOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_start_stop_are_idempotent() {
        let monitor = build(vec![StaticProbe::healthy("datastore")], 3);

        monitor.start().await;
        monitor.start().await;
        assert!(monitor.is_running().await);

        tokio::time::sleep(Duration::from_millis(50)).await;
        monitor.stop().await;
        monitor.stop().await;
        assert!(!monitor.is_running().await);

        let passes = monitor.metrics.health_passes_total.get();
        assert!(passes >= 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(monitor.metrics.health_passes_total.get(), passes);
    }

    #[tokio::test]
    async fn test_interval_loop_drives_failover() {
        let probe = ScriptedProbe::new("datastore");
        probe.fail_region("p").await;
        let monitor = build(vec![probe], 2);

        monitor.start().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        monitor.stop().await;

        let state = monitor.controller.get_status().await;
        assert_eq!(state.phase(), FailoverPhase::FailedOver);
        assert_eq!(state.active_region_id, "a");
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_cutover() {
        let probe = ScriptedProbe::new("datastore");
        probe.fail_region("p").await;
        let executor = ScriptedExecutor::slow(Duration::from_millis(200));
        let monitor = build_with(vec![probe], 1, executor.clone());

        monitor.start().await;
        tokio::time::timeout(Duration::from_secs(2), async {
            while executor.invocations().await.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("cutover should be requested");
        monitor.stop().await;

        let state = monitor.controller.get_status().await;
        assert_eq!(state.phase(), FailoverPhase::FailedOver);
        assert_eq!(state.active_region_id, "a");
        assert_eq!(executor.invocations().await, vec!["a".to_string()]);
    }
}
