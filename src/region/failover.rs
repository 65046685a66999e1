use super::{Region, RegionHealthStatus, RegionRole, RegionSwitchExecutor};
use crate::alerting::{catalog, AlertDispatcher, AlertSignal};
use crate::config::ControlPlaneConfig;
use crate::error::{Result, SentinelError};
use crate::monitoring::SentinelMetrics;
use chrono::{DateTime, Duration, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailoverPhase {
    Stable,
    FailedOver,
}

/// Singleton failover state. `failover_started_at` is set iff failed over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverState {
    pub active_region_id: String,
    pub is_failed_over: bool,
    pub failover_started_at: Option<DateTime<Utc>>,
}

impl FailoverState {
    fn stable(active_region_id: impl Into<String>) -> Self {
        Self {
            active_region_id: active_region_id.into(),
            is_failed_over: false,
            failover_started_at: None,
        }
    }

    pub fn phase(&self) -> FailoverPhase {
        if self.is_failed_over {
            FailoverPhase::FailedOver
        } else {
            FailoverPhase::Stable
        }
    }
}

#[derive(Debug, Clone)]
pub struct FailoverPolicy {
    pub max_consecutive_failures: u32,
    pub auto_failover_enabled: bool,
    pub manual_failover_required: bool,
    pub failback_enabled: bool,
    pub failback_delay: Duration,
}

impl FailoverPolicy {
    pub fn requires_approval(&self) -> bool {
        !self.auto_failover_enabled || self.manual_failover_required
    }
}

impl From<&ControlPlaneConfig> for FailoverPolicy {
    fn from(config: &ControlPlaneConfig) -> Self {
        Self {
            max_consecutive_failures: config.max_consecutive_failures,
            auto_failover_enabled: config.auto_failover_enabled,
            manual_failover_required: config.manual_failover_required,
            failback_enabled: config.failback_enabled,
            failback_delay: Duration::milliseconds(config.failback_delay_ms as i64),
        }
    }
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailoverDecision {
    NoAction,
    FailedOver { from: String, to: String },
    FailedBack { from: String, to: String },
    ManualApprovalRequired { target: String },
    NoHealthyTarget,
    ExecutionFailed { target: String, error: String },
    ActiveRegionDegraded,
}

/// Decides failover and failback from health snapshots and drives the
/// region-switch hook. State is committed only after the hook succeeds.
#[derive(Debug)]
pub struct FailoverController {
    regions: Vec<Region>,
    primary_id: String,
    policy: FailoverPolicy,
    state: RwLock<FailoverState>,
    pending_target: RwLock<Option<String>>,
    evaluation: Mutex<()>,
    executor: Arc<dyn RegionSwitchExecutor>,
    dispatcher: Arc<AlertDispatcher>,
    metrics: Arc<SentinelMetrics>,
}

impl FailoverController {
    pub fn new(
        regions: Vec<Region>,
        policy: FailoverPolicy,
        executor: Arc<dyn RegionSwitchExecutor>,
        dispatcher: Arc<AlertDispatcher>,
        metrics: Arc<SentinelMetrics>,
    ) -> Result<Self> {
        let primary_id = regions
            .iter()
            .find(|r| r.role == RegionRole::Primary)
            .map(|r| r.id.clone())
            .ok_or_else(|| SentinelError::Configuration("no primary region configured".into()))?;

        Ok(Self {
            regions,
            state: RwLock::new(FailoverState::stable(primary_id.clone())),
            primary_id,
            policy,
            pending_target: RwLock::new(None),
            evaluation: Mutex::new(()),
            executor,
            dispatcher,
            metrics,
        })
    }

    /// Evaluate one health snapshot. Evaluations are serialized.
    pub async fn evaluate(&self, snapshot: &HashMap<String, RegionHealthStatus>) -> FailoverDecision {
        let _evaluation = self.evaluation.lock().await;
        let state = self.state.read().await.clone();

        let decision = match state.phase() {
            FailoverPhase::Stable => self.evaluate_stable(&state, snapshot).await,
            FailoverPhase::FailedOver => self.evaluate_failed_over(&state, snapshot).await,
        };
        debug!(?decision, active = %state.active_region_id, "Failover evaluation complete");
        decision
    }

    async fn evaluate_stable(
        &self,
        state: &FailoverState,
        snapshot: &HashMap<String, RegionHealthStatus>,
    ) -> FailoverDecision {
        let active_id = state.active_region_id.as_str();
        let Some(active) = snapshot.get(active_id) else {
            warn!(region = %active_id, "Active region missing from health snapshot");
            return FailoverDecision::NoAction;
        };

        if active.consecutive_failures < self.policy.max_consecutive_failures {
            if active.is_eligible_target() {
                self.clear_standing_alerts(active_id).await;
            }
            return FailoverDecision::NoAction;
        }

        let Some(target) = self.select_candidate(active_id, snapshot) else {
            error!(
                consecutive_failures = active.consecutive_failures,
                "{}",
                SentinelError::NoCandidate {
                    active: active_id.to_string()
                }
            );
            if self.pending_target.write().await.take().is_some() {
                self.dispatcher
                    .resolve(&catalog::manual_failover_required(active_id, "").key);
                warn!(region = %active_id, "Withdrew pending failover; proposed target is no longer eligible");
            }
            self.raise(catalog::no_failover_target(active_id, active.consecutive_failures))
                .await;
            return FailoverDecision::NoHealthyTarget;
        };

        if self.policy.requires_approval() {
            warn!(
                region = %active_id,
                target = %target.id,
                "Failover threshold breached; awaiting manual approval"
            );
            *self.pending_target.write().await = Some(target.id.clone());
            self.raise(catalog::manual_failover_required(active_id, &target.id))
                .await;
            return FailoverDecision::ManualApprovalRequired {
                target: target.id.clone(),
            };
        }

        self.execute_failover(active_id, target).await
    }

    async fn evaluate_failed_over(
        &self,
        state: &FailoverState,
        snapshot: &HashMap<String, RegionHealthStatus>,
    ) -> FailoverDecision {
        let active_id = state.active_region_id.as_str();

        if self.policy.failback_enabled {
            let delay_elapsed = state
                .failover_started_at
                .map(|started| Utc::now() - started >= self.policy.failback_delay)
                .unwrap_or(false);
            let primary_recovered = snapshot
                .get(&self.primary_id)
                .map(RegionHealthStatus::is_eligible_target)
                .unwrap_or(false);

            if delay_elapsed && primary_recovered {
                if let Some(primary) = self.region(&self.primary_id) {
                    return self.execute_failback(active_id, primary).await;
                }
            }
        }

        if let Some(active) = snapshot.get(active_id) {
            if active.consecutive_failures >= self.policy.max_consecutive_failures {
                error!(
                    region = %active_id,
                    consecutive_failures = active.consecutive_failures,
                    "Failover region is failing"
                );
                self.raise(catalog::failed_over_region_degraded(
                    active_id,
                    active.consecutive_failures,
                ))
                .await;
                return FailoverDecision::ActiveRegionDegraded;
            }
        }

        FailoverDecision::NoAction
    }

    /// First healthy candidate in configured priority order.
    fn select_candidate<'a>(
        &'a self,
        active_id: &str,
        snapshot: &HashMap<String, RegionHealthStatus>,
    ) -> Option<&'a Region> {
        self.regions
            .iter()
            .filter(|r| r.role == RegionRole::Candidate && r.id != active_id)
            .find(|r| {
                snapshot
                    .get(&r.id)
                    .map(RegionHealthStatus::is_eligible_target)
                    .unwrap_or(false)
            })
    }

    async fn execute_failover(&self, from: &str, target: &Region) -> FailoverDecision {
        info!(from = %from, to = %target.id, "Executing failover");

        match self.switch_to(target).await {
            Ok(()) => {
                {
                    let mut state = self.state.write().await;
                    state.active_region_id = target.id.clone();
                    state.is_failed_over = true;
                    state.failover_started_at = Some(Utc::now());
                }
                *self.pending_target.write().await = None;
                self.metrics.failovers_total.inc();
                self.metrics.failed_over.set(1);
                info!(from = %from, to = %target.id, "Failover committed");

                self.clear_standing_alerts(from).await;
                self.notify(catalog::failover_completed(from, &target.id)).await;
                FailoverDecision::FailedOver {
                    from: from.to_string(),
                    to: target.id.clone(),
                }
            }
            Err(e) => {
                self.metrics.switch_failures_total.inc();
                error!(
                    from = %from,
                    "Failover aborted: {}",
                    SentinelError::Execution {
                        target: target.id.clone(),
                        reason: e.to_string()
                    }
                );
                self.raise(catalog::failover_failed(from, &target.id, &e.to_string()))
                    .await;
                FailoverDecision::ExecutionFailed {
                    target: target.id.clone(),
                    error: e.to_string(),
                }
            }
        }
    }

    async fn execute_failback(&self, from: &str, primary: &Region) -> FailoverDecision {
        info!(from = %from, to = %primary.id, "Executing failback");

        match self.switch_to(primary).await {
            Ok(()) => {
                {
                    let mut state = self.state.write().await;
                    *state = FailoverState::stable(primary.id.clone());
                }
                self.metrics.failbacks_total.inc();
                self.metrics.failed_over.set(0);
                info!(from = %from, to = %primary.id, "Failback committed");

                self.dispatcher
                    .resolve(&catalog::failed_over_region_degraded(from, 0).key);
                self.raise(catalog::failback_completed(from, &primary.id)).await;
                FailoverDecision::FailedBack {
                    from: from.to_string(),
                    to: primary.id.clone(),
                }
            }
            Err(e) => {
                self.metrics.switch_failures_total.inc();
                error!(
                    from = %from,
                    "Failback aborted: {}",
                    SentinelError::Execution {
                        target: primary.id.clone(),
                        reason: e.to_string()
                    }
                );
                self.raise(catalog::failback_failed(from, &primary.id, &e.to_string()))
                    .await;
                FailoverDecision::ExecutionFailed {
                    target: primary.id.clone(),
                    error: e.to_string(),
                }
            }
        }
    }

    /// Execute the failover proposed while approval was required.
    ///
    /// The proposal is re-checked against `snapshot`: if the proposed target
    /// has since degraded, the next eligible candidate is used instead, and
    /// with no eligible candidate the proposal is withdrawn.
    pub async fn approve_failover(
        &self,
        snapshot: &HashMap<String, RegionHealthStatus>,
    ) -> Result<FailoverDecision> {
        let _evaluation = self.evaluation.lock().await;
        let state = self.state.read().await.clone();
        if state.is_failed_over {
            return Err(SentinelError::NoPendingFailover);
        }

        let proposed = self
            .pending_target
            .write()
            .await
            .take()
            .ok_or(SentinelError::NoPendingFailover)?;
        let active_id = state.active_region_id.as_str();

        let still_eligible = snapshot
            .get(&proposed)
            .map(RegionHealthStatus::is_eligible_target)
            .unwrap_or(false);
        let target = if still_eligible {
            self.region(&proposed)
                .ok_or_else(|| SentinelError::UnknownRegion(proposed.clone()))?
        } else {
            match self.select_candidate(active_id, snapshot) {
                Some(replacement) => {
                    warn!(
                        proposed = %proposed,
                        target = %replacement.id,
                        "Proposed target degraded since approval was requested"
                    );
                    replacement
                }
                None => {
                    error!(
                        proposed = %proposed,
                        "{}",
                        SentinelError::NoCandidate {
                            active: active_id.to_string()
                        }
                    );
                    self.dispatcher
                        .resolve(&catalog::manual_failover_required(active_id, "").key);
                    let failures = snapshot
                        .get(active_id)
                        .map(|s| s.consecutive_failures)
                        .unwrap_or(0);
                    self.raise(catalog::no_failover_target(active_id, failures))
                        .await;
                    return Ok(FailoverDecision::NoHealthyTarget);
                }
            }
        };

        info!(target = %target.id, "Manual failover approved");
        let decision = self.execute_failover(active_id, target).await;
        if matches!(decision, FailoverDecision::ExecutionFailed { .. }) {
            *self.pending_target.write().await = Some(target.id.clone());
        }
        Ok(decision)
    }

    async fn switch_to(&self, target: &Region) -> anyhow::Result<()> {
        match AssertUnwindSafe(self.executor.execute(target))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("region switch executor panicked")),
        }
    }

    async fn clear_standing_alerts(&self, region_id: &str) {
        let had_pending = self.pending_target.write().await.take().is_some();
        let no_target = self
            .dispatcher
            .resolve(&catalog::no_failover_target(region_id, 0).key);
        let manual = self
            .dispatcher
            .resolve(&catalog::manual_failover_required(region_id, "").key);
        if had_pending || no_target || manual {
            debug!(region = %region_id, "Cleared standing failover alerts");
        }
    }

    async fn raise(&self, signal: AlertSignal) {
        self.dispatcher.dispatch(signal).await;
    }

    /// Dispatch a one-off notice. It describes an event, not an open
    /// condition, so it is never escalated.
    async fn notify(&self, signal: AlertSignal) {
        let key = signal.key.clone();
        self.dispatcher.dispatch(signal).await;
        self.dispatcher.scheduler().cancel_escalation(&key);
    }

    fn region(&self, id: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.id == id)
    }

    /// Consistent copy of the failover state; safe during evaluation.
    pub async fn get_status(&self) -> FailoverState {
        self.state.read().await.clone()
    }

    pub async fn pending_target(&self) -> Option<String> {
        self.pending_target.read().await.clone()
    }

    pub fn primary_id(&self) -> &str {
        &self.primary_id
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn policy(&self) -> &FailoverPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::{
        AlertDeduplicator, AlertSeverity, EscalationPolicy, EscalationScheduler,
        SeverityChannelPolicy,
    };
    use crate::drill::{RecordingChannel, ScriptedExecutor};
    use std::time::Duration as StdDuration;

    struct Harness {
        controller: FailoverController,
        pager: Arc<RecordingChannel>,
        executor: Arc<ScriptedExecutor>,
    }

    fn harness(policy: FailoverPolicy, executor: Arc<ScriptedExecutor>) -> Harness {
        let metrics = Arc::new(SentinelMetrics::new().unwrap());
        let pager = RecordingChannel::new("pager");
        let dispatcher = Arc::new(AlertDispatcher::new(
            Arc::new(AlertDeduplicator::new(StdDuration::from_secs(300))),
            Arc::new(EscalationScheduler::new(
                StdDuration::from_secs(3600),
                EscalationPolicy::Once,
                metrics.clone(),
            )),
            vec![pager.clone()],
            SeverityChannelPolicy {
                info: vec!["pager".into()],
                warning: vec!["pager".into()],
                error: vec!["pager".into()],
                critical: vec!["pager".into()],
            },
            metrics.clone(),
        ));
        let regions = vec![
            Region::primary("p", "Primary"),
            Region::candidate("a", "Candidate A"),
            Region::candidate("b", "Candidate B"),
        ];
        let controller =
            FailoverController::new(regions, policy, executor.clone(), dispatcher, metrics)
                .unwrap();
        Harness {
            controller,
            pager,
            executor,
        }
    }

    fn policy() -> FailoverPolicy {
        FailoverPolicy {
            max_consecutive_failures: 3,
            auto_failover_enabled: true,
            manual_failover_required: false,
            failback_enabled: true,
            failback_delay: Duration::milliseconds(60_000),
        }
    }

    fn snapshot(entries: &[(&str, bool, u32)]) -> HashMap<String, RegionHealthStatus> {
        entries
            .iter()
            .map(|(id, healthy, failures)| {
                (
                    id.to_string(),
                    RegionHealthStatus {
                        region_id: id.to_string(),
                        healthy: *healthy,
                        last_checked_at: Some(Utc::now()),
                        last_failure_at: None,
                        consecutive_failures: *failures,
                    },
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_below_threshold_stays_stable() {
        let h = harness(policy(), ScriptedExecutor::succeeding());
        let decision = h
            .controller
            .evaluate(&snapshot(&[("p", false, 2), ("a", true, 0), ("b", true, 0)]))
            .await;

        assert_eq!(decision, FailoverDecision::NoAction);
        assert_eq!(h.controller.get_status().await.phase(), FailoverPhase::Stable);
        assert!(h.executor.invocations().await.is_empty());
    }

    #[tokio::test]
    async fn test_picks_first_healthy_candidate_in_priority_order() {
        let h = harness(policy(), ScriptedExecutor::succeeding());
        let decision = h
            .controller
            .evaluate(&snapshot(&[("p", false, 3), ("a", false, 1), ("b", true, 0)]))
            .await;

        assert_eq!(
            decision,
            FailoverDecision::FailedOver {
                from: "p".into(),
                to: "b".into()
            }
        );
        let state = h.controller.get_status().await;
        assert_eq!(state.active_region_id, "b");
        assert!(state.is_failed_over);
        assert!(state.failover_started_at.is_some());
        assert_eq!(h.executor.invocations().await, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_no_candidate_raises_critical_and_stays_stable() {
        let h = harness(policy(), ScriptedExecutor::succeeding());
        let decision = h
            .controller
            .evaluate(&snapshot(&[("p", false, 4), ("a", false, 2), ("b", true, 1)]))
            .await;

        assert_eq!(decision, FailoverDecision::NoHealthyTarget);
        let state = h.controller.get_status().await;
        assert!(!state.is_failed_over);
        assert_eq!(state.failover_started_at, None);

        let alerts = h.pager.received().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
        assert_eq!(alerts[0].title, "No healthy failover target");
    }

    #[tokio::test]
    async fn test_hook_failure_keeps_state_and_alerts() {
        let h = harness(policy(), ScriptedExecutor::failing("cutover refused"));
        let decision = h
            .controller
            .evaluate(&snapshot(&[("p", false, 3), ("a", true, 0), ("b", true, 0)]))
            .await;

        assert!(matches!(decision, FailoverDecision::ExecutionFailed { ref target, .. } if target == "a"));
        let state = h.controller.get_status().await;
        assert_eq!(state.active_region_id, "p");
        assert!(!state.is_failed_over);

        let alerts = h.pager.received().await;
        assert_eq!(alerts[0].title, "Failover execution failed");
        assert_eq!(
            alerts[0].metadata.get("error").map(String::as_str),
            Some("cutover refused")
        );
    }

    #[tokio::test]
    async fn test_manual_mode_records_pending_target() {
        let mut manual = policy();
        manual.manual_failover_required = true;
        let h = harness(manual, ScriptedExecutor::succeeding());

        let decision = h
            .controller
            .evaluate(&snapshot(&[("p", false, 3), ("a", true, 0), ("b", true, 0)]))
            .await;
        assert_eq!(
            decision,
            FailoverDecision::ManualApprovalRequired { target: "a".into() }
        );
        assert_eq!(h.controller.pending_target().await.as_deref(), Some("a"));
        assert!(h.executor.invocations().await.is_empty());

        let healthy = snapshot(&[("p", false, 4), ("a", true, 0), ("b", true, 0)]);
        let approved = h.controller.approve_failover(&healthy).await.unwrap();
        assert_eq!(
            approved,
            FailoverDecision::FailedOver {
                from: "p".into(),
                to: "a".into()
            }
        );
        assert_eq!(h.controller.pending_target().await, None);
        assert!(matches!(
            h.controller.approve_failover(&healthy).await,
            Err(SentinelError::NoPendingFailover)
        ));
    }

    fn manual_policy() -> FailoverPolicy {
        let mut manual = policy();
        manual.manual_failover_required = true;
        manual
    }

    #[tokio::test]
    async fn test_pending_target_withdrawn_when_no_candidate_remains() {
        let h = harness(manual_policy(), ScriptedExecutor::succeeding());
        h.controller
            .evaluate(&snapshot(&[("p", false, 3), ("a", true, 0), ("b", true, 0)]))
            .await;
        assert_eq!(h.controller.pending_target().await.as_deref(), Some("a"));

        let degraded = snapshot(&[("p", false, 6), ("a", false, 3), ("b", false, 3)]);
        assert_eq!(
            h.controller.evaluate(&degraded).await,
            FailoverDecision::NoHealthyTarget
        );
        assert_eq!(h.controller.pending_target().await, None);

        assert!(matches!(
            h.controller.approve_failover(&degraded).await,
            Err(SentinelError::NoPendingFailover)
        ));
        assert!(h.executor.invocations().await.is_empty());
        assert_eq!(h.controller.get_status().await.active_region_id, "p");
    }

    #[tokio::test]
    async fn test_approval_rechecks_proposed_target() {
        let h = harness(manual_policy(), ScriptedExecutor::succeeding());
        h.controller
            .evaluate(&snapshot(&[("p", false, 3), ("a", true, 0), ("b", true, 0)]))
            .await;

        // a degraded between the request and the approval
        let a_down = snapshot(&[("p", false, 4), ("a", false, 1), ("b", true, 0)]);
        assert_eq!(
            h.controller.approve_failover(&a_down).await.unwrap(),
            FailoverDecision::FailedOver {
                from: "p".into(),
                to: "b".into()
            }
        );
        assert_eq!(h.executor.invocations().await, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_approval_with_no_eligible_target_is_withdrawn() {
        let h = harness(manual_policy(), ScriptedExecutor::succeeding());
        h.controller
            .evaluate(&snapshot(&[("p", false, 3), ("a", true, 0), ("b", true, 0)]))
            .await;

        let all_down = snapshot(&[("p", false, 4), ("a", false, 1), ("b", false, 1)]);
        assert_eq!(
            h.controller.approve_failover(&all_down).await.unwrap(),
            FailoverDecision::NoHealthyTarget
        );
        assert_eq!(h.controller.pending_target().await, None);
        assert!(h.executor.invocations().await.is_empty());
        assert!(!h.controller.get_status().await.is_failed_over);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failover_notice_is_not_escalated() {
        let h = harness(policy(), ScriptedExecutor::succeeding());
        h.controller
            .evaluate(&snapshot(&[("p", false, 3), ("a", true, 0), ("b", true, 0)]))
            .await;
        assert!(!h
            .controller
            .dispatcher
            .scheduler()
            .is_scheduled(&catalog::failover_completed("p", "a").key));

        tokio::time::sleep(StdDuration::from_secs(7200)).await;
        let completed: Vec<_> = h
            .pager
            .received()
            .await
            .into_iter()
            .filter(|s| s.title == "Failover completed")
            .collect();
        assert_eq!(completed.len(), 1);
        assert!(!completed[0].escalated);
    }

    #[tokio::test]
    async fn test_failback_waits_for_delay() {
        let h = harness(policy(), ScriptedExecutor::succeeding());
        h.controller
            .evaluate(&snapshot(&[("p", false, 3), ("a", true, 0), ("b", true, 0)]))
            .await;

        let decision = h
            .controller
            .evaluate(&snapshot(&[("p", true, 0), ("a", true, 0), ("b", true, 0)]))
            .await;
        assert_eq!(decision, FailoverDecision::NoAction);
        assert!(h.controller.get_status().await.is_failed_over);
    }

    #[tokio::test]
    async fn test_failback_after_delay_restores_primary() {
        let mut quick = policy();
        quick.failback_delay = Duration::milliseconds(20);
        let h = harness(quick, ScriptedExecutor::succeeding());
        h.controller
            .evaluate(&snapshot(&[("p", false, 3), ("a", true, 0), ("b", true, 0)]))
            .await;

        tokio::time::sleep(StdDuration::from_millis(40)).await;

        let decision = h
            .controller
            .evaluate(&snapshot(&[("p", true, 0), ("a", true, 0), ("b", true, 0)]))
            .await;
        assert_eq!(
            decision,
            FailoverDecision::FailedBack {
                from: "a".into(),
                to: "p".into()
            }
        );
        let state = h.controller.get_status().await;
        assert_eq!(state, FailoverState::stable("p"));
        assert_eq!(
            h.executor.invocations().await,
            vec!["a".to_string(), "p".to_string()]
        );
    }

    #[tokio::test]
    async fn test_no_second_hop_while_failed_over() {
        let mut no_failback = policy();
        no_failback.failback_enabled = false;
        let h = harness(no_failback, ScriptedExecutor::succeeding());
        h.controller
            .evaluate(&snapshot(&[("p", false, 3), ("a", true, 0), ("b", true, 0)]))
            .await;

        let decision = h
            .controller
            .evaluate(&snapshot(&[("p", false, 6), ("a", false, 3), ("b", true, 0)]))
            .await;
        assert_eq!(decision, FailoverDecision::ActiveRegionDegraded);
        assert_eq!(h.controller.get_status().await.active_region_id, "a");
        assert_eq!(h.executor.invocations().await.len(), 1);
    }
}
