//! Scripted probes, executors and channels for rehearsing failover without
//! touching real infrastructure. Used by the `drill` subcommand and by tests.

use crate::alerting::{AlertSignal, DispatchRecord, NotificationChannel};
use crate::config::ControlPlaneConfig;
use crate::control_plane::ControlPlane;
use crate::monitoring::ControlPlaneStatus;
use crate::region::{HealthProbe, PassOutcome, Region, RegionSwitchExecutor};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
enum StaticBehaviour {
    Healthy,
    Unhealthy,
    Hanging,
    Slow(Duration),
}

/// Probe with a fixed answer for every region.
#[derive(Debug)]
pub struct StaticProbe {
    name: String,
    behaviour: StaticBehaviour,
}

impl StaticProbe {
    fn build(name: &str, behaviour: StaticBehaviour) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behaviour,
        })
    }

    pub fn healthy(name: &str) -> Arc<Self> {
        Self::build(name, StaticBehaviour::Healthy)
    }

    pub fn unhealthy(name: &str) -> Arc<Self> {
        Self::build(name, StaticBehaviour::Unhealthy)
    }

    /// Never completes; relies on the monitor's probe timeout.
    pub fn hanging(name: &str) -> Arc<Self> {
        Self::build(name, StaticBehaviour::Hanging)
    }

    /// Healthy after `delay`.
    pub fn slow(name: &str, delay: Duration) -> Arc<Self> {
        Self::build(name, StaticBehaviour::Slow(delay))
    }
}

#[async_trait]
impl HealthProbe for StaticProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, _region: &Region) -> anyhow::Result<bool> {
        match self.behaviour {
            StaticBehaviour::Healthy => Ok(true),
            StaticBehaviour::Unhealthy => Ok(false),
            StaticBehaviour::Hanging => {
                std::future::pending::<()>().await;
                Ok(false)
            }
            StaticBehaviour::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(true)
            }
        }
    }
}

#[derive(Debug, Default)]
struct ProbeScript {
    queued: HashMap<String, VecDeque<bool>>,
    down: HashSet<String>,
}

/// Probe whose answers are scripted per region.
///
/// Queued results are consumed one per check. Once a region's queue is
/// empty the probe reports healthy, unless the region was marked down.
#[derive(Debug)]
pub struct ScriptedProbe {
    name: String,
    script: Mutex<ProbeScript>,
}

impl ScriptedProbe {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(ProbeScript::default()),
        })
    }

    pub async fn script(&self, region_id: &str, results: impl IntoIterator<Item = bool>) {
        self.script
            .lock()
            .await
            .queued
            .entry(region_id.to_string())
            .or_default()
            .extend(results);
    }

    pub async fn fail_region(&self, region_id: &str) {
        self.script.lock().await.down.insert(region_id.to_string());
    }

    pub async fn heal_region(&self, region_id: &str) {
        let mut script = self.script.lock().await;
        script.down.remove(region_id);
        script.queued.remove(region_id);
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, region: &Region) -> anyhow::Result<bool> {
        let mut script = self.script.lock().await;
        if let Some(next) = script.queued.get_mut(&region.id).and_then(VecDeque::pop_front) {
            return Ok(next);
        }
        Ok(!script.down.contains(&region.id))
    }
}

/// Region-switch hook that records every cutover it is asked to perform.
#[derive(Debug)]
pub struct ScriptedExecutor {
    failure: Option<String>,
    latency: Duration,
    invocations: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    fn build(failure: Option<String>, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            failure,
            latency,
            invocations: Mutex::new(Vec::new()),
        })
    }

    pub fn succeeding() -> Arc<Self> {
        Self::build(None, Duration::ZERO)
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Self::build(Some(message.to_string()), Duration::ZERO)
    }

    /// Records the cutover as requested, then takes `latency` to complete it.
    pub fn slow(latency: Duration) -> Arc<Self> {
        Self::build(None, latency)
    }

    /// Target region ids in invocation order.
    pub async fn invocations(&self) -> Vec<String> {
        self.invocations.lock().await.clone()
    }
}

#[async_trait]
impl RegionSwitchExecutor for ScriptedExecutor {
    async fn execute(&self, target: &Region) -> anyhow::Result<()> {
        self.invocations.lock().await.push(target.id.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match &self.failure {
            Some(message) => Err(anyhow::anyhow!("{}", message)),
            None => {
                debug!(target = %target.id, "Drill cutover performed");
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelBehaviour {
    Accept,
    Fail,
    Reject,
}

/// Channel that keeps every signal it is handed.
#[derive(Debug)]
pub struct RecordingChannel {
    name: String,
    behaviour: ChannelBehaviour,
    received: Mutex<Vec<AlertSignal>>,
}

impl RecordingChannel {
    fn build(name: &str, behaviour: ChannelBehaviour) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behaviour,
            received: Mutex::new(Vec::new()),
        })
    }

    pub fn new(name: &str) -> Arc<Self> {
        Self::build(name, ChannelBehaviour::Accept)
    }

    /// Records the signal, then returns an error.
    pub fn failing(name: &str) -> Arc<Self> {
        Self::build(name, ChannelBehaviour::Fail)
    }

    /// Records the signal, then reports it as not delivered.
    pub fn rejecting(name: &str) -> Arc<Self> {
        Self::build(name, ChannelBehaviour::Reject)
    }

    pub async fn count(&self) -> usize {
        self.received.lock().await.len()
    }

    pub async fn received(&self) -> Vec<AlertSignal> {
        self.received.lock().await.clone()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, signal: &AlertSignal) -> anyhow::Result<bool> {
        self.received.lock().await.push(signal.clone());
        match self.behaviour {
            ChannelBehaviour::Accept => Ok(true),
            ChannelBehaviour::Reject => Ok(false),
            ChannelBehaviour::Fail => Err(anyhow::anyhow!("{} endpoint unavailable", self.name)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DrillPass {
    pub pass: u32,
    pub outcome: String,
    pub active_region_id: String,
    pub is_failed_over: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DrillReport {
    pub primary_region_id: String,
    pub passes: Vec<DrillPass>,
    pub alerts: Vec<DispatchRecord>,
    pub final_status: ControlPlaneStatus,
}

/// Simulate a primary outage: the primary fails every probe, candidates
/// stay healthy, and `passes` health passes run back to back.
pub async fn run_primary_outage_drill(
    config: ControlPlaneConfig,
    channels: Vec<Arc<dyn NotificationChannel>>,
    passes: u32,
) -> crate::error::Result<DrillReport> {
    let primary_region_id = config
        .primary()
        .map(|r| r.id.clone())
        .ok_or_else(|| crate::error::SentinelError::Configuration("no primary region".into()))?;

    let mut probes: Vec<Arc<dyn HealthProbe>> = Vec::new();
    for name in ["datastore", "cache", "http"] {
        let probe = ScriptedProbe::new(name);
        probe.fail_region(&primary_region_id).await;
        probes.push(probe);
    }

    let plane = ControlPlane::new(config, probes, channels, ScriptedExecutor::succeeding())?;
    info!(primary = %primary_region_id, passes, "Starting primary outage drill");

    let mut report = Vec::with_capacity(passes as usize);
    for pass in 1..=passes {
        let outcome = match plane.trigger_health_check().await {
            PassOutcome::Completed(decision) => format!("{decision:?}"),
            PassOutcome::Skipped => "Skipped".to_string(),
        };
        let state = plane.failover_state().await;
        report.push(DrillPass {
            pass,
            outcome,
            active_region_id: state.active_region_id,
            is_failed_over: state.is_failed_over,
        });
    }

    let alerts = plane.audit_log(None).await;
    let final_status = plane.status().await;
    plane.shutdown().await;

    Ok(DrillReport {
        primary_region_id,
        passes: report,
        alerts,
        final_status,
    })
}
