pub mod failover;
pub mod monitor;

pub use failover::*;
pub use monitor::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionRole {
    Primary,
    Candidate,
}

/// Immutable region configuration. Candidates are tried in the order they
/// appear in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    pub display_name: String,
    pub role: RegionRole,
    #[serde(default)]
    pub probe_endpoints: HashMap<String, String>,
}

impl Region {
    pub fn primary(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            role: RegionRole::Primary,
            probe_endpoints: HashMap::new(),
        }
    }

    pub fn candidate(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            role: RegionRole::Candidate,
            probe_endpoints: HashMap::new(),
        }
    }

    pub fn with_endpoint(mut self, probe: impl Into<String>, endpoint: impl Into<String>) -> Self {
        self.probe_endpoints.insert(probe.into(), endpoint.into());
        self
    }

    pub fn endpoint(&self, probe: &str) -> Option<&str> {
        self.probe_endpoints.get(probe).map(String::as_str)
    }
}

/// Per-region health, written only by the health monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionHealthStatus {
    pub region_id: String,
    pub healthy: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl RegionHealthStatus {
    /// Unchecked regions start unhealthy so they are never chosen as a target.
    pub fn unchecked(region_id: impl Into<String>) -> Self {
        Self {
            region_id: region_id.into(),
            healthy: false,
            last_checked_at: None,
            last_failure_at: None,
            consecutive_failures: 0,
        }
    }

    pub fn record_pass(&mut self, healthy: bool, at: DateTime<Utc>) {
        self.healthy = healthy;
        self.last_checked_at = Some(at);
        if healthy {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.last_failure_at = Some(at);
        }
    }

    /// Healthy with no outstanding failures.
    pub fn is_eligible_target(&self) -> bool {
        self.healthy && self.consecutive_failures == 0
    }
}

/// One health check against one subsystem of a region (datastore
/// replication, cache cluster, HTTP reachability, ...).
///
/// Returning `Err` is equivalent to returning `Ok(false)`.
#[async_trait]
pub trait HealthProbe: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;
    async fn check(&self, region: &Region) -> anyhow::Result<bool>;
}

/// Region-switch hook that performs the actual cutover.
#[async_trait]
pub trait RegionSwitchExecutor: Send + Sync + std::fmt::Debug {
    async fn execute(&self, target: &Region) -> anyhow::Result<()>;
}

/// At least two thirds of probes must succeed. No probes means no evidence.
pub fn quorum_met(successes: usize, total: usize) -> bool {
    total > 0 && successes * 3 >= total * 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quorum_tolerates_one_flaky_probe() {
        assert!(quorum_met(3, 3));
        assert!(quorum_met(2, 3));
        assert!(!quorum_met(1, 3));
        assert!(!quorum_met(0, 3));
        assert!(quorum_met(1, 1));
        assert!(!quorum_met(1, 2));
        assert!(!quorum_met(0, 0));
    }

    #[test]
    fn test_record_pass_tracks_failures() {
        let mut status = RegionHealthStatus::unchecked("eu");
        assert!(!status.is_eligible_target());

        let t = Utc::now();
        status.record_pass(false, t);
        status.record_pass(false, t);
        assert_eq!(status.consecutive_failures, 2);
        assert_eq!(status.last_failure_at, Some(t));

        status.record_pass(true, t);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.last_failure_at, Some(t));
        assert!(status.is_eligible_target());
    }
}
