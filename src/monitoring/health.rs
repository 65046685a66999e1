use crate::alerting::AlertSeverity;
use crate::region::{FailoverPhase, FailoverState, Region, RegionHealthStatus, RegionRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegionStatusView {
    pub region_id: String,
    pub display_name: String,
    pub role: RegionRole,
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// Point-in-time view of the whole control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneStatus {
    pub generated_at: DateTime<Utc>,
    pub active_region_id: String,
    pub phase: FailoverPhase,
    pub is_failed_over: bool,
    pub failover_started_at: Option<DateTime<Utc>>,
    pub pending_failover_target: Option<String>,
    pub regions: Vec<RegionStatusView>,
    pub dedup_records_by_severity: BTreeMap<AlertSeverity, usize>,
    pub pending_escalations: usize,
    pub monitor_running: bool,
}

impl ControlPlaneStatus {
    /// Assemble a status from its parts. Regions keep configuration order.
    pub fn assemble(
        regions: &[Region],
        health: &HashMap<String, RegionHealthStatus>,
        state: &FailoverState,
        pending_failover_target: Option<String>,
        dedup_records_by_severity: BTreeMap<AlertSeverity, usize>,
        pending_escalations: usize,
        monitor_running: bool,
    ) -> Self {
        let regions = regions
            .iter()
            .map(|region| {
                let status = health
                    .get(&region.id)
                    .cloned()
                    .unwrap_or_else(|| RegionHealthStatus::unchecked(region.id.clone()));
                RegionStatusView {
                    region_id: region.id.clone(),
                    display_name: region.display_name.clone(),
                    role: region.role,
                    healthy: status.healthy,
                    consecutive_failures: status.consecutive_failures,
                    last_checked_at: status.last_checked_at,
                    last_failure_at: status.last_failure_at,
                    is_active: region.id == state.active_region_id,
                }
            })
            .collect();

        Self {
            generated_at: Utc::now(),
            active_region_id: state.active_region_id.clone(),
            phase: state.phase(),
            is_failed_over: state.is_failed_over,
            failover_started_at: state.failover_started_at,
            pending_failover_target,
            regions,
            dedup_records_by_severity,
            pending_escalations,
            monitor_running,
        }
    }

    pub fn active_region(&self) -> Option<&RegionStatusView> {
        self.regions.iter().find(|r| r.is_active)
    }
}

/// Simple health response for liveness checks
#[derive(Debug, Serialize, Deserialize)]
pub struct SimpleHealthResponse {
    pub status: String,
    pub timestamp: String,
    pub active_region: String,
}

impl From<&ControlPlaneStatus> for SimpleHealthResponse {
    fn from(status: &ControlPlaneStatus) -> Self {
        let active_healthy = status.active_region().map(|r| r.healthy).unwrap_or(false);
        Self {
            status: match (status.phase, active_healthy) {
                (FailoverPhase::FailedOver, _) => "failed_over".to_string(),
                (FailoverPhase::Stable, true) => "healthy".to_string(),
                (FailoverPhase::Stable, false) => "degraded".to_string(),
            },
            timestamp: status.generated_at.to_rfc3339(),
            active_region: status.active_region_id.clone(),
        }
    }
}
