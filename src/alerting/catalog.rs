//! Alert constructors with stable keys.
//!
//! Keys identify a *condition*, not an occurrence, so repeated signals for the
//! same condition collapse in the deduplicator.

use super::{AlertSeverity, AlertSignal};

pub fn region_outage(region_id: &str, consecutive_failures: u32) -> AlertSignal {
    AlertSignal::new(
        format!("region.outage.{region_id}"),
        AlertSeverity::Warning,
        format!("Region {region_id} unhealthy"),
        format!("Region {region_id} failed {consecutive_failures} consecutive health passes"),
    )
    .with_metadata("region", region_id)
    .with_metadata("consecutive_failures", consecutive_failures)
}

pub fn connection_pool_exhausted(pool: &str, utilization_percent: f64) -> AlertSignal {
    let severity = if utilization_percent >= 95.0 {
        AlertSeverity::Critical
    } else {
        AlertSeverity::Error
    };
    AlertSignal::new(
        format!("pool.exhausted.{pool}"),
        severity,
        format!("Connection pool {pool} saturated"),
        format!("Connection pool saturation: {utilization_percent:.1}%"),
    )
    .with_metadata("pool", pool)
    .with_metadata("utilization_percent", format!("{utilization_percent:.1}"))
}

pub fn cache_cluster_lost(cluster: &str) -> AlertSignal {
    AlertSignal::new(
        format!("cache.lost.{cluster}"),
        AlertSeverity::Critical,
        format!("Cache cluster {cluster} unreachable"),
        format!("Lost contact with cache cluster {cluster}"),
    )
    .with_metadata("cluster", cluster)
}

pub fn elevated_error_rate(service: &str, rate_percent: f64, threshold_percent: f64) -> AlertSignal {
    let severity = if rate_percent >= threshold_percent * 2.0 {
        AlertSeverity::Critical
    } else {
        AlertSeverity::Warning
    };
    AlertSignal::new(
        format!("error_rate.{service}"),
        severity,
        format!("Elevated error rate on {service}"),
        format!("High error rate: {rate_percent:.1}% (threshold: {threshold_percent:.1}%)"),
    )
    .with_metadata("service", service)
    .with_metadata("rate_percent", format!("{rate_percent:.2}"))
    .with_metadata("threshold_percent", format!("{threshold_percent:.2}"))
}

pub fn quota_breach(tenant: &str, quota: &str, used: u64, limit: u64) -> AlertSignal {
    AlertSignal::new(
        format!("quota.{tenant}.{quota}"),
        AlertSeverity::Warning,
        format!("Quota {quota} exceeded"),
        format!("Tenant {tenant} used {used} of {limit} ({quota})"),
    )
    .for_tenant(tenant)
    .with_metadata("quota", quota)
    .with_metadata("used", used)
    .with_metadata("limit", limit)
}

pub fn manual_failover_required(active: &str, target: &str) -> AlertSignal {
    AlertSignal::new(
        format!("failover.manual_approval.{active}"),
        AlertSeverity::Error,
        "Manual failover approval required",
        format!(
            "Region {active} breached its failure threshold; approve failover to {target}"
        ),
    )
    .with_metadata("active_region", active)
    .with_metadata("proposed_target", target)
}

pub fn no_failover_target(active: &str, consecutive_failures: u32) -> AlertSignal {
    AlertSignal::new(
        format!("failover.no_target.{active}"),
        AlertSeverity::Critical,
        "No healthy failover target",
        format!(
            "Region {active} failed {consecutive_failures} consecutive passes and no candidate region is healthy"
        ),
    )
    .with_metadata("active_region", active)
    .with_metadata("consecutive_failures", consecutive_failures)
}

pub fn failover_completed(from: &str, to: &str) -> AlertSignal {
    AlertSignal::new(
        format!("failover.completed.{from}.{to}"),
        AlertSeverity::Critical,
        "Failover completed",
        format!("Active region switched from {from} to {to}"),
    )
    .with_metadata("from_region", from)
    .with_metadata("to_region", to)
}

pub fn failover_failed(from: &str, to: &str, error: &str) -> AlertSignal {
    AlertSignal::new(
        format!("failover.failed.{from}.{to}"),
        AlertSeverity::Critical,
        "Failover execution failed",
        format!("Switching from {from} to {to} failed; {from} remains active"),
    )
    .with_metadata("from_region", from)
    .with_metadata("to_region", to)
    .with_metadata("error", error)
}

pub fn failback_completed(from: &str, to: &str) -> AlertSignal {
    AlertSignal::new(
        format!("failback.completed.{from}.{to}"),
        AlertSeverity::Warning,
        "Failback completed",
        format!("Active region restored from {from} to primary {to}"),
    )
    .with_metadata("from_region", from)
    .with_metadata("to_region", to)
}

pub fn failback_failed(from: &str, to: &str, error: &str) -> AlertSignal {
    AlertSignal::new(
        format!("failback.failed.{from}.{to}"),
        AlertSeverity::Critical,
        "Failback execution failed",
        format!("Restoring primary {to} from {from} failed; {from} remains active"),
    )
    .with_metadata("from_region", from)
    .with_metadata("to_region", to)
    .with_metadata("error", error)
}

pub fn failed_over_region_degraded(active: &str, consecutive_failures: u32) -> AlertSignal {
    AlertSignal::new(
        format!("failover.degraded.{active}"),
        AlertSeverity::Critical,
        "Failover region unhealthy",
        format!(
            "Failover region {active} failed {consecutive_failures} consecutive passes; no further automatic hop"
        ),
    )
    .with_metadata("active_region", active)
    .with_metadata("consecutive_failures", consecutive_failures)
}

pub fn health_pass_panicked() -> AlertSignal {
    AlertSignal::new(
        "sentinel.health_pass_panic",
        AlertSeverity::Critical,
        "Region health pass crashed",
        "A health pass panicked; monitoring continues on the next interval",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_stable_per_condition() {
        assert_eq!(
            region_outage("eu-west", 3).key,
            region_outage("eu-west", 7).key
        );
        assert_eq!(
            manual_failover_required("p", "a").key,
            manual_failover_required("p", "b").key
        );
    }

    #[test]
    fn test_severity_scales_with_magnitude() {
        assert_eq!(
            connection_pool_exhausted("main", 91.0).severity,
            AlertSeverity::Error
        );
        assert_eq!(
            connection_pool_exhausted("main", 99.0).severity,
            AlertSeverity::Critical
        );
        assert_eq!(
            elevated_error_rate("api", 6.0, 5.0).severity,
            AlertSeverity::Warning
        );
        assert_eq!(
            elevated_error_rate("api", 12.0, 5.0).severity,
            AlertSeverity::Critical
        );
    }

    #[test]
    fn test_failure_alerts_carry_error_metadata() {
        let alert = failover_failed("p", "a", "dns update rejected");
        assert_eq!(alert.severity, AlertSeverity::Critical);
        assert_eq!(
            alert.metadata.get("error").map(String::as_str),
            Some("dns update rejected")
        );
    }

    #[test]
    fn test_quota_breach_targets_tenant() {
        let alert = quota_breach("acme", "storage", 120, 100);
        assert_eq!(alert.target_tenant.as_deref(), Some("acme"));
        assert_eq!(alert.key, "quota.acme.storage");
    }
}
