pub mod alerting;
pub mod config;
pub mod control_plane;
pub mod drill;
pub mod error;
pub mod integrations;
pub mod monitoring;
pub mod region;

pub use config::ControlPlaneConfig;
pub use control_plane::ControlPlane;
pub use error::{Result, SentinelError};

// Re-export alerting types
pub use alerting::{
    AlertDeduplicator, AlertDispatcher, AlertSeverity, AlertSignal, DispatchOutcome,
    DispatchRecord, EscalationPolicy, EscalationScheduler, LogChannel, NotificationChannel,
    SeverityChannelPolicy,
};

// Re-export region types
pub use region::{
    FailoverController, FailoverDecision, FailoverPhase, FailoverPolicy, FailoverState,
    HealthProbe, PassOutcome, Region, RegionHealthMonitor, RegionHealthStatus, RegionRole,
    RegionSwitchExecutor,
};

// Re-export monitoring types
pub use monitoring::{ControlPlaneStatus, RegionStatusView, SentinelMetrics, SimpleHealthResponse};
