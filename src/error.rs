use thiserror::Error;

#[derive(Error, Debug)]
pub enum SentinelError {
    #[error("Probe {probe} failed for region {region}: {reason}")]
    Probe {
        probe: String,
        region: String,
        reason: String,
    },

    #[error("Region switch to {target} failed: {reason}")]
    Execution { target: String, reason: String },

    #[error("Channel {channel} rejected alert: {reason}")]
    Dispatch { channel: String, reason: String },

    #[error("No healthy failover target while {active} is failing")]
    NoCandidate { active: String },

    #[error("Unknown region: {0}")]
    UnknownRegion(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No failover is awaiting approval")]
    NoPendingFailover,

    #[error("Metrics registry error: {0}")]
    Metrics(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SentinelError>;
