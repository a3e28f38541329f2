//! Shared primitives for the FormPilot session crates.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Correlation key supplied by job workers on acquire/release calls.
/// FormPilot never persists job state; the id only ties a pooled context
/// to the worker currently holding it.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Unique identifier for an execution context (master or pooled clone).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ContextId(pub Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Failure taxonomy for session probing and recovery.
#[derive(Clone, Debug, Error, Serialize, Deserialize)]
pub enum SessionError {
    #[error("probe timed out after {elapsed_ms}ms")]
    ProbeTimeout { elapsed_ms: u64 },
    #[error("context unreachable: {reason}")]
    ProbeUnreachable { reason: String },
    #[error("authentication failed: {reason}")]
    AuthenticationFailed { reason: String },
    #[error("profile store corrupted: {reason}")]
    StoreCorrupted { reason: String },
    #[error("recovery exhausted; external intervention required")]
    RecoveryExhausted,
    #[error("no context acquired for job {job}")]
    UnknownJob { job: JobId },
    #[error("{message}")]
    Internal { message: String },
}

impl SessionError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Terminal errors must fail the job immediately instead of retrying.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RecoveryExhausted)
    }
}

/// Serde bridge for humantime-formatted duration fields ("90s", "5m", "8h").
pub mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
