use std::time::Duration;

use formpilot_core_types::ContextId;
use thiserror::Error;

/// Failures surfaced by the engine boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("context launch failed: {0}")]
    Launch(String),
    #[error("navigation timed out after {0:?}")]
    NavTimeout(Duration),
    #[error("cdp i/o failure: {0}")]
    CdpIo(String),
    #[error("unknown context {0}")]
    UnknownContext(ContextId),
    #[error("profile store error: {0}")]
    Store(#[from] std::io::Error),
    #[error("master session unavailable for cloning")]
    MasterUnavailable,
    #[error("challenge capture failed: {0}")]
    Challenge(String),
    #[error("element not found: {0}")]
    ElementMissing(String),
}

impl EngineError {
    /// Transport-level failures mean the context itself cannot respond,
    /// as opposed to responding with the wrong page.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Launch(_) | Self::NavTimeout(_) | Self::CdpIo(_) | Self::UnknownContext(_)
        )
    }
}
