//! FormPilot execution context engine.
//!
//! The rest of the workspace never talks to a browser directly; it goes through
//! the [`ContextEngine`] trait defined here. The concrete implementation drives
//! headless Chromium over the DevTools Protocol, one browser process per
//! execution context, with the context's credential state living in a profile
//! directory (`--user-data-dir`). Cloning a context means cloning that
//! directory and launching a fresh browser on the copy.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use formpilot_core_types::ContextId;

pub mod cdp;
pub mod config;
pub mod error;
pub mod factory;
pub mod profile;
pub mod solver;

pub use cdp::CdpContextEngine;
pub use config::EngineConfig;
pub use error::EngineError;
pub use factory::{ClonedContext, ContextFactory, MasterSource};
pub use profile::ProfileStore;
pub use solver::{ChallengeSolver, HttpChallengeSolver, SolverConfig, SolverError};

/// Whether a context is the long-lived master or a disposable clone.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContextKind {
    Master,
    Clone,
}

/// Opaque reference to a live execution context.
///
/// Handles are cheap to clone; the engine keeps the owning browser process
/// keyed by id. A handle for a destroyed context yields
/// [`EngineError::UnknownContext`] on use.
#[derive(Clone, Debug)]
pub struct ContextHandle {
    pub id: ContextId,
    pub kind: ContextKind,
    pub store: PathBuf,
}

impl ContextHandle {
    pub fn new(kind: ContextKind, store: impl Into<PathBuf>) -> Self {
        Self {
            id: ContextId::new(),
            kind,
            store: store.into(),
        }
    }
}

/// Thin boundary to the browser-automation driver.
///
/// Every network-facing operation takes or carries a bounded timeout; a timed
/// out operation fails the attempt rather than waiting indefinitely.
#[async_trait]
pub trait ContextEngine: Send + Sync {
    /// Launch a context bound to the given profile store directory.
    async fn create_context(
        &self,
        kind: ContextKind,
        store: &Path,
    ) -> Result<ContextHandle, EngineError>;

    /// Navigate the context's page to a URL and wait for the load to settle.
    async fn navigate(
        &self,
        ctx: &ContextHandle,
        url: &str,
        timeout: Duration,
    ) -> Result<(), EngineError>;

    /// Check whether an element matching the CSS selector is present.
    async fn has_marker(
        &self,
        ctx: &ContextHandle,
        selector: &str,
        timeout: Duration,
    ) -> Result<bool, EngineError>;

    /// Type a value into the field matching the selector.
    async fn fill_field(
        &self,
        ctx: &ContextHandle,
        selector: &str,
        value: &str,
    ) -> Result<(), EngineError>;

    /// Click the element matching the selector.
    async fn click(&self, ctx: &ContextHandle, selector: &str) -> Result<(), EngineError>;

    /// Capture a PNG of the element matching the selector (challenge images).
    async fn capture_image(
        &self,
        ctx: &ContextHandle,
        selector: &str,
    ) -> Result<Vec<u8>, EngineError>;

    /// Drop transient browsing state (cache, cookies) held by the live context.
    /// Credential artifacts are re-seeded from the master store afterwards by
    /// the caller; this call alone leaves the context logged out.
    async fn clear_transient_state(&self, ctx: &ContextHandle) -> Result<(), EngineError>;

    /// Tear the context down and release its browser process. The profile
    /// store directory is left on disk for the caller to keep or remove.
    async fn destroy(&self, ctx: &ContextHandle) -> Result<(), EngineError>;
}
