//! Master session lifecycle: health probing, escalating recovery and the
//! periodic monitor that keeps the portal session authenticated.
//!
//! The [`SessionKeeper`] owns the single long-lived master execution context.
//! Everything else in the system sees it through the `MasterSource` trait and
//! the `recover()` entry point, which collapses concurrent repair requests
//! into one escalation episode (soft re-login, hard relaunch, nuclear store
//! wipe) with per-level attempt budgets.

pub mod auth;
pub mod events;
pub mod metrics;
pub mod model;
pub mod monitor;
pub mod orchestrator;
pub mod portal;
pub mod probe;

pub use events::{InMemoryRecoverySink, NoopRecoverySink, RecoverySink, SessionEvent};
pub use model::{Budgets, KeeperState, RecoveryAttempt, RecoveryConfig, RecoveryLevel};
pub use monitor::HealthMonitor;
pub use orchestrator::{KeeperStatus, SessionKeeper};
pub use portal::{Credentials, PortalConfig};
pub use probe::{HealthProber, ProbeOutcome};
