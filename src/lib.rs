//! FormPilot: automated insurance form submission on top of a self-healing
//! browser session.
//!
//! The daemon keeps one authenticated master session against the insurer
//! portal alive and hands jobs disposable cloned contexts from a warm pool.
//! When the session degrades, an escalating recovery protocol repairs it
//! (re-login, context relaunch, profile-store wipe) while concurrent jobs
//! share a single repair episode.

pub mod cli;
pub mod config;
pub mod metrics;
pub mod server;
pub mod service;
pub mod telemetry;

pub use config::AppConfig;
pub use service::{JobStep, ServiceStatus, SessionService};
