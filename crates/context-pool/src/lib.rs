//! Pre-warmed pool of disposable execution contexts.
//!
//! Each job gets an isolated clone of the master session's credential store
//! so concurrent form submissions never share browsing state. The pool keeps
//! a few clones warm, recycles them by use count and age, and drops whole
//! generations when the recovery orchestrator replaces the master.

pub mod maintenance;
pub mod metrics;
pub mod model;
pub mod pool;

pub use maintenance::PoolMaintenance;
pub use model::{PoolConfig, PoolStats};
pub use pool::ContextPool;
