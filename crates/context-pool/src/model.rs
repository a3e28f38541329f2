use std::time::{Duration, Instant};

use context_engine::ClonedContext;
use formpilot_core_types::duration_str;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// How many idle contexts the pool keeps warm for instant acquire.
    pub target_ready: usize,
    /// Jobs served by one context before it is destroyed and replaced.
    pub max_uses: u32,
    /// Wall-clock age past which a context is destroyed regardless of use.
    #[serde(with = "duration_str")]
    pub max_lifetime: Duration,
    #[serde(with = "duration_str")]
    pub maintenance_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            target_ready: 4,
            max_uses: 20,
            max_lifetime: Duration::from_secs(30 * 60),
            maintenance_interval: Duration::from_secs(60),
        }
    }
}

/// A pooled clone plus the bookkeeping the recycling rules run on.
#[derive(Debug)]
pub(crate) struct PooledContext {
    pub clone: ClonedContext,
    pub born: Instant,
    pub uses: u32,
}

impl PooledContext {
    pub fn new(clone: ClonedContext) -> Self {
        Self {
            clone,
            born: Instant::now(),
            uses: 0,
        }
    }

    pub fn age(&self) -> Duration {
        self.born.elapsed()
    }
}

/// Point-in-time pool occupancy for the status surface.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct PoolStats {
    pub ready: usize,
    pub active: usize,
}
