use std::sync::Arc;

use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use crate::pool::ContextPool;

/// Background caretaker: sweeps expired idle contexts and tops the ready
/// queue back up on a fixed cadence.
pub struct PoolMaintenance {
    pool: Arc<ContextPool>,
}

impl PoolMaintenance {
    pub fn new(pool: Arc<ContextPool>) -> Self {
        Self { pool }
    }

    /// Run until the task is aborted. Each round sweeps first so replenish
    /// counts only contexts that will actually be handed out.
    pub async fn run(self) {
        let mut ticker = interval(self.pool.config().maintenance_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.pool.sweep().await;
            self.pool.replenish().await;
            let stats = self.pool.stats();
            debug!(target: "pool", ready = stats.ready, active = stats.active, "maintenance round finished");
        }
    }
}
