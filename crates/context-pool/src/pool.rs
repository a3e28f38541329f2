use std::collections::VecDeque;
use std::sync::Arc;

use context_engine::{ContextFactory, ContextHandle, EngineError};
use dashmap::DashMap;
use formpilot_core_types::{JobId, SessionError};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::metrics;
use crate::model::{PoolConfig, PoolStats, PooledContext};

/// Pool of disposable execution contexts cloned from the master session.
///
/// Jobs check a context out under their job id and must return it through
/// [`release`](ContextPool::release). A context goes back on the ready queue
/// only after its transient browsing state is cleared and its credential
/// artifacts are re-seeded from the master store; anything worn out, aged out
/// or issued from a replaced master is destroyed instead.
pub struct ContextPool {
    factory: Arc<ContextFactory>,
    config: PoolConfig,
    ready: Mutex<VecDeque<PooledContext>>,
    active: DashMap<JobId, PooledContext>,
}

impl ContextPool {
    pub fn new(factory: Arc<ContextFactory>, config: PoolConfig) -> Self {
        Self {
            factory,
            config,
            ready: Mutex::new(VecDeque::new()),
            active: DashMap::new(),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            ready: self.ready.lock().len(),
            active: self.active.len(),
        }
    }

    /// Check a context out for a job. Pre-warmed contexts from the current
    /// master generation are preferred; an empty queue falls back to cloning
    /// on demand.
    pub async fn acquire(&self, job: &JobId) -> Result<ContextHandle, SessionError> {
        if self.active.contains_key(job) {
            return Err(SessionError::internal(format!(
                "job {job} already holds a context"
            )));
        }
        let epoch = self.factory.master().epoch();
        let mut entry = loop {
            let candidate = { self.ready.lock().pop_front() };
            match candidate {
                Some(ctx) if ctx.clone.epoch < epoch => {
                    self.discard(ctx, "epoch").await;
                }
                Some(ctx) if ctx.age() >= self.config.max_lifetime => {
                    self.discard(ctx, "max_lifetime").await;
                }
                Some(ctx) => break ctx,
                None => break self.create().await?,
            }
        };
        entry.uses += 1;
        let handle = entry.clone.handle.clone();
        debug!(target: "pool", job = %job, id = %handle.id, uses = entry.uses, "context acquired");
        self.active.insert(job.clone(), entry);
        self.publish_occupancy();
        Ok(handle)
    }

    /// Return a job's context. `discard_hint` forces destruction, for callers
    /// that watched the context misbehave (a stale session mid-job).
    pub async fn release(&self, job: &JobId, discard_hint: bool) -> Result<(), SessionError> {
        let (_, entry) = self
            .active
            .remove(job)
            .ok_or_else(|| SessionError::UnknownJob { job: job.clone() })?;

        let reason = if discard_hint {
            Some("caller")
        } else if entry.uses >= self.config.max_uses {
            Some("max_uses")
        } else if entry.age() >= self.config.max_lifetime {
            Some("max_lifetime")
        } else if entry.clone.epoch < self.factory.master().epoch() {
            Some("epoch")
        } else {
            None
        };

        match reason {
            Some(reason) => {
                self.discard(entry, reason).await;
                self.replace_discarded().await;
            }
            None => match self.refurbish(&entry).await {
                Ok(()) => {
                    debug!(target: "pool", job = %job, id = %entry.clone.handle.id, "context returned to the ready queue");
                    self.ready.lock().push_back(entry);
                }
                Err(err) => {
                    warn!(target: "pool", job = %job, error = %err, "context refurbish failed");
                    self.discard(entry, "refurbish_failed").await;
                    self.replace_discarded().await;
                }
            },
        }
        self.publish_occupancy();
        Ok(())
    }

    /// Top the ready queue up to the configured target. Failures are logged
    /// and retried on the next maintenance tick; a master mid-recovery skips
    /// the round entirely.
    pub async fn replenish(&self) {
        if !self.factory.master().usable() {
            return;
        }
        loop {
            let deficit = {
                let ready = self.ready.lock();
                self.config.target_ready.saturating_sub(ready.len())
            };
            if deficit == 0 {
                break;
            }
            match self.create().await {
                Ok(ctx) => self.ready.lock().push_back(ctx),
                Err(err) => {
                    warn!(target: "pool", error = %err, "pre-warm clone failed");
                    break;
                }
            }
        }
        self.publish_occupancy();
    }

    /// Destroy idle contexts that aged out or were issued from a replaced
    /// master while sitting in the queue.
    pub async fn sweep(&self) {
        let epoch = self.factory.master().epoch();
        let expired: Vec<PooledContext> = {
            let mut ready = self.ready.lock();
            let mut keep = VecDeque::with_capacity(ready.len());
            let mut out = Vec::new();
            while let Some(ctx) = ready.pop_front() {
                if ctx.clone.epoch < epoch || ctx.age() >= self.config.max_lifetime {
                    out.push(ctx);
                } else {
                    keep.push_back(ctx);
                }
            }
            *ready = keep;
            out
        };
        for ctx in expired {
            self.discard(ctx, "sweep").await;
        }
        self.publish_occupancy();
    }

    /// Destroy everything, checked out contexts included. Shutdown only.
    pub async fn drain(&self) {
        let mut doomed: Vec<PooledContext> = { self.ready.lock().drain(..).collect() };
        let jobs: Vec<JobId> = self.active.iter().map(|entry| entry.key().clone()).collect();
        for job in jobs {
            if let Some((_, ctx)) = self.active.remove(&job) {
                doomed.push(ctx);
            }
        }
        for ctx in doomed {
            if let Err(err) = self.factory.destroy_clone(&ctx.clone).await {
                warn!(target: "pool", error = %err, "failed to destroy context on drain");
            }
        }
        self.publish_occupancy();
    }

    async fn create(&self) -> Result<PooledContext, SessionError> {
        let clone = self
            .factory
            .clone_from_master()
            .await
            .map_err(map_engine_error)?;
        metrics::record_created();
        Ok(PooledContext::new(clone))
    }

    /// One-for-one replacement after a release-path recycle, so the ready
    /// queue does not shrink until the next maintenance tick. Failures fall
    /// back to that tick; a master mid-recovery skips the replacement.
    async fn replace_discarded(&self) {
        if !self.factory.master().usable() {
            return;
        }
        match self.create().await {
            Ok(ctx) => self.ready.lock().push_back(ctx),
            Err(err) => {
                warn!(target: "pool", error = %err, "replacement clone failed");
            }
        }
    }

    async fn refurbish(&self, entry: &PooledContext) -> Result<(), EngineError> {
        self.factory
            .engine()
            .clear_transient_state(&entry.clone.handle)
            .await?;
        self.factory.reseed_clone(&entry.clone)
    }

    async fn discard(&self, entry: PooledContext, reason: &str) {
        debug!(target: "pool", id = %entry.clone.handle.id, reason, "context recycled");
        metrics::record_recycled(reason);
        if let Err(err) = self.factory.destroy_clone(&entry.clone).await {
            warn!(target: "pool", id = %entry.clone.handle.id, error = %err, "failed to destroy recycled context");
        }
    }

    fn publish_occupancy(&self) {
        metrics::set_occupancy(self.ready.lock().len(), self.active.len());
    }
}

fn map_engine_error(err: EngineError) -> SessionError {
    match err {
        EngineError::MasterUnavailable => SessionError::ProbeUnreachable {
            reason: "master session not usable".into(),
        },
        other => SessionError::internal(format!("context creation failed: {other}")),
    }
}
