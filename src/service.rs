use std::future::Future;
use std::sync::Arc;

use context_engine::{
    CdpContextEngine, ChallengeSolver, ContextEngine, ContextFactory, ContextHandle,
    HttpChallengeSolver, MasterSource,
};
use formpilot_context_pool::{ContextPool, PoolMaintenance, PoolStats};
use formpilot_core_types::{JobId, SessionError};
use formpilot_session_recovery::{
    HealthMonitor, InMemoryRecoverySink, KeeperState, KeeperStatus, ProbeOutcome, RecoverySink,
    SessionEvent, SessionKeeper,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::AppConfig;

/// What one unit of job work tells the service about its context.
pub enum JobStep<T> {
    Done(T),
    /// The portal bounced the context to a login surface mid-job. The step's
    /// work must be retried on a fresh context after the master is repaired.
    StaleContext,
}

#[derive(Clone, Debug, Serialize)]
pub struct ServiceStatus {
    pub keeper: KeeperStatus,
    pub pool: PoolStats,
}

/// Facade every job goes through. Ties the recovery keeper, the clone pool
/// and the background guardians together and enforces the consumption
/// contract: master verified before acquire, stale contexts reported back
/// and retried on a fresh clone.
pub struct SessionService {
    keeper: Arc<SessionKeeper>,
    pool: Arc<ContextPool>,
    sink: Arc<InMemoryRecoverySink>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionService {
    pub fn build(config: &AppConfig) -> Result<Arc<Self>, SessionError> {
        let engine: Arc<dyn ContextEngine> = Arc::new(CdpContextEngine::new(config.engine.clone()));
        let solver: Arc<dyn ChallengeSolver> =
            Arc::new(HttpChallengeSolver::new(config.solver.clone()));
        Self::assemble(engine, solver, config)
    }

    pub fn assemble(
        engine: Arc<dyn ContextEngine>,
        solver: Arc<dyn ChallengeSolver>,
        config: &AppConfig,
    ) -> Result<Arc<Self>, SessionError> {
        let sink = Arc::new(InMemoryRecoverySink::new(128));
        let keeper = Arc::new(SessionKeeper::new(
            Arc::clone(&engine),
            solver,
            config.portal.clone(),
            config.recovery.clone(),
            config.stores.master_store.clone(),
            sink.clone() as Arc<dyn RecoverySink>,
        )?);
        let factory = Arc::new(ContextFactory::new(
            engine,
            keeper.clone() as Arc<dyn MasterSource>,
            config.stores.clones_root.clone(),
        ));
        let pool = Arc::new(ContextPool::new(factory, config.pool.clone()));
        Ok(Arc::new(Self {
            keeper,
            pool,
            sink,
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// Authenticate the master and launch the background guardians.
    pub async fn start(self: &Arc<Self>) {
        if self.keeper.recover().await {
            self.pool.replenish().await;
        } else {
            warn!(target: "service", "initial authentication failed; manual intervention may be required");
        }
        let monitor = HealthMonitor::new(
            self.keeper.clone(),
            self.sink.clone() as Arc<dyn RecoverySink>,
        );
        let maintenance = PoolMaintenance::new(self.pool.clone());
        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(monitor.run()));
        tasks.push(tokio::spawn(maintenance.run()));
        info!(target: "service", "session service started");
    }

    /// Check a disposable context out for a job, verifying master health
    /// first when the last verification is older than the staleness window.
    pub async fn acquire(&self, job: &JobId) -> Result<ContextHandle, SessionError> {
        self.ensure_master().await?;
        self.pool.acquire(job).await
    }

    pub async fn release(&self, job: &JobId) -> Result<(), SessionError> {
        self.pool.release(job, false).await
    }

    /// A job saw its context bounce to a login surface. The context is
    /// destroyed (its snapshot is tainted) and the master gets repaired
    /// before the job retries.
    pub async fn report_stale(&self, job: &JobId) -> Result<(), SessionError> {
        self.pool.release(job, true).await?;
        if self.keeper.recover().await {
            Ok(())
        } else {
            Err(SessionError::RecoveryExhausted)
        }
    }

    /// Run one job under the consumption contract: acquire, work, release,
    /// with up to `stale_retries` fresh contexts when the portal session
    /// turns out stale mid-job.
    pub async fn run_job<T, F, Fut>(
        &self,
        job: &JobId,
        stale_retries: u32,
        mut work: F,
    ) -> Result<T, SessionError>
    where
        F: FnMut(ContextHandle) -> Fut,
        Fut: Future<Output = Result<JobStep<T>, SessionError>>,
    {
        for attempt in 0..=stale_retries {
            let handle = self.acquire(job).await?;
            match work(handle).await {
                Ok(JobStep::Done(value)) => {
                    self.release(job).await?;
                    return Ok(value);
                }
                Ok(JobStep::StaleContext) => {
                    warn!(target: "service", job = %job, attempt, "stale context reported mid-job");
                    self.report_stale(job).await?;
                }
                Err(err) => {
                    // Job-level failure; the context state is suspect.
                    if let Err(release_err) = self.pool.release(job, true).await {
                        warn!(target: "service", job = %job, error = %release_err, "release after job failure also failed");
                    }
                    return Err(err);
                }
            }
        }
        Err(SessionError::internal(format!(
            "job {job} exhausted its stale-context retries"
        )))
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            keeper: self.keeper.status(),
            pool: self.pool.stats(),
        }
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.sink.snapshot()
    }

    /// Administrative reset and re-authentication, usable even from the
    /// terminal `CriticallyFailed` state.
    pub async fn force_recover(&self) -> bool {
        self.keeper.force_recover().await
    }

    pub async fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }
        self.pool.drain().await;
        self.keeper.shutdown().await;
        info!(target: "service", "session service stopped");
    }

    async fn ensure_master(&self) -> Result<(), SessionError> {
        if self.keeper.state() == KeeperState::CriticallyFailed {
            return Err(SessionError::RecoveryExhausted);
        }
        let stale = match self.keeper.verified_age() {
            None => true,
            Some(age) => age > self.keeper.config().staleness_threshold,
        };
        if !stale {
            return Ok(());
        }
        match self.keeper.probe_master().await {
            ProbeOutcome::Alive => Ok(()),
            outcome => {
                info!(target: "service", outcome = outcome.as_str(), "master stale before acquire, recovering");
                if self.keeper.recover().await {
                    Ok(())
                } else {
                    Err(SessionError::RecoveryExhausted)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use async_trait::async_trait;
    use context_engine::{ContextKind, EngineError, SolverError};
    use formpilot_session_recovery::{PortalConfig, RecoveryConfig};
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    struct PortalEngine {
        portal: PortalConfig,
        authenticated: Mutex<bool>,
        reject_login: Mutex<bool>,
    }

    #[async_trait]
    impl ContextEngine for PortalEngine {
        async fn create_context(
            &self,
            kind: ContextKind,
            store: &Path,
        ) -> Result<ContextHandle, EngineError> {
            Ok(ContextHandle::new(kind, store))
        }

        async fn navigate(
            &self,
            _ctx: &ContextHandle,
            _url: &str,
            _timeout: Duration,
        ) -> Result<(), EngineError> {
            Ok(())
        }

        async fn has_marker(
            &self,
            _ctx: &ContextHandle,
            selector: &str,
            _timeout: Duration,
        ) -> Result<bool, EngineError> {
            let authenticated = *self.authenticated.lock();
            if selector == self.portal.authenticated_marker {
                Ok(authenticated)
            } else {
                Ok(!authenticated)
            }
        }

        async fn fill_field(
            &self,
            _ctx: &ContextHandle,
            _selector: &str,
            _value: &str,
        ) -> Result<(), EngineError> {
            Ok(())
        }

        async fn click(&self, _ctx: &ContextHandle, selector: &str) -> Result<(), EngineError> {
            if selector == self.portal.submit_button && !*self.reject_login.lock() {
                *self.authenticated.lock() = true;
            }
            Ok(())
        }

        async fn capture_image(
            &self,
            _ctx: &ContextHandle,
            _selector: &str,
        ) -> Result<Vec<u8>, EngineError> {
            Ok(vec![0])
        }

        async fn clear_transient_state(&self, _ctx: &ContextHandle) -> Result<(), EngineError> {
            Ok(())
        }

        async fn destroy(&self, _ctx: &ContextHandle) -> Result<(), EngineError> {
            Ok(())
        }
    }

    struct OkSolver;

    #[async_trait]
    impl ChallengeSolver for OkSolver {
        async fn solve(&self, _image: &[u8]) -> Result<String, SolverError> {
            Ok("abcd".into())
        }
    }

    fn test_service(dir: &Path) -> (Arc<PortalEngine>, Arc<SessionService>) {
        let engine = Arc::new(PortalEngine {
            portal: PortalConfig::default(),
            authenticated: Mutex::new(false),
            reject_login: Mutex::new(false),
        });
        let config = AppConfig {
            recovery: RecoveryConfig {
                probe_timeout: Duration::from_secs(1),
                login_timeout: Duration::from_secs(5),
                ..RecoveryConfig::default()
            },
            stores: StoreConfig {
                master_store: dir.join("master"),
                clones_root: dir.join("clones"),
            },
            ..AppConfig::default()
        };
        let service =
            SessionService::assemble(engine.clone(), Arc::new(OkSolver), &config).unwrap();
        (engine, service)
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_bootstraps_the_master_session() {
        let dir = tempdir().unwrap();
        let (_engine, service) = test_service(dir.path());

        let job = JobId::new();
        let handle = service.acquire(&job).await.unwrap();
        assert_eq!(handle.kind, ContextKind::Clone);

        let status = service.status();
        assert_eq!(status.keeper.state, KeeperState::Idle);
        assert_eq!(status.pool.active, 1);
        service.release(&job).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_fails_fast_when_keeper_is_terminal() {
        let dir = tempdir().unwrap();
        let (engine, service) = test_service(dir.path());
        *engine.reject_login.lock() = true;
        assert!(!service.keeper.recover().await);

        let result = service.acquire(&JobId::new()).await;
        assert!(matches!(result, Err(SessionError::RecoveryExhausted)));
    }

    #[tokio::test(start_paused = true)]
    async fn run_job_retries_once_on_stale_context() {
        let dir = tempdir().unwrap();
        let (engine, service) = test_service(dir.path());

        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_work = calls.clone();
        let engine_in_work = engine.clone();
        let job = JobId::new();
        let result = service
            .run_job(&job, 2, move |_handle| {
                let calls = calls_in_work.clone();
                let engine = engine_in_work.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        // Simulate the portal expiring the session mid-job.
                        *engine.authenticated.lock() = false;
                        Ok(JobStep::StaleContext)
                    } else {
                        Ok(JobStep::Done(42u32))
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // The tainted context was destroyed, nothing left checked out.
        assert_eq!(service.status().pool.active, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn run_job_fails_when_recovery_is_exhausted() {
        let dir = tempdir().unwrap();
        let (engine, service) = test_service(dir.path());

        let engine_in_work = engine.clone();
        let job = JobId::new();
        let result: Result<u32, _> = service
            .run_job(&job, 3, move |_handle| {
                let engine = engine_in_work.clone();
                async move {
                    *engine.authenticated.lock() = false;
                    *engine.reject_login.lock() = true;
                    Ok(JobStep::StaleContext)
                }
            })
            .await;

        assert!(matches!(result, Err(SessionError::RecoveryExhausted)));
        assert_eq!(service.status().keeper.state, KeeperState::CriticallyFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn force_recover_clears_a_terminal_keeper() {
        let dir = tempdir().unwrap();
        let (engine, service) = test_service(dir.path());
        *engine.reject_login.lock() = true;
        assert!(!service.keeper.recover().await);

        *engine.reject_login.lock() = false;
        assert!(service.force_recover().await);
        assert!(service.acquire(&JobId::new()).await.is_ok());
    }
}
