use std::sync::Arc;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::events::{RecoverySink, SessionEvent};
use crate::model::KeeperState;
use crate::orchestrator::SessionKeeper;
use crate::probe::ProbeOutcome;

/// Periodic guardian of the master session. Probes on a fixed cadence,
/// triggers recovery on anything but `Alive`, and refreshes the session
/// proactively before the portal expires it.
pub struct HealthMonitor {
    keeper: Arc<SessionKeeper>,
    sink: Arc<dyn RecoverySink>,
}

impl HealthMonitor {
    pub fn new(keeper: Arc<SessionKeeper>, sink: Arc<dyn RecoverySink>) -> Self {
        Self { keeper, sink }
    }

    /// Run until the task is aborted. One slow check must not stack the
    /// next one behind it.
    pub async fn run(self) {
        let mut ticker = interval(self.keeper.config().monitor_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so startup recovery
        // and the monitor do not race for the same episode.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.check_once().await;
        }
    }

    /// One monitoring pass. Never panics and never propagates errors;
    /// anything actionable is routed through the keeper.
    pub async fn check_once(&self) {
        if self.keeper.state() == KeeperState::CriticallyFailed {
            debug!(target: "monitor", "keeper critically failed; standing down");
            return;
        }

        match self.keeper.probe_master().await {
            ProbeOutcome::Alive => {}
            outcome => {
                warn!(target: "monitor", outcome = outcome.as_str(), "master unhealthy, triggering recovery");
                self.keeper.recover().await;
                return;
            }
        }

        let ratio = self.keeper.session_age_ratio();
        let config = self.keeper.config();
        if ratio >= config.refresh_ratio {
            info!(target: "monitor", ratio, "session near end of life, refreshing proactively");
            self.keeper.recover().await;
        } else if ratio >= config.warn_ratio {
            if let Err(err) = self
                .sink
                .append(SessionEvent::lifetime_warning(ratio))
                .await
            {
                warn!(target: "monitor", error = %err, "failed to forward lifetime warning");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::InMemoryRecoverySink;
    use crate::model::RecoveryConfig;
    use crate::portal::PortalConfig;
    use async_trait::async_trait;
    use context_engine::{
        ChallengeSolver, ContextEngine, ContextHandle, ContextKind, EngineError, MasterSource,
        SolverError,
    };
    use parking_lot::Mutex;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;

    struct FlipEngine {
        portal: PortalConfig,
        authenticated: Mutex<bool>,
        reject_login: Mutex<bool>,
        logins: Mutex<u32>,
    }

    #[async_trait]
    impl ContextEngine for FlipEngine {
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
            if selector == self.portal.submit_button {
                *self.logins.lock() += 1;
                if !*self.reject_login.lock() {
                    *self.authenticated.lock() = true;
                }
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

    fn build(
        lifetime: Duration,
    ) -> (
        Arc<FlipEngine>,
        Arc<SessionKeeper>,
        HealthMonitor,
        Arc<InMemoryRecoverySink>,
    ) {
        let engine = Arc::new(FlipEngine {
            portal: PortalConfig::default(),
            authenticated: Mutex::new(false),
            reject_login: Mutex::new(false),
            logins: Mutex::new(0),
        });
        let config = RecoveryConfig {
            probe_timeout: Duration::from_secs(1),
            login_timeout: Duration::from_secs(5),
            session_lifetime: lifetime,
            ..RecoveryConfig::default()
        };
        let dir = tempdir().unwrap();
        let sink = Arc::new(InMemoryRecoverySink::new(16));
        let keeper = Arc::new(
            SessionKeeper::new(
                engine.clone(),
                Arc::new(OkSolver),
                PortalConfig::default(),
                config,
                dir.into_path().join("master"),
                sink.clone() as Arc<dyn RecoverySink>,
            )
            .unwrap(),
        );
        let monitor = HealthMonitor::new(keeper.clone(), sink.clone());
        (engine, keeper, monitor, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn stale_master_is_repaired_by_the_monitor() {
        let (engine, keeper, monitor, _) = build(Duration::from_secs(3600));
        assert!(keeper.recover().await);

        *engine.authenticated.lock() = false;
        monitor.check_once().await;
        assert!(keeper.usable());
        assert_eq!(*engine.logins.lock(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_master_is_left_alone() {
        let (engine, keeper, monitor, _) = build(Duration::from_secs(3600));
        assert!(keeper.recover().await);

        let logins_before = *engine.logins.lock();
        monitor.check_once().await;
        assert_eq!(*engine.logins.lock(), logins_before);
    }

    #[tokio::test(start_paused = true)]
    async fn session_past_refresh_threshold_is_replaced() {
        // A zero-length lifetime makes any session immediately due.
        let (engine, keeper, monitor, _) = build(Duration::from_secs(0));
        assert!(keeper.recover().await);

        let logins_before = *engine.logins.lock();
        monitor.check_once().await;
        // Still alive, so this is the proactive refresh path.
        assert_eq!(*engine.logins.lock(), logins_before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn aging_session_gets_a_warning_but_no_refresh() {
        let (engine, keeper, monitor, sink) = build(Duration::from_secs(3600));
        assert!(keeper.recover().await);
        // 85% of the lifetime: inside the warning band, below refresh.
        keeper.backdate_session(chrono::Duration::seconds(3060));

        let logins_before = *engine.logins.lock();
        monitor.check_once().await;
        assert_eq!(*engine.logins.lock(), logins_before, "no refresh yet");
        assert!(sink
            .snapshot()
            .iter()
            .any(|event| matches!(event, SessionEvent::LifetimeWarning { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn critically_failed_keeper_stands_down() {
        let (engine, keeper, monitor, _) = build(Duration::from_secs(3600));
        *engine.reject_login.lock() = true;
        assert!(!keeper.recover().await);
        assert_eq!(keeper.state(), KeeperState::CriticallyFailed);

        let logins_before = *engine.logins.lock();
        monitor.check_once().await;
        assert_eq!(keeper.state(), KeeperState::CriticallyFailed);
        assert_eq!(*engine.logins.lock(), logins_before);
    }
}
