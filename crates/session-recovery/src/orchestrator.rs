use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use context_engine::{
    ChallengeSolver, ContextEngine, ContextHandle, ContextKind, EngineError, MasterSource,
    ProfileStore,
};
use formpilot_core_types::SessionError;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::auth::PortalAuthenticator;
use crate::events::{RecoverySink, SessionEvent};
use crate::metrics;
use crate::model::{Budgets, KeeperState, RecoveryAttempt, RecoveryConfig, RecoveryLevel};
use crate::portal::PortalConfig;
use crate::probe::{HealthProber, ProbeOutcome};

/// Mutable master session state. Only the keeper writes it.
struct MasterState {
    handle: Option<ContextHandle>,
    active: bool,
    last_verified_at: Option<DateTime<Utc>>,
    /// Birth of the current portal session (last successful authentication).
    created_at: Option<DateTime<Utc>>,
}

/// Snapshot returned by [`SessionKeeper::status`].
#[derive(Clone, Debug, Serialize)]
pub struct KeeperStatus {
    pub state: KeeperState,
    pub master_active: bool,
    pub last_verified_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub epoch: u64,
    pub budgets: Budgets,
    /// Most recent recovery attempts, oldest first, bounded by
    /// `RecoveryConfig::history_limit`.
    pub history: Vec<RecoveryAttempt>,
}

enum StepFailure {
    /// Attempt failed; retry at the same level if budget remains.
    Retry(String),
    /// Attempt failed in a way that makes the current level pointless;
    /// skip whatever budget it has left.
    Escalate(RecoveryLevel, String),
}

/// The recovery orchestrator. Owns the single master execution context and
/// repairs it through the soft/hard/nuclear escalation protocol.
///
/// Concurrent `recover()` calls are deduplicated into one in-flight episode:
/// the first caller installs a broadcast channel before doing any work and
/// every later caller waits on it, so N observers of the same stale master
/// produce exactly one repair sequence and share its outcome.
pub struct SessionKeeper {
    engine: Arc<dyn ContextEngine>,
    prober: HealthProber,
    authenticator: PortalAuthenticator,
    sink: Arc<dyn RecoverySink>,
    config: RecoveryConfig,
    store: ProfileStore,
    master: RwLock<MasterState>,
    budgets: Mutex<Budgets>,
    state: RwLock<KeeperState>,
    inflight: tokio::sync::Mutex<Option<broadcast::Sender<bool>>>,
    history: RwLock<VecDeque<RecoveryAttempt>>,
    epoch: AtomicU64,
}

impl SessionKeeper {
    pub fn new(
        engine: Arc<dyn ContextEngine>,
        solver: Arc<dyn ChallengeSolver>,
        portal: PortalConfig,
        config: RecoveryConfig,
        store_path: impl Into<PathBuf>,
        sink: Arc<dyn RecoverySink>,
    ) -> Result<Self, SessionError> {
        let store = ProfileStore::new(store_path);
        store
            .ensure()
            .map_err(|err| SessionError::StoreCorrupted {
                reason: err.to_string(),
            })?;
        let prober = HealthProber::new(Arc::clone(&engine), portal.clone(), config.probe_timeout);
        let authenticator = PortalAuthenticator::new(
            Arc::clone(&engine),
            solver,
            portal,
            config.probe_timeout,
            config.login_timeout,
        );
        let budgets = Budgets::from_config(&config);
        Ok(Self {
            engine,
            prober,
            authenticator,
            sink,
            config,
            store,
            master: RwLock::new(MasterState {
                handle: None,
                active: false,
                last_verified_at: None,
                created_at: None,
            }),
            budgets: Mutex::new(budgets),
            state: RwLock::new(KeeperState::Idle),
            inflight: tokio::sync::Mutex::new(None),
            history: RwLock::new(VecDeque::new()),
            epoch: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn state(&self) -> KeeperState {
        *self.state.read()
    }

    fn set_state(&self, state: KeeperState) {
        *self.state.write() = state;
        metrics::set_state(state);
    }

    pub fn status(&self) -> KeeperStatus {
        let master = self.master.read();
        KeeperStatus {
            state: self.state(),
            master_active: master.active,
            last_verified_at: master.last_verified_at,
            created_at: master.created_at,
            epoch: self.epoch.load(Ordering::SeqCst),
            budgets: *self.budgets.lock(),
            history: self.history(),
        }
    }

    pub fn history(&self) -> Vec<RecoveryAttempt> {
        self.history.read().iter().cloned().collect()
    }

    /// Shift the session's birth into the past to exercise age thresholds.
    #[cfg(test)]
    pub(crate) fn backdate_session(&self, by: chrono::Duration) {
        let mut master = self.master.write();
        master.created_at = master.created_at.map(|at| at - by);
    }

    /// Age of the last successful verification, `None` if never verified.
    pub fn verified_age(&self) -> Option<Duration> {
        self.master
            .read()
            .last_verified_at
            .map(|at| (Utc::now() - at).to_std().unwrap_or_default())
    }

    /// Session age as a fraction of the configured lifetime. `1.0` when no
    /// session exists, which makes an unborn master look due for refresh.
    pub fn session_age_ratio(&self) -> f64 {
        let created_at = self.master.read().created_at;
        match created_at {
            None => 1.0,
            Some(at) => {
                let age = (Utc::now() - at).to_std().unwrap_or_default();
                age.as_secs_f64() / self.config.session_lifetime.as_secs_f64().max(f64::EPSILON)
            }
        }
    }

    /// Probe the master context. An `Alive` outcome refreshes
    /// `last_verified_at`; a missing master reads as `Unreachable`.
    pub async fn probe_master(&self) -> ProbeOutcome {
        let handle = { self.master.read().handle.clone() };
        let Some(handle) = handle else {
            return ProbeOutcome::Unreachable;
        };
        let outcome = self.prober.probe(&handle).await;
        if outcome == ProbeOutcome::Alive {
            let mut master = self.master.write();
            master.active = true;
            master.last_verified_at = Some(Utc::now());
        }
        outcome
    }

    /// Repair the master session, joining any in-flight repair.
    ///
    /// Returns `true` once the master is authenticated again, `false` when
    /// the escalation protocol is exhausted. In `CriticallyFailed` state this
    /// returns `false` immediately; use [`force_recover`](Self::force_recover)
    /// after investigating.
    pub async fn recover(&self) -> bool {
        if self.state() == KeeperState::CriticallyFailed {
            warn!(target: "keeper", "recover requested while critically failed; external reset required");
            return false;
        }
        let role = {
            let mut inflight = self.inflight.lock().await;
            match inflight.as_ref() {
                Some(tx) => Err(tx.subscribe()),
                None => {
                    let (tx, _) = broadcast::channel(4);
                    *inflight = Some(tx.clone());
                    self.set_state(KeeperState::Recovering);
                    Ok(tx)
                }
            }
        };
        match role {
            Ok(tx) => {
                let outcome = self.run_recovery().await;
                // Publish and clear under the same lock so no caller can
                // subscribe between the send and the reset.
                let mut inflight = self.inflight.lock().await;
                let _ = tx.send(outcome);
                *inflight = None;
                outcome
            }
            Err(mut rx) => rx.recv().await.unwrap_or(false),
        }
    }

    /// Administrative escape hatch: clears a terminal `CriticallyFailed`
    /// state and the attempt budgets, then runs a normal recovery episode.
    pub async fn force_recover(&self) -> bool {
        if self.state() == KeeperState::CriticallyFailed {
            info!(target: "keeper", "external reset of critically failed keeper");
            self.budgets.lock().reset_all();
            self.set_state(KeeperState::Idle);
        }
        self.recover().await
    }

    /// Tear down the master context at process shutdown.
    pub async fn shutdown(&self) {
        let handle = { self.master.write().handle.take() };
        if let Some(handle) = handle {
            if let Err(err) = self.engine.destroy(&handle).await {
                warn!(target: "keeper", error = %err, "failed to destroy master context on shutdown");
            }
        }
    }

    async fn run_recovery(&self) -> bool {
        {
            self.master.write().active = false;
        }
        info!(target: "keeper", "recovery episode started");
        let mut level = RecoveryLevel::Soft;
        loop {
            let exhausted = self.budgets.lock().level(level).exhausted();
            if exhausted {
                match level.next() {
                    Some(next) => {
                        level = next;
                        continue;
                    }
                    None => {
                        self.enter_critical("nuclear retry budget exhausted").await;
                        return false;
                    }
                }
            }
            self.budgets.lock().level_mut(level).charge();

            let step = match level {
                RecoveryLevel::Soft => self.soft_attempt().await,
                RecoveryLevel::Hard => self.hard_attempt().await,
                RecoveryLevel::Nuclear => self.nuclear_attempt().await,
            };
            match step {
                Ok(()) => {
                    self.record_attempt(level, true, "recovered").await;
                    self.mark_recovered(level);
                    return true;
                }
                Err(StepFailure::Retry(reason)) => {
                    self.record_attempt(level, false, &reason).await;
                }
                Err(StepFailure::Escalate(next, reason)) => {
                    self.record_attempt(level, false, &reason).await;
                    level = next;
                }
            }
        }
    }

    /// Soft: the existing context still responds; re-authenticate in place.
    async fn soft_attempt(&self) -> Result<(), StepFailure> {
        let handle = { self.master.read().handle.clone() };
        let Some(handle) = handle else {
            return Err(StepFailure::Escalate(
                RecoveryLevel::Hard,
                "no master context exists".into(),
            ));
        };
        match self.prober.probe(&handle).await {
            // Alive but near the portal's session lifetime still warrants a
            // fresh login, otherwise a proactive refresh would be a no-op.
            ProbeOutcome::Alive => {
                if self.session_age_ratio() >= self.config.refresh_ratio {
                    self.login_in_place(&handle).await
                } else {
                    Ok(())
                }
            }
            ProbeOutcome::Unreachable => Err(StepFailure::Escalate(
                RecoveryLevel::Hard,
                "master context unreachable".into(),
            )),
            // A timed-out probe leaves the verdict unknown; retry in place
            // until the soft budget runs out.
            ProbeOutcome::TimedOut { elapsed_ms } => Err(StepFailure::Retry(
                SessionError::ProbeTimeout { elapsed_ms }.to_string(),
            )),
            ProbeOutcome::Stale => self.login_in_place(&handle).await,
        }
    }

    async fn login_in_place(&self, handle: &ContextHandle) -> Result<(), StepFailure> {
        match self.authenticator.login(handle).await {
            Ok(()) => Ok(()),
            Err(SessionError::ProbeUnreachable { reason }) => {
                Err(StepFailure::Escalate(RecoveryLevel::Hard, reason))
            }
            Err(err) => Err(StepFailure::Retry(err.to_string())),
        }
    }

    /// Hard: discard the context, relaunch on the same persistent store.
    async fn hard_attempt(&self) -> Result<(), StepFailure> {
        self.discard_master().await;
        let handle = match self
            .engine
            .create_context(ContextKind::Master, self.store.path())
            .await
        {
            Ok(handle) => handle,
            Err(EngineError::Store(err)) => {
                return Err(StepFailure::Escalate(
                    RecoveryLevel::Nuclear,
                    format!("persistent store unusable: {err}"),
                ))
            }
            Err(err) => {
                return Err(StepFailure::Retry(format!("master relaunch failed: {err}")))
            }
        };
        match self.authenticator.login(&handle).await {
            Ok(()) => {
                self.install_master(handle);
                Ok(())
            }
            Err(err) => {
                if let Err(destroy_err) = self.engine.destroy(&handle).await {
                    warn!(target: "keeper", error = %destroy_err, "failed to destroy rejected context");
                }
                Err(StepFailure::Retry(format!(
                    "fresh context login failed: {err}"
                )))
            }
        }
    }

    /// Nuclear: back the store up, wipe it, authenticate from a blank state.
    /// On failure the backup is restored so the system is no worse off.
    async fn nuclear_attempt(&self) -> Result<(), StepFailure> {
        self.discard_master().await;
        let backup = match self.store.backup() {
            Ok(path) => path,
            Err(err) => return Err(StepFailure::Retry(format!("store backup failed: {err}"))),
        };
        if let Err(err) = self.store.reset() {
            self.restore_backup(&backup);
            return Err(StepFailure::Retry(format!("store reset failed: {err}")));
        }
        warn!(target: "keeper", backup = %backup.display(), "persistent store wiped for blank-state authentication");

        let handle = match self
            .engine
            .create_context(ContextKind::Master, self.store.path())
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                self.restore_backup(&backup);
                return Err(StepFailure::Retry(format!(
                    "blank-store launch failed: {err}"
                )));
            }
        };
        match self.authenticator.login(&handle).await {
            Ok(()) => {
                // The backup stays on disk for operators to inspect.
                self.install_master(handle);
                Ok(())
            }
            Err(err) => {
                if let Err(destroy_err) = self.engine.destroy(&handle).await {
                    warn!(target: "keeper", error = %destroy_err, "failed to destroy rejected context");
                }
                self.restore_backup(&backup);
                Err(StepFailure::Retry(format!(
                    "blank-store login failed: {err}"
                )))
            }
        }
    }

    fn restore_backup(&self, backup: &std::path::Path) {
        if let Err(err) = self.store.restore(backup) {
            error!(target: "keeper", error = %err, backup = %backup.display(), "backup restore failed; store left in wiped state");
        }
    }

    async fn discard_master(&self) {
        let old = { self.master.write().handle.take() };
        if let Some(old) = old {
            if let Err(err) = self.engine.destroy(&old).await {
                warn!(target: "keeper", error = %err, "failed to destroy stale master context");
            }
        }
    }

    /// Swap in a replacement master context. Bumping the epoch is what
    /// invalidates every clone issued from the previous one.
    fn install_master(&self, handle: ContextHandle) {
        self.master.write().handle = Some(handle);
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_epoch(epoch);
    }

    fn mark_recovered(&self, level: RecoveryLevel) {
        let now = Utc::now();
        {
            let mut master = self.master.write();
            master.active = true;
            master.last_verified_at = Some(now);
            master.created_at = Some(now);
        }
        self.budgets.lock().reset_all();
        self.set_state(KeeperState::Idle);
        info!(target: "keeper", level = level.as_str(), "master session recovered");
    }

    async fn enter_critical(&self, reason: &str) {
        self.set_state(KeeperState::CriticallyFailed);
        error!(target: "keeper", reason, "recovery exhausted; manual intervention required");
        if let Err(err) = self
            .sink
            .append(SessionEvent::critical_exhaustion(reason))
            .await
        {
            warn!(target: "keeper", error = %err, "failed to forward critical alert");
        }
    }

    async fn record_attempt(&self, level: RecoveryLevel, success: bool, reason: &str) {
        let attempt = RecoveryAttempt::new(level, success, reason);
        {
            let mut history = self.history.write();
            if history.len() == self.config.history_limit {
                history.pop_front();
            }
            history.push_back(attempt.clone());
        }
        metrics::record_attempt(level, success);
        if success {
            info!(target: "keeper", level = level.as_str(), "recovery attempt succeeded");
        } else {
            warn!(target: "keeper", level = level.as_str(), reason, "recovery attempt failed");
        }
        if let Err(err) = self.sink.append(SessionEvent::Attempt(attempt)).await {
            warn!(target: "keeper", error = %err, "failed to forward attempt record");
        }
    }
}

impl MasterSource for SessionKeeper {
    fn usable(&self) -> bool {
        self.state() == KeeperState::Idle && self.master.read().active
    }

    fn store_path(&self) -> PathBuf {
        self.store.path().to_path_buf()
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }
}
