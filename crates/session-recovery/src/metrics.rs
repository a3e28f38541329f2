use lazy_static::lazy_static;
use prometheus::{core::Collector, opts, IntCounterVec, IntGauge, Registry};
use tracing::error;

use crate::model::{KeeperState, RecoveryLevel};
use crate::probe::ProbeOutcome;

lazy_static! {
    static ref RECOVERY_ATTEMPTS: IntCounterVec = IntCounterVec::new(
        opts!(
            "formpilot_recovery_attempts_total",
            "Recovery attempts grouped by level and outcome"
        ),
        &["level", "outcome"]
    )
    .unwrap();
    static ref KEEPER_STATE: IntGauge = IntGauge::new(
        "formpilot_keeper_state",
        "Keeper state (0=idle, 1=recovering, 2=critically_failed)",
    )
    .unwrap();
    static ref PROBES: IntCounterVec = IntCounterVec::new(
        opts!(
            "formpilot_probes_total",
            "Master probes grouped by outcome"
        ),
        &["outcome"]
    )
    .unwrap();
    static ref MASTER_EPOCH: IntGauge = IntGauge::new(
        "formpilot_master_epoch",
        "Generation counter of the master session",
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register recovery metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, RECOVERY_ATTEMPTS.clone());
    register(registry, KEEPER_STATE.clone());
    register(registry, PROBES.clone());
    register(registry, MASTER_EPOCH.clone());
}

pub fn record_attempt(level: RecoveryLevel, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    RECOVERY_ATTEMPTS
        .with_label_values(&[level.as_str(), outcome])
        .inc();
}

pub fn set_state(state: KeeperState) {
    let value = match state {
        KeeperState::Idle => 0,
        KeeperState::Recovering => 1,
        KeeperState::CriticallyFailed => 2,
    };
    KEEPER_STATE.set(value);
}

pub fn record_probe(outcome: ProbeOutcome) {
    PROBES.with_label_values(&[outcome.as_str()]).inc();
}

pub fn set_epoch(epoch: u64) {
    MASTER_EPOCH.set(epoch as i64);
}
