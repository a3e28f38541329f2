use lazy_static::lazy_static;
use prometheus::{core::Collector, opts, IntCounter, IntCounterVec, IntGauge, Registry};
use tracing::error;

lazy_static! {
    static ref READY_CONTEXTS: IntGauge = IntGauge::new(
        "formpilot_pool_ready_contexts",
        "Idle pre-warmed contexts available for acquire",
    )
    .unwrap();
    static ref ACTIVE_CONTEXTS: IntGauge = IntGauge::new(
        "formpilot_pool_active_contexts",
        "Contexts currently checked out by jobs",
    )
    .unwrap();
    static ref CONTEXTS_CREATED: IntCounter = IntCounter::new(
        "formpilot_pool_contexts_created_total",
        "Contexts cloned from the master session",
    )
    .unwrap();
    static ref CONTEXTS_RECYCLED: IntCounterVec = IntCounterVec::new(
        opts!(
            "formpilot_pool_contexts_recycled_total",
            "Contexts destroyed, grouped by recycling reason"
        ),
        &["reason"]
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register pool metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, READY_CONTEXTS.clone());
    register(registry, ACTIVE_CONTEXTS.clone());
    register(registry, CONTEXTS_CREATED.clone());
    register(registry, CONTEXTS_RECYCLED.clone());
}

pub fn set_occupancy(ready: usize, active: usize) {
    READY_CONTEXTS.set(ready as i64);
    ACTIVE_CONTEXTS.set(active as i64);
}

pub fn record_created() {
    CONTEXTS_CREATED.inc();
}

pub fn record_recycled(reason: &str) {
    CONTEXTS_RECYCLED.with_label_values(&[reason]).inc();
}
