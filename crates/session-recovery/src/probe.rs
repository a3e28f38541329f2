use std::sync::Arc;
use std::time::Duration;

use context_engine::{ContextEngine, ContextHandle, EngineError};
use serde::Serialize;
use tracing::debug;

use crate::metrics;
use crate::portal::PortalConfig;

/// Result of probing one execution context.
///
/// `Stale` means the context responded but is logged out; `Unreachable` means
/// the context itself cannot respond; `TimedOut` means the verdict is unknown
/// because the portal did not answer within the probe budget. The distinction
/// drives escalation: stale contexts get a login attempt in place, timed-out
/// probes are retried in place, unreachable contexts are replaced.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    Alive,
    Stale,
    Unreachable,
    TimedOut { elapsed_ms: u64 },
}

impl ProbeOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Alive => "alive",
            Self::Stale => "stale",
            Self::Unreachable => "unreachable",
            Self::TimedOut { .. } => "timed_out",
        }
    }
}

/// Side-effect-free health decision: navigate to the authenticated landing
/// surface and look for the authenticated-only vs unauthenticated-only marker.
pub struct HealthProber {
    engine: Arc<dyn ContextEngine>,
    portal: PortalConfig,
    timeout: Duration,
}

impl HealthProber {
    pub fn new(engine: Arc<dyn ContextEngine>, portal: PortalConfig, timeout: Duration) -> Self {
        Self {
            engine,
            portal,
            timeout,
        }
    }

    pub async fn probe(&self, ctx: &ContextHandle) -> ProbeOutcome {
        let outcome = self.classify(ctx).await;
        metrics::record_probe(outcome);
        debug!(target: "probe", id = %ctx.id, outcome = outcome.as_str(), "probe finished");
        outcome
    }

    async fn classify(&self, ctx: &ContextHandle) -> ProbeOutcome {
        if let Err(err) = self
            .engine
            .navigate(ctx, &self.portal.landing_url, self.timeout)
            .await
        {
            debug!(target: "probe", id = %ctx.id, error = %err, "landing navigation failed");
            return failure_outcome(&err);
        }
        match self
            .engine
            .has_marker(ctx, &self.portal.authenticated_marker, self.timeout)
            .await
        {
            Ok(true) => return ProbeOutcome::Alive,
            Ok(false) => {}
            Err(err) => return failure_outcome(&err),
        }
        match self
            .engine
            .has_marker(ctx, &self.portal.unauthenticated_marker, self.timeout)
            .await
        {
            Ok(true) => ProbeOutcome::Stale,
            // The page responded but matches neither surface. A login attempt
            // is cheap and safe, so classify as logged out.
            Ok(false) => ProbeOutcome::Stale,
            Err(err) => failure_outcome(&err),
        }
    }
}

/// A timed-out round trip leaves the context's health unknown; everything
/// else on the failure path means the context itself is broken.
fn failure_outcome(err: &EngineError) -> ProbeOutcome {
    match err {
        EngineError::NavTimeout(elapsed) => ProbeOutcome::TimedOut {
            elapsed_ms: elapsed.as_millis() as u64,
        },
        _ => ProbeOutcome::Unreachable,
    }
}
