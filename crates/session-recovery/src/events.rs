use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use formpilot_core_types::SessionError;
use parking_lot::Mutex;
use serde::Serialize;

use crate::model::RecoveryAttempt;

/// Diagnostics emitted by the keeper and monitor. Forwarded to a sink;
/// never consulted for control decisions.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    Attempt(RecoveryAttempt),
    LifetimeWarning {
        age_ratio: f64,
        at: DateTime<Utc>,
    },
    /// The highest level ran out of attempts; operators must intervene.
    CriticalExhaustion {
        reason: String,
        at: DateTime<Utc>,
    },
}

impl SessionEvent {
    pub fn lifetime_warning(age_ratio: f64) -> Self {
        Self::LifetimeWarning {
            age_ratio,
            at: Utc::now(),
        }
    }

    pub fn critical_exhaustion(reason: impl Into<String>) -> Self {
        Self::CriticalExhaustion {
            reason: reason.into(),
            at: Utc::now(),
        }
    }
}

/// Destination for session diagnostics (log stream, alerting pipeline).
#[async_trait]
pub trait RecoverySink: Send + Sync {
    async fn append(&self, event: SessionEvent) -> Result<(), SessionError>;
}

#[derive(Debug)]
struct BoundedRing<T> {
    capacity: usize,
    data: VecDeque<T>,
}

impl<T: Clone> BoundedRing<T> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            data: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    fn push(&mut self, item: T) {
        if self.data.len() == self.capacity {
            self.data.pop_front();
        }
        self.data.push_back(item);
    }

    fn snapshot(&self) -> Vec<T> {
        self.data.iter().cloned().collect()
    }
}

/// Keeps the most recent events in memory; good enough for the status
/// endpoint and for tests.
pub struct InMemoryRecoverySink {
    ring: Mutex<BoundedRing<SessionEvent>>,
}

impl InMemoryRecoverySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(BoundedRing::new(capacity)),
        }
    }

    pub fn snapshot(&self) -> Vec<SessionEvent> {
        self.ring.lock().snapshot()
    }
}

#[async_trait]
impl RecoverySink for InMemoryRecoverySink {
    async fn append(&self, event: SessionEvent) -> Result<(), SessionError> {
        self.ring.lock().push(event);
        Ok(())
    }
}

#[derive(Default)]
pub struct NoopRecoverySink;

impl NoopRecoverySink {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self)
    }
}

#[async_trait]
impl RecoverySink for NoopRecoverySink {
    async fn append(&self, _event: SessionEvent) -> Result<(), SessionError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ring_drops_oldest_beyond_capacity() {
        let sink = InMemoryRecoverySink::new(2);
        for i in 0..3u32 {
            sink.append(SessionEvent::lifetime_warning(f64::from(i)))
                .await
                .unwrap();
        }
        let events = sink.snapshot();
        assert_eq!(events.len(), 2);
        match &events[0] {
            SessionEvent::LifetimeWarning { age_ratio, .. } => assert_eq!(*age_ratio, 1.0),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
