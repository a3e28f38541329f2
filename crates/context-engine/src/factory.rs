use std::path::PathBuf;
use std::sync::Arc;

use formpilot_core_types::ContextId;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::profile::ProfileStore;
use crate::{ContextEngine, ContextHandle, ContextKind};

/// Read-only view of the master session exposed to the factory and the pool.
///
/// The recovery orchestrator is the only writer of master state; everything
/// else observes it through this trait. The epoch increases every time the
/// master context is replaced, which is how previously issued clones are
/// recognized as invalid.
pub trait MasterSource: Send + Sync {
    /// Whether the master is currently authenticated and not mid-recovery.
    fn usable(&self) -> bool;
    /// Path of the named persistent profile store backing the master.
    fn store_path(&self) -> PathBuf;
    /// Generation counter, bumped on every master replacement.
    fn epoch(&self) -> u64;
}

/// A freshly cloned execution context plus the provenance the pool tracks.
#[derive(Clone, Debug)]
pub struct ClonedContext {
    pub handle: ContextHandle,
    pub store: PathBuf,
    /// Master epoch the clone's credential snapshot was taken from.
    pub epoch: u64,
}

/// Creates execution contexts: master contexts for the orchestrator and
/// disposable clones for the pool.
pub struct ContextFactory {
    engine: Arc<dyn ContextEngine>,
    master: Arc<dyn MasterSource>,
    clones_root: PathBuf,
}

impl ContextFactory {
    pub fn new(
        engine: Arc<dyn ContextEngine>,
        master: Arc<dyn MasterSource>,
        clones_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            engine,
            master,
            clones_root: clones_root.into(),
        }
    }

    pub fn engine(&self) -> Arc<dyn ContextEngine> {
        Arc::clone(&self.engine)
    }

    pub fn master(&self) -> Arc<dyn MasterSource> {
        Arc::clone(&self.master)
    }

    /// Clone the master's credential store into an isolated directory and
    /// launch a disposable context on it.
    pub async fn clone_from_master(&self) -> Result<ClonedContext, EngineError> {
        if !self.master.usable() {
            return Err(EngineError::MasterUnavailable);
        }
        let epoch = self.master.epoch();
        let source = ProfileStore::new(self.master.store_path());
        let store = self.clones_root.join(format!("ctx-{}", ContextId::new()));
        source.clone_to(&store)?;

        match self.engine.create_context(ContextKind::Clone, &store).await {
            Ok(handle) => {
                debug!(target: "factory", id = %handle.id, epoch, "cloned context from master");
                Ok(ClonedContext {
                    handle,
                    store,
                    epoch,
                })
            }
            Err(err) => {
                // Launch failed; don't leave the half-built clone dir behind.
                if let Err(cleanup) = ProfileStore::remove_clone(&store) {
                    warn!(target: "factory", error = %cleanup, "failed to remove orphaned clone store");
                }
                Err(err)
            }
        }
    }

    /// Destroy a pooled context and its isolated store.
    pub async fn destroy_clone(&self, clone: &ClonedContext) -> Result<(), EngineError> {
        self.engine.destroy(&clone.handle).await?;
        ProfileStore::remove_clone(&clone.store)?;
        Ok(())
    }

    /// Re-seed a clone's credential artifacts from the current master store.
    pub fn reseed_clone(&self, clone: &ClonedContext) -> Result<(), EngineError> {
        ProfileStore::new(self.master.store_path()).reseed_into(&clone.store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    struct StubEngine {
        fail_launch: AtomicBool,
    }

    #[async_trait]
    impl ContextEngine for StubEngine {
        async fn create_context(
            &self,
            kind: ContextKind,
            store: &Path,
        ) -> Result<ContextHandle, EngineError> {
            if self.fail_launch.load(Ordering::SeqCst) {
                return Err(EngineError::Launch("boom".into()));
            }
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
            _selector: &str,
            _timeout: Duration,
        ) -> Result<bool, EngineError> {
            Ok(false)
        }

        async fn fill_field(
            &self,
            _ctx: &ContextHandle,
            _selector: &str,
            _value: &str,
        ) -> Result<(), EngineError> {
            Ok(())
        }

        async fn click(&self, _ctx: &ContextHandle, _selector: &str) -> Result<(), EngineError> {
            Ok(())
        }

        async fn capture_image(
            &self,
            _ctx: &ContextHandle,
            _selector: &str,
        ) -> Result<Vec<u8>, EngineError> {
            Ok(Vec::new())
        }

        async fn clear_transient_state(&self, _ctx: &ContextHandle) -> Result<(), EngineError> {
            Ok(())
        }

        async fn destroy(&self, _ctx: &ContextHandle) -> Result<(), EngineError> {
            Ok(())
        }
    }

    struct StubMaster {
        usable: AtomicBool,
        store: PathBuf,
        epoch: AtomicU64,
    }

    impl MasterSource for StubMaster {
        fn usable(&self) -> bool {
            self.usable.load(Ordering::SeqCst)
        }

        fn store_path(&self) -> PathBuf {
            self.store.clone()
        }

        fn epoch(&self) -> u64 {
            self.epoch.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn clone_requires_usable_master() {
        let dir = tempdir().unwrap();
        let master = Arc::new(StubMaster {
            usable: AtomicBool::new(false),
            store: dir.path().join("master"),
            epoch: AtomicU64::new(1),
        });
        let factory = ContextFactory::new(
            Arc::new(StubEngine {
                fail_launch: AtomicBool::new(false),
            }),
            master,
            dir.path().join("clones"),
        );
        assert!(matches!(
            factory.clone_from_master().await,
            Err(EngineError::MasterUnavailable)
        ));
    }

    #[tokio::test]
    async fn clone_carries_master_epoch_and_store() {
        let dir = tempdir().unwrap();
        let master_store = ProfileStore::new(dir.path().join("master"));
        master_store.ensure().unwrap();
        std::fs::write(master_store.path().join("Local State"), b"x").unwrap();

        let master = Arc::new(StubMaster {
            usable: AtomicBool::new(true),
            store: master_store.path().to_path_buf(),
            epoch: AtomicU64::new(7),
        });
        let factory = ContextFactory::new(
            Arc::new(StubEngine {
                fail_launch: AtomicBool::new(false),
            }),
            master,
            dir.path().join("clones"),
        );

        let clone = factory.clone_from_master().await.unwrap();
        assert_eq!(clone.epoch, 7);
        assert!(clone.store.join("Local State").exists());

        factory.destroy_clone(&clone).await.unwrap();
        assert!(!clone.store.exists());
    }

    #[tokio::test]
    async fn failed_launch_cleans_up_clone_dir() {
        let dir = tempdir().unwrap();
        let master_store = ProfileStore::new(dir.path().join("master"));
        master_store.ensure().unwrap();

        let master = Arc::new(StubMaster {
            usable: AtomicBool::new(true),
            store: master_store.path().to_path_buf(),
            epoch: AtomicU64::new(1),
        });
        let clones_root = dir.path().join("clones");
        let factory = ContextFactory::new(
            Arc::new(StubEngine {
                fail_launch: AtomicBool::new(true),
            }),
            master,
            clones_root.clone(),
        );

        assert!(factory.clone_from_master().await.is_err());
        let leftovers = std::fs::read_dir(&clones_root)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
    }
}
