use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::EngineError;

/// Profile artifacts that carry portal credentials between stores.
/// Everything else under a profile is transient browsing state.
const CREDENTIAL_ARTIFACTS: &[&str] = &[
    "Default/Cookies",
    "Default/Cookies-journal",
    "Default/Network/Cookies",
    "Default/Network/Cookies-journal",
    "Default/Local Storage",
    "Local State",
];

/// Filesystem management for a named persistent profile store and the
/// isolated clone directories seeded from it.
#[derive(Clone, Debug)]
pub struct ProfileStore {
    root: PathBuf,
}

impl ProfileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Create the store directory if missing.
    pub fn ensure(&self) -> Result<(), EngineError> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Copy the whole store into an isolated clone directory.
    pub fn clone_to(&self, dest: &Path) -> Result<(), EngineError> {
        if dest.exists() {
            fs::remove_dir_all(dest)?;
        }
        copy_dir_recursive(&self.root, dest)?;
        debug!(target: "profile", src = %self.root.display(), dest = %dest.display(), "cloned profile store");
        Ok(())
    }

    /// Move the store aside to a timestamped sibling and return its path.
    pub fn backup(&self) -> Result<PathBuf, EngineError> {
        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let backup = self.root.with_extension(format!("bak.{stamp}"));
        if backup.exists() {
            fs::remove_dir_all(&backup)?;
        }
        fs::rename(&self.root, &backup)?;
        warn!(target: "profile", backup = %backup.display(), "profile store moved to backup");
        Ok(backup)
    }

    /// Undo a [`backup`](Self::backup): discard whatever replaced the store
    /// and move the backup back into place.
    pub fn restore(&self, backup: &Path) -> Result<(), EngineError> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        fs::rename(backup, &self.root)?;
        warn!(target: "profile", store = %self.root.display(), "profile store restored from backup");
        Ok(())
    }

    /// Delete the store and recreate it empty.
    pub fn reset(&self) -> Result<(), EngineError> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Overwrite a clone's credential artifacts with the current master ones.
    /// Missing artifacts on either side are skipped; a partially populated
    /// profile is still usable, the portal just re-issues what it needs.
    pub fn reseed_into(&self, clone_store: &Path) -> Result<(), EngineError> {
        for artifact in CREDENTIAL_ARTIFACTS {
            let src = self.root.join(artifact);
            if !src.exists() {
                continue;
            }
            let dest = clone_store.join(artifact);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            if src.is_dir() {
                if dest.exists() {
                    fs::remove_dir_all(&dest)?;
                }
                copy_dir_recursive(&src, &dest)?;
            } else {
                fs::copy(&src, &dest)?;
            }
        }
        Ok(())
    }

    /// Remove an isolated clone directory once its context is destroyed.
    pub fn remove_clone(clone_store: &Path) -> Result<(), EngineError> {
        if clone_store.exists() {
            fs::remove_dir_all(clone_store)?;
        }
        Ok(())
    }
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> io::Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn seed_store(store: &ProfileStore) {
        store.ensure().unwrap();
        fs::create_dir_all(store.path().join("Default/Network")).unwrap();
        fs::write(store.path().join("Default/Cookies"), b"cookie-db").unwrap();
        fs::write(store.path().join("Local State"), b"state").unwrap();
        fs::write(store.path().join("Default/Cache"), b"transient").unwrap();
    }

    #[test]
    fn clone_copies_everything() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("master"));
        seed_store(&store);

        let clone = dir.path().join("clone-1");
        store.clone_to(&clone).unwrap();
        assert_eq!(fs::read(clone.join("Default/Cookies")).unwrap(), b"cookie-db");
        assert_eq!(fs::read(clone.join("Default/Cache")).unwrap(), b"transient");
    }

    #[test]
    fn backup_then_restore_round_trips() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("master"));
        seed_store(&store);

        let backup = store.backup().unwrap();
        assert!(!store.path().exists());
        store.reset().unwrap();
        fs::write(store.path().join("garbage"), b"fresh-but-bad").unwrap();

        store.restore(&backup).unwrap();
        assert_eq!(
            fs::read(store.path().join("Default/Cookies")).unwrap(),
            b"cookie-db"
        );
        assert!(!store.path().join("garbage").exists());
    }

    #[test]
    fn reseed_replaces_credentials_only() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("master"));
        seed_store(&store);

        let clone = dir.path().join("clone-1");
        store.clone_to(&clone).unwrap();

        fs::write(store.path().join("Default/Cookies"), b"fresh-cookies").unwrap();
        fs::write(clone.join("Default/Cache"), b"clone-cache").unwrap();

        store.reseed_into(&clone).unwrap();
        assert_eq!(fs::read(clone.join("Default/Cookies")).unwrap(), b"fresh-cookies");
        assert_eq!(fs::read(clone.join("Default/Cache")).unwrap(), b"clone-cache");
    }

    #[test]
    fn reset_leaves_empty_store() {
        let dir = tempdir().unwrap();
        let store = ProfileStore::new(dir.path().join("master"));
        seed_store(&store);
        store.reset().unwrap();
        assert!(store.path().exists());
        assert_eq!(fs::read_dir(store.path()).unwrap().count(), 0);
    }
}
