//! Artifact storage behind a trait seam.
//!
//! The executor writes into a staging location and only `commit` makes the
//! artifact visible, so a failed run never leaves a partial artifact behind.
//! The sweeper deletes by the locator that `commit` returned.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub trait ArtifactStore: Send + Sync {
    /// Opens a staging writer for a new artifact. Fails if an artifact of the
    /// same name is already staged.
    fn create(&self, name: &str) -> Result<Box<dyn Write + Send>>;
    /// Publishes a staged artifact and returns its locator.
    fn commit(&self, name: &str) -> Result<String>;
    /// Best-effort removal of a staged artifact after a failed run.
    fn discard(&self, name: &str);
    /// Removes a published artifact. Idempotent: a missing artifact is fine.
    fn delete(&self, locator: &str) -> Result<()>;
}

/// Local-directory artifact store using the `.tmp` + rename pattern.
pub struct LocalDirStore {
    out_dir: Arc<Path>,
}

impl LocalDirStore {
    pub fn new<P: Into<Arc<Path>>>(out_dir: P) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    fn staging_path(&self, name: &str) -> PathBuf {
        self.out_dir.join(format!("{name}.tmp"))
    }

    fn final_path(&self, name: &str) -> PathBuf {
        self.out_dir.join(name)
    }
}

impl ArtifactStore for LocalDirStore {
    fn create(&self, name: &str) -> Result<Box<dyn Write + Send>> {
        let path = self.staging_path(name);
        let file = File::create_new(&path)
            .map_err(Error::from)
            .with_msg(format!("Creating staging file {path:?} failed"))?;
        Ok(Box::new(file))
    }

    fn commit(&self, name: &str) -> Result<String> {
        let staged = self.staging_path(name);
        let target = self.final_path(name);
        std::fs::rename(&staged, &target)
            .map_err(Error::from)
            .with_msg(format!("Publishing artifact {target:?} failed"))?;
        Ok(target.to_string_lossy().into_owned())
    }

    fn discard(&self, name: &str) {
        let staged = self.staging_path(name);
        if let Err(e) = std::fs::remove_file(&staged) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove staging file {:?}: {}", staged, e);
            }
        }
    }

    fn delete(&self, locator: &str) -> Result<()> {
        let path = Path::new(locator);
        if !path.starts_with(self.out_dir.as_ref()) {
            return Err(Error::CorruptRecord(format!(
                "artifact locator {locator:?} points outside the artifact dir"
            )));
        }
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::from(e).with_msg(format!("Deleting artifact {locator:?} failed"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, LocalDirStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDirStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    #[test]
    fn test_commit_publishes_staged_artifact() {
        let (dir, store) = store();
        let mut writer = store.create("a.tar").unwrap();
        writer.write_all(b"payload").unwrap();
        drop(writer);

        assert!(dir.path().join("a.tar.tmp").exists());
        let locator = store.commit("a.tar").unwrap();
        assert!(!dir.path().join("a.tar.tmp").exists());
        assert_eq!(std::fs::read(&locator).unwrap(), b"payload");
    }

    #[test]
    fn test_discard_removes_staging_only() {
        let (dir, store) = store();
        let mut writer = store.create("a.tar").unwrap();
        writer.write_all(b"partial").unwrap();
        drop(writer);

        store.discard("a.tar");
        assert!(!dir.path().join("a.tar.tmp").exists());
        // Discarding again is harmless.
        store.discard("a.tar");
    }

    #[test]
    fn test_create_refuses_duplicate_staging() {
        let (_dir, store) = store();
        let _writer = store.create("a.tar").unwrap();
        assert!(store.create("a.tar").is_err());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (_dir, store) = store();
        let mut writer = store.create("a.tar").unwrap();
        writer.write_all(b"x").unwrap();
        drop(writer);
        let locator = store.commit("a.tar").unwrap();

        store.delete(&locator).unwrap();
        store.delete(&locator).unwrap();
    }

    #[test]
    fn test_delete_refuses_foreign_path() {
        let (_dir, store) = store();
        assert!(store.delete("/etc/passwd").is_err());
    }
}
