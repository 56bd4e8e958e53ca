//! At most one ingestion per instance name.
//!
//! Inside the process runs queue on a per-name async mutex; across processes
//! an advisory lock on `<locks>/<instance>.lock` does the same job.
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::error::IngestError;

#[derive(Clone, Default)]
pub struct InstanceLocks {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

/// Held for the whole run; both locks are released on drop.
pub struct InstanceGuard {
    _local: OwnedMutexGuard<()>,
    file: File,
    path: PathBuf,
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!(lock = %self.path.display(), "released instance lock");
    }
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other run holds `instance`, then take it.
    pub async fn acquire(
        &self,
        locks_dir: &Path,
        instance: &str,
    ) -> Result<InstanceGuard, IngestError> {
        let slot = {
            let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            map.entry(instance.to_string()).or_default().clone()
        };
        let local = slot.lock_owned().await;

        std::fs::create_dir_all(locks_dir).map_err(|e| IngestError::io(locks_dir, e))?;
        let path = locks_dir.join(format!("{instance}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| IngestError::io(&path, e))?;
        let file = tokio::task::spawn_blocking({
            let path = path.clone();
            move || -> Result<File, IngestError> {
                file.lock_exclusive().map_err(|e| IngestError::io(&path, e))?;
                Ok(file)
            }
        })
        .await??;
        debug!(lock = %path.display(), "acquired instance lock");
        Ok(InstanceGuard { _local: local, file, path })
    }
}
