//! Per-path write serialization for the shared prefix
//!
//! Two layers guard every destination path:
//!
//! - **In-process**: an async mutex per path, so parallel workers in one run
//!   queue up without tying up blocking threads
//! - **Cross-process**: an exclusive `flock` on `var/keg/locks/<hash>.lock`,
//!   so two `keg` invocations never interleave writes to the same keg
//!
//! Both are released when the [`PrefixGuard`] is dropped.

use crate::error::Result;
use anyhow::Context;
use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// Held lock on one destination path
pub struct PrefixGuard {
    path: PathBuf,
    _file: File,
    _guard: OwnedMutexGuard<()>,
}

impl PrefixGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for PrefixGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefixGuard").field("path", &self.path).finish()
    }
}

/// Lock table shared by all workers of a run
#[derive(Debug)]
pub struct PrefixLocks {
    lock_dir: PathBuf,
    table: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl PrefixLocks {
    pub fn new(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            lock_dir: lock_dir.into(),
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Lock file used for `path`
    pub fn lock_file(&self, path: &Path) -> PathBuf {
        let digest = Sha256::digest(path.as_os_str().as_encoded_bytes());
        let name: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();
        self.lock_dir.join(format!("{}.lock", name))
    }

    /// Wait for exclusive access to `path`.
    pub async fn acquire(&self, path: &Path) -> Result<PrefixGuard> {
        let mutex = {
            let mut table = self
                .table
                .lock()
                .map_err(|_| anyhow::anyhow!("Lock table poisoned"))?;
            table
                .entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };

        let guard = match mutex.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Waiting for lock on {}", path.display());
                mutex.lock_owned().await
            }
        };

        let lock_file = self.lock_file(path);
        let file = tokio::task::spawn_blocking(move || -> anyhow::Result<File> {
            if let Some(parent) = lock_file.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = File::create(&lock_file)
                .with_context(|| format!("Failed to open lock file: {}", lock_file.display()))?;
            file.lock_exclusive()
                .with_context(|| format!("Failed to lock {}", lock_file.display()))?;
            Ok(file)
        })
        .await
        .context("Lock task panicked")??;

        Ok(PrefixGuard {
            path: path.to_path_buf(),
            _file: file,
            _guard: guard,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_lock_file_names_are_stable() {
        let locks = PrefixLocks::new("/tmp/locks");
        let a = locks.lock_file(Path::new("/p/Cellar/a/1.0"));
        assert_eq!(a, locks.lock_file(Path::new("/p/Cellar/a/1.0")));
        assert_ne!(a, locks.lock_file(Path::new("/p/Cellar/b/1.0")));
        assert!(a.starts_with("/tmp/locks"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_path_is_serialized() {
        let dir = TempDir::new().unwrap();
        let locks = Arc::new(PrefixLocks::new(dir.path().join("locks")));
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(Path::new("/p/Cellar/a/1.0")).await.unwrap();
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_paths_do_not_block() {
        let dir = TempDir::new().unwrap();
        let locks = PrefixLocks::new(dir.path().join("locks"));
        let a = locks.acquire(Path::new("/p/a")).await.unwrap();
        let b = tokio::time::timeout(Duration::from_secs(5), locks.acquire(Path::new("/p/b")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(a.path(), Path::new("/p/a"));
        assert_eq!(b.path(), Path::new("/p/b"));
    }
}
