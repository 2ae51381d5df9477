//! Per-fingerprint advisory locks
//!
//! Population and removal of one fingerprint are serialized across processes
//! with an exclusive `flock` on `locks/<fingerprint>.lock`. Runs copying a
//! published entry hold the same file shared, so an entry is never removed
//! under a reader. Different fingerprints use different lock files and never
//! wait on each other.

use crate::error::{KilnError, KilnResult};
use crate::manifest::Fingerprint;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Written into the lock file by the holder, for diagnostics
#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
    pub pid: u32,
    pub acquired_at: chrono::DateTime<chrono::Utc>,
    pub fingerprint: Fingerprint,
}

/// How an [`EntryLock`] is held
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Readers copying a published entry; any number at once
    Shared,
    /// Population and removal
    Exclusive,
}

/// Held lock; released on drop
#[derive(Debug)]
pub struct EntryLock {
    _file: File,
    path: PathBuf,
    mode: LockMode,
}

impl EntryLock {
    /// Block (on a blocking thread) until the exclusive lock for `fingerprint` is held
    pub async fn acquire(locks_dir: &Path, fingerprint: &Fingerprint) -> KilnResult<Self> {
        Self::acquire_mode(locks_dir, fingerprint, LockMode::Exclusive).await
    }

    /// Block until a shared lock for `fingerprint` is held. Waits for any
    /// population or removal in progress.
    pub async fn acquire_shared(locks_dir: &Path, fingerprint: &Fingerprint) -> KilnResult<Self> {
        Self::acquire_mode(locks_dir, fingerprint, LockMode::Shared).await
    }

    async fn acquire_mode(
        locks_dir: &Path,
        fingerprint: &Fingerprint,
        mode: LockMode,
    ) -> KilnResult<Self> {
        let path = lock_path(locks_dir, fingerprint);
        let fp = fingerprint.clone();

        tokio::task::spawn_blocking(move || {
            let lock_error = |source| KilnError::CacheLock {
                fingerprint: fp.to_string(),
                source,
            };
            let file = open_lock_file(&path, &fp)?;
            lock(&file, mode, true).map_err(lock_error)?;
            // Shared holders never write: several may hold the file at once
            if mode == LockMode::Exclusive {
                write_metadata(&file, &fp).map_err(lock_error)?;
            }
            debug!("Acquired {:?} cache lock {}", mode, path.display());
            Ok(Self { _file: file, path, mode })
        })
        .await
        .map_err(|e| KilnError::Internal(format!("lock task failed: {}", e)))?
    }

    /// Take the exclusive lock only if nobody holds the lock in any mode
    pub fn try_acquire(locks_dir: &Path, fingerprint: &Fingerprint) -> KilnResult<Option<Self>> {
        let path = lock_path(locks_dir, fingerprint);
        let file = open_lock_file(&path, fingerprint)?;

        match lock(&file, LockMode::Exclusive, false) {
            Ok(()) => Ok(Some(Self {
                _file: file,
                path,
                mode: LockMode::Exclusive,
            })),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(source) => Err(KilnError::CacheLock {
                fingerprint: fingerprint.to_string(),
                source,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

/// `<locks_dir>/<fingerprint>.lock`
pub fn lock_path(locks_dir: &Path, fingerprint: &Fingerprint) -> PathBuf {
    locks_dir.join(format!("{}.lock", fingerprint))
}

fn open_lock_file(path: &Path, fingerprint: &Fingerprint) -> KilnResult<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| KilnError::io(format!("creating {}", parent.display()), e))?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|source| KilnError::CacheLock {
            fingerprint: fingerprint.to_string(),
            source,
        })
}

fn write_metadata(file: &File, fingerprint: &Fingerprint) -> io::Result<()> {
    let metadata = LockMetadata {
        pid: std::process::id(),
        acquired_at: chrono::Utc::now(),
        fingerprint: fingerprint.clone(),
    };
    file.set_len(0)?;
    let mut writer = io::BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &metadata).map_err(io::Error::other)?;
    writer.flush()
}

#[cfg(unix)]
fn lock(file: &File, mode: LockMode, blocking: bool) -> io::Result<()> {
    use rustix::fs::{flock, FlockOperation};
    use std::os::unix::io::AsFd;

    let operation = match (mode, blocking) {
        (LockMode::Shared, true) => FlockOperation::LockShared,
        (LockMode::Shared, false) => FlockOperation::NonBlockingLockShared,
        (LockMode::Exclusive, true) => FlockOperation::LockExclusive,
        (LockMode::Exclusive, false) => FlockOperation::NonBlockingLockExclusive,
    };

    rustix::io::retry_on_intr(|| flock(file.as_fd(), operation))
        .map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(not(unix))]
fn lock(_file: &File, _mode: LockMode, _blocking: bool) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "advisory file locks require a unix platform",
    ))
}
