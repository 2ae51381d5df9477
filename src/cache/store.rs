//! Content-addressed store of compiled dependency trees
//!
//! Layout under the cache root:
//!
//! ```text
//! entries/<fingerprint>/<settings key>/{entry.json, Cargo.lock, target/}
//! staging/<fingerprint>-<uuid>/        population in progress
//! locks/<fingerprint>.lock             flock per fingerprint
//! ```
//!
//! The settings key is [`CompileSettings::cache_key`]: one manifest built
//! with two profiles (or two `--target` triples) keeps two entries side by
//! side. Entries are published with one rename after a successful dependency
//! pass and never change afterwards.

use crate::build::{CompileSettings, CompilerStage, StubProgram};
use crate::cache::entry::{CacheEntry, CacheState, ENTRY_FILE, TARGET_DIR};
use crate::cache::lock::EntryLock;
use crate::error::{KilnError, KilnResult};
use crate::fsutil;
use crate::manifest::{fingerprint, Fingerprint, Manifest, LOCKFILE};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of [`DependencyCache::populate`]
#[derive(Debug)]
pub struct Population {
    pub entry: CacheEntry,
    /// Another run published the entry while this one waited for the lock
    pub reused: bool,
}

/// What [`DependencyCache::gc`] removed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GcReport {
    pub entries: usize,
    pub staging: usize,
    pub bytes: u64,
}

/// Dependency cache rooted at one directory
#[derive(Debug)]
pub struct DependencyCache {
    root: PathBuf,
    _ephemeral: Option<TempDir>,
}

impl DependencyCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            _ephemeral: None,
        }
    }

    /// Throwaway store that lives as long as the value (caching disabled)
    pub fn ephemeral() -> KilnResult<Self> {
        let dir = TempDir::with_prefix("kiln-cache-")
            .map_err(|e| KilnError::io("creating ephemeral cache", e))?;
        Ok(Self {
            root: dir.path().to_path_buf(),
            _ephemeral: Some(dir),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_ephemeral(&self) -> bool {
        self._ephemeral.is_some()
    }

    fn entries_dir(&self) -> PathBuf {
        self.root.join("entries")
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    fn fingerprint_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.entries_dir().join(fingerprint.as_str())
    }

    /// Directory a published entry for these settings lives in
    pub fn entry_dir(&self, fingerprint: &Fingerprint, settings: &CompileSettings) -> PathBuf {
        self.fingerprint_dir(fingerprint).join(settings.cache_key())
    }

    /// Completed entry for exactly this fingerprint and these settings;
    /// anything else is a miss
    pub async fn lookup(
        &self,
        fingerprint: &Fingerprint,
        settings: &CompileSettings,
    ) -> Option<CacheEntry> {
        let dir = self.entry_dir(fingerprint, settings);
        read_valid(&dir, fingerprint, &settings.cache_key()).await
    }

    pub async fn state(
        &self,
        fingerprint: &Fingerprint,
        settings: &CompileSettings,
    ) -> KilnResult<CacheState> {
        if self.lookup(fingerprint, settings).await.is_some() {
            return Ok(CacheState::Complete);
        }
        let staging = self.staging_for(fingerprint).await?;
        Ok(if staging.is_empty() {
            CacheState::Miss
        } else {
            CacheState::Building
        })
    }

    /// Run the dependency pass for `manifest` and publish the result.
    ///
    /// Holds the fingerprint lock for the whole population. If another run
    /// published the entry first, that entry is returned without compiling.
    /// On failure nothing is published and the staging directory is removed.
    pub async fn populate(
        &self,
        manifest: &Manifest,
        compiler: &CompilerStage<'_>,
    ) -> KilnResult<Population> {
        let fp = fingerprint(manifest);
        let _lock = EntryLock::acquire(&self.locks_dir(), &fp).await?;

        if let Some(entry) = self.lookup(&fp, compiler.settings()).await {
            info!("Cache entry {} was published by another run", fp.short());
            return Ok(Population { entry, reused: true });
        }

        let staging = self.staging_dir().join(format!("{}-{}", fp, Uuid::new_v4()));
        fs::create_dir_all(&staging)
            .await
            .map_err(|e| KilnError::io(format!("creating {}", staging.display()), e))?;

        match self.populate_staging(manifest, &fp, compiler, &staging).await {
            Ok(entry) => Ok(Population { entry, reused: false }),
            Err(e) => {
                if let Err(cleanup) = fsutil::remove_dir_if_exists(&staging).await {
                    warn!("Failed to remove {}: {}", staging.display(), cleanup);
                }
                Err(e)
            }
        }
    }

    async fn populate_staging(
        &self,
        manifest: &Manifest,
        fp: &Fingerprint,
        compiler: &CompilerStage<'_>,
        staging: &Path,
    ) -> KilnResult<CacheEntry> {
        let stub = StubProgram::generate(manifest, &staging.join("workspace")).await?;
        let target_dir = staging.join(TARGET_DIR);
        let output = compiler.dependency_pass(manifest, &stub, &target_dir, fp).await?;

        // The toolchain may have resolved a lockfile the project lacks
        let resolved_lock = stub.root().join(LOCKFILE);
        if resolved_lock.is_file() {
            fs::copy(&resolved_lock, staging.join(LOCKFILE))
                .await
                .map_err(|e| KilnError::io(format!("saving {}", resolved_lock.display()), e))?;
        }

        let removed = stub.discard(&compiler.settings().profile_dir(&target_dir)).await?;
        debug!("Removed {} stub byproduct(s) before publishing", removed);

        let size_bytes = if target_dir.is_dir() {
            fsutil::dir_size(&target_dir).await?
        } else {
            fs::create_dir_all(&target_dir)
                .await
                .map_err(|e| KilnError::io(format!("creating {}", target_dir.display()), e))?;
            0
        };

        let settings = compiler.settings();
        let final_dir = self.entry_dir(fp, settings);
        let entry = CacheEntry {
            fingerprint: fp.clone(),
            package: manifest.package.clone(),
            dependencies: manifest.dependencies.iter().map(ToString::to_string).collect(),
            compiled: output
                .compiled
                .into_iter()
                .filter(|unit| unit.replace('-', "_") != manifest.crate_name())
                .collect(),
            state: CacheState::Complete,
            created_at: Utc::now(),
            size_bytes,
            profile: settings.profile.clone(),
            settings_key: settings.cache_key(),
            path: final_dir.clone(),
        };
        let json = serde_json::to_vec_pretty(&entry)?;
        let entry_file = staging.join(ENTRY_FILE);
        fs::write(&entry_file, json)
            .await
            .map_err(|e| KilnError::io(format!("writing {}", entry_file.display()), e))?;

        self.publish(staging, &final_dir, fp).await?;

        info!(
            "Published cache entry {} ({} units, {})",
            fp.short(),
            entry.compiled.len(),
            fsutil::format_bytes(size_bytes)
        );
        Ok(entry)
    }

    /// Rename staging into place; an invalid leftover entry is replaced
    async fn publish(&self, staging: &Path, final_dir: &Path, fp: &Fingerprint) -> KilnResult<()> {
        let parent = self.fingerprint_dir(fp);
        fs::create_dir_all(&parent)
            .await
            .map_err(|e| KilnError::io(format!("creating {}", parent.display()), e))?;

        if final_dir.exists() {
            warn!("Replacing invalid cache entry {}", fp.short());
            fsutil::remove_dir_if_exists(final_dir).await?;
        }
        fs::rename(staging, final_dir)
            .await
            .map_err(|e| KilnError::io(format!("publishing cache entry {}", fp.short()), e))
    }

    /// Published entries, newest first
    pub async fn list(&self) -> KilnResult<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        let dir = self.entries_dir();
        let mut read = match fs::read_dir(&dir).await {
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(KilnError::io(format!("reading {}", dir.display()), e)),
        };

        while let Some(item) = read
            .next_entry()
            .await
            .map_err(|e| KilnError::io(format!("reading entry in {}", dir.display()), e))?
        {
            let name = item.file_name().to_string_lossy().to_string();
            let Some(fp) = Fingerprint::parse(&name) else {
                continue;
            };
            for key_dir in subdirectories(&item.path()).await? {
                let key = key_dir.file_name().map(|n| n.to_string_lossy().to_string());
                if let Some(entry) = read_valid(&key_dir, &fp, &key.unwrap_or_default()).await {
                    entries.push(entry);
                }
            }
        }

        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    /// Hold a shared lock on `fingerprint` while an entry is read. Removal
    /// and population wait until the guard is dropped.
    pub async fn read_guard(&self, fingerprint: &Fingerprint) -> KilnResult<EntryLock> {
        EntryLock::acquire_shared(&self.locks_dir(), fingerprint).await
    }

    /// Remove every entry of one fingerprint, for all settings. Returns
    /// whether anything existed.
    pub async fn remove(&self, fingerprint: &Fingerprint) -> KilnResult<bool> {
        let _lock = EntryLock::acquire(&self.locks_dir(), fingerprint).await?;
        self.remove_locked(&self.fingerprint_dir(fingerprint), fingerprint).await
    }

    /// Remove one published entry. Returns whether it still existed.
    pub async fn remove_entry(&self, entry: &CacheEntry) -> KilnResult<bool> {
        let _lock = EntryLock::acquire(&self.locks_dir(), &entry.fingerprint).await?;
        self.remove_locked(&entry.path, &entry.fingerprint).await
    }

    async fn remove_locked(&self, dir: &Path, fingerprint: &Fingerprint) -> KilnResult<bool> {
        if !dir.exists() {
            return Ok(false);
        }

        // Move out of entries/ first so readers never see a half-deleted tree
        let doomed = self
            .staging_dir()
            .join(format!("removed-{}-{}", fingerprint.short(), Uuid::new_v4()));
        fs::create_dir_all(self.staging_dir())
            .await
            .map_err(|e| KilnError::io("creating cache staging directory", e))?;
        fs::rename(dir, &doomed)
            .await
            .map_err(|e| {
                KilnError::io(format!("removing cache entry {}", fingerprint.short()), e)
            })?;
        fsutil::remove_dir_if_exists(&doomed).await?;

        debug!("Removed cache entry {}", fingerprint.short());
        Ok(true)
    }

    /// Remove entries older than `days` and abandoned staging directories
    pub async fn gc(&self, days: u32) -> KilnResult<GcReport> {
        let mut report = GcReport::default();

        for entry in self.list().await? {
            if entry.is_older_than_days(days) && self.remove_entry(&entry).await? {
                report.entries += 1;
                report.bytes += entry.size_bytes;
            }
        }

        let staging = self.staging_dir();
        let mut read = match fs::read_dir(&staging).await {
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
            Err(e) => return Err(KilnError::io(format!("reading {}", staging.display()), e)),
        };
        while let Some(item) = read
            .next_entry()
            .await
            .map_err(|e| KilnError::io(format!("reading entry in {}", staging.display()), e))?
        {
            let name = item.file_name().to_string_lossy().to_string();
            let path = item.path();

            // An unlocked staging directory belongs to no running population
            let _guard = match staging_fingerprint(&name) {
                Some(fp) => match EntryLock::try_acquire(&self.locks_dir(), &fp)? {
                    Some(guard) => Some(guard),
                    None => continue,
                },
                None => None,
            };

            let bytes = fsutil::dir_size(&path).await.unwrap_or(0);
            fsutil::remove_dir_if_exists(&path).await?;
            info!("Removed abandoned staging directory {}", name);
            report.staging += 1;
            report.bytes += bytes;
        }

        Ok(report)
    }

    /// Remove every published entry. Returns the number removed.
    pub async fn clear(&self) -> KilnResult<usize> {
        let mut removed = 0;
        for entry in self.list().await? {
            if self.remove_entry(&entry).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Total size of published entries
    pub async fn total_size(&self) -> KilnResult<u64> {
        Ok(self.list().await?.iter().map(|e| e.size_bytes).sum())
    }

    async fn staging_for(&self, fingerprint: &Fingerprint) -> KilnResult<Vec<PathBuf>> {
        let dir = self.staging_dir();
        let mut read = match fs::read_dir(&dir).await {
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(KilnError::io(format!("reading {}", dir.display()), e)),
        };
        let mut found = Vec::new();
        while let Some(item) = read
            .next_entry()
            .await
            .map_err(|e| KilnError::io(format!("reading entry in {}", dir.display()), e))?
        {
            let name = item.file_name().to_string_lossy().to_string();
            if staging_fingerprint(&name).as_ref() == Some(fingerprint) {
                found.push(item.path());
            }
        }
        Ok(found)
    }
}

/// Entry in `dir` if it is complete and was published for exactly this
/// fingerprint and settings key
async fn read_valid(dir: &Path, fingerprint: &Fingerprint, key: &str) -> Option<CacheEntry> {
    let entry = match CacheEntry::read(dir).await {
        Ok(Some(entry)) => entry,
        Ok(None) => return None,
        Err(e) => {
            warn!("Ignoring cache entry: {}", e);
            return None;
        }
    };

    if entry.state != CacheState::Complete
        || &entry.fingerprint != fingerprint
        || entry.settings_key != key
    {
        debug!("Ignoring cache entry {}: metadata does not match", fingerprint.short());
        return None;
    }
    if !entry.target_dir().is_dir() {
        debug!("Ignoring cache entry {}: target directory missing", fingerprint.short());
        return None;
    }
    Some(entry)
}

async fn subdirectories(dir: &Path) -> KilnResult<Vec<PathBuf>> {
    let mut read = match fs::read_dir(dir).await {
        Ok(read) => read,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(KilnError::io(format!("reading {}", dir.display()), e)),
    };
    let mut found = Vec::new();
    while let Some(item) = read
        .next_entry()
        .await
        .map_err(|e| KilnError::io(format!("reading entry in {}", dir.display()), e))?
    {
        if item.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
            found.push(item.path());
        }
    }
    Ok(found)
}

/// Fingerprint prefix of a `<fingerprint>-<uuid>` staging name
fn staging_fingerprint(name: &str) -> Option<Fingerprint> {
    let (fp, rest) = name.split_at_checked(64)?;
    if !rest.starts_with('-') {
        return None;
    }
    Fingerprint::parse(fp)
}
