//! Cache entry metadata
//!
//! Tracks entry state (miss, building, complete) and the `entry.json`
//! record written next to each compiled dependency tree.

use crate::error::{KilnError, KilnResult};
use crate::manifest::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Metadata file inside every entry directory
pub const ENTRY_FILE: &str = "entry.json";

/// Compiled dependency tree inside every entry directory
pub const TARGET_DIR: &str = "target";

/// State of a fingerprint in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    /// Nothing stored for this fingerprint
    Miss,
    /// A staging directory exists: population in progress or interrupted
    Building,
    /// Published and immutable
    Complete,
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Miss => write!(f, "miss"),
            Self::Building => write!(f, "building"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// A published dependency cache entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub package: String,
    /// Declared dependencies as `name@requirement`
    pub dependencies: Vec<String>,
    /// Units the dependency pass compiled
    pub compiled: Vec<String>,
    pub state: CacheState,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    /// Profile the dependency pass used
    pub profile: String,
    /// [`CompileSettings::cache_key`](crate::build::CompileSettings::cache_key)
    /// of the dependency pass
    pub settings_key: String,
    /// Entry directory; set when loaded from the store
    #[serde(skip)]
    pub path: PathBuf,
}

impl CacheEntry {
    /// Compiled dependency target directory
    pub fn target_dir(&self) -> PathBuf {
        self.path.join(TARGET_DIR)
    }

    /// Lockfile resolved by the dependency pass, if one was saved
    pub fn lockfile(&self) -> Option<PathBuf> {
        let path = self.path.join(crate::manifest::LOCKFILE);
        path.is_file().then_some(path)
    }

    /// Check if this entry is older than the given number of days
    pub fn is_older_than_days(&self, days: u32) -> bool {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
        self.created_at < cutoff
    }

    /// Read `entry.json` from an entry directory. A missing file is `None`;
    /// an unreadable or unparsable one is `CacheCorrupt`.
    pub(crate) async fn read(dir: &Path) -> KilnResult<Option<Self>> {
        let corrupt = |reason: String| KilnError::CacheCorrupt {
            fingerprint: entry_label(dir),
            reason,
        };
        let bytes = match tokio::fs::read(dir.join(ENTRY_FILE)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(corrupt(format!("reading {}: {}", ENTRY_FILE, e))),
        };
        let mut entry: Self = serde_json::from_slice(&bytes)
            .map_err(|e| corrupt(format!("parsing {}: {}", ENTRY_FILE, e)))?;
        entry.path = dir.to_path_buf();
        Ok(Some(entry))
    }
}

/// `<fingerprint>/<settings key>` from an entry directory path
fn entry_label(dir: &Path) -> String {
    let name = |p: Option<&Path>| {
        p.and_then(Path::file_name)
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    };
    format!("{}/{}", name(dir.parent()), name(Some(dir)))
}
