//! Scoped build workspace for the artifact pass
//!
//! Holds a private copy of the project source and of a cache entry's
//! compiled dependencies. Everything in it is deleted when the value drops;
//! only the extracted artifact leaves.

use crate::build::stub::portable_manifest;
use crate::cache::CacheEntry;
use crate::error::{KilnError, KilnResult};
use crate::fsutil;
use crate::manifest::{Manifest, LOCKFILE, MANIFEST_FILE};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// Project entries never copied into a workspace
const ALWAYS_SKIPPED: &[&str] = &["target", ".git"];

#[derive(Debug)]
pub struct BuildWorkspace {
    dir: TempDir,
}

impl BuildWorkspace {
    /// Copy the project source (minus build outputs and anything in
    /// `exclude`) and the entry's dependency tree into a fresh workspace.
    pub async fn prepare(
        manifest: &Manifest,
        entry: &CacheEntry,
        exclude: &[PathBuf],
    ) -> KilnResult<Self> {
        let dir = TempDir::with_prefix("kiln-build-")
            .map_err(|e| KilnError::io("creating build workspace", e))?;
        let workspace = Self { dir };

        let project = manifest.root();
        let skipped: Vec<PathBuf> = ALWAYS_SKIPPED
            .iter()
            .map(PathBuf::from)
            .chain(exclude.iter().filter_map(|p| relative_to(project, p)))
            .collect();
        let copied = fsutil::copy_dir_filtered(project, &workspace.source_dir(), &|rel| {
            !skipped.iter().any(|skip| rel.starts_with(skip))
        })
        .await?;
        debug!(
            "Copied {} of project source into {}",
            fsutil::format_bytes(copied),
            workspace.root().display()
        );

        let manifest_text = portable_manifest(manifest)?;
        let manifest_path = workspace.source_dir().join(MANIFEST_FILE);
        tokio::fs::write(&manifest_path, manifest_text)
            .await
            .map_err(|e| KilnError::io(format!("writing {}", manifest_path.display()), e))?;

        if manifest.lockfile().is_none() {
            if let Some(lock) = entry.lockfile() {
                let dest = workspace.source_dir().join(LOCKFILE);
                tokio::fs::copy(&lock, &dest)
                    .await
                    .map_err(|e| KilnError::io(format!("copying {}", lock.display()), e))?;
            }
        }

        let reused = fsutil::copy_dir_all(&entry.target_dir(), &workspace.target_dir()).await?;
        debug!(
            "Copied {} of cached dependencies from {}",
            fsutil::format_bytes(reused),
            entry.fingerprint.short()
        );

        Ok(workspace)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Real application source with the portable manifest
    pub fn source_dir(&self) -> PathBuf {
        self.root().join("source")
    }

    pub fn target_dir(&self) -> PathBuf {
        self.root().join("target")
    }
}

/// `path` relative to `base`; relative inputs are taken as already relative
fn relative_to(base: &Path, path: &Path) -> Option<PathBuf> {
    if path.is_relative() {
        return Some(path.to_path_buf());
    }
    path.strip_prefix(base).ok().map(Path::to_path_buf)
}
