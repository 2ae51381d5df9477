//! Filesystem helpers shared by the cache, build and image stages

use crate::error::{KilnError, KilnResult};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Recursively copy `src` into `dst` (created if missing).
///
/// Symlinks are recreated, not followed. File permissions and modification
/// times are preserved, so Cargo sees a copied target directory as fresh.
pub async fn copy_dir_all(src: &Path, dst: &Path) -> KilnResult<u64> {
    copy_dir_filtered(src, dst, &|_| true).await
}

/// Like [`copy_dir_all`], skipping entries whose path relative to `src` fails `keep`
pub async fn copy_dir_filtered(
    src: &Path,
    dst: &Path,
    keep: &(dyn Fn(&Path) -> bool + Send + Sync),
) -> KilnResult<u64> {
    let mut copied = 0u64;
    let mut pending: Vec<(PathBuf, PathBuf)> = vec![(src.to_path_buf(), dst.to_path_buf())];

    while let Some((from, to)) = pending.pop() {
        fs::create_dir_all(&to)
            .await
            .map_err(|e| KilnError::io(format!("creating directory {}", to.display()), e))?;

        let mut entries = fs::read_dir(&from)
            .await
            .map_err(|e| KilnError::io(format!("reading directory {}", from.display()), e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| KilnError::io(format!("reading entry in {}", from.display()), e))?
        {
            let source = entry.path();
            let target = to.join(entry.file_name());
            if let Ok(relative) = source.strip_prefix(src) {
                if !keep(relative) {
                    continue;
                }
            }
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| KilnError::io(format!("inspecting {}", source.display()), e))?;

            if file_type.is_dir() {
                pending.push((source, target));
            } else if file_type.is_symlink() {
                copy_symlink(&source, &target).await?;
            } else {
                copied += copy_file(source, target).await?;
            }
        }
    }

    Ok(copied)
}

/// Copy one file and carry its modification time over
async fn copy_file(source: PathBuf, target: PathBuf) -> KilnResult<u64> {
    tokio::task::spawn_blocking(move || {
        let copy_error = |e: std::io::Error| {
            KilnError::io(
                format!("copying {} to {}", source.display(), target.display()),
                e,
            )
        };
        let bytes = std::fs::copy(&source, &target).map_err(copy_error)?;
        let modified = std::fs::metadata(&source)
            .and_then(|m| m.modified())
            .map_err(copy_error)?;
        // futimens only needs ownership, so read-only copies work too
        std::fs::File::open(&target)
            .and_then(|f| f.set_modified(modified))
            .map_err(copy_error)?;
        Ok(bytes)
    })
    .await
    .map_err(|e| KilnError::Internal(format!("copy task failed: {}", e)))?
}

#[cfg(unix)]
async fn copy_symlink(source: &Path, target: &Path) -> KilnResult<()> {
    let link = fs::read_link(source)
        .await
        .map_err(|e| KilnError::io(format!("reading link {}", source.display()), e))?;

    // Layered copies may already have placed this path
    if fs::symlink_metadata(target).await.is_ok() {
        fs::remove_file(target)
            .await
            .map_err(|e| KilnError::io(format!("replacing {}", target.display()), e))?;
    }

    fs::symlink(&link, target)
        .await
        .map_err(|e| KilnError::io(format!("creating link {}", target.display()), e))
}

#[cfg(not(unix))]
async fn copy_symlink(source: &Path, _target: &Path) -> KilnResult<()> {
    Err(KilnError::UnsupportedPlatform(format!(
        "symlink {} cannot be copied on {}",
        source.display(),
        std::env::consts::OS
    )))
}

/// List every regular file under `root` as a path relative to `root`, sorted.
pub async fn list_files(root: &Path) -> KilnResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| KilnError::io(format!("reading directory {}", dir.display()), e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| KilnError::io(format!("reading entry in {}", dir.display()), e))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| KilnError::io(format!("inspecting {}", path.display()), e))?;

            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                if let Ok(relative) = path.strip_prefix(root) {
                    files.push(relative.to_path_buf());
                }
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Total size in bytes of regular files under `root`
pub async fn dir_size(root: &Path) -> KilnResult<u64> {
    let mut total = 0;
    for file in list_files(root).await? {
        let path = root.join(&file);
        let meta = fs::metadata(&path)
            .await
            .map_err(|e| KilnError::io(format!("reading metadata {}", path.display()), e))?;
        total += meta.len();
    }
    Ok(total)
}

/// SHA-256 of a file's contents as lowercase hex
pub async fn sha256_file(path: &Path) -> KilnResult<String> {
    let contents = fs::read(path)
        .await
        .map_err(|e| KilnError::io(format!("reading {}", path.display()), e))?;
    Ok(hex::encode(Sha256::digest(&contents)))
}

/// Content digest of a directory tree: relative paths and file bytes, in sorted order
pub async fn tree_digest(root: &Path) -> KilnResult<String> {
    let mut hasher = Sha256::new();
    for file in list_files(root).await? {
        let path = root.join(&file);
        let contents = fs::read(&path)
            .await
            .map_err(|e| KilnError::io(format!("reading {}", path.display()), e))?;
        let name = file.to_string_lossy();
        hasher.update((name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update((contents.len() as u64).to_le_bytes());
        hasher.update(&contents);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Remove a directory tree if it exists
pub async fn remove_dir_if_exists(path: &Path) -> KilnResult<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(KilnError::io(format!("removing {}", path.display()), e)),
    }
}

/// Format bytes as human-readable size (e.g., "1.5 GB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
