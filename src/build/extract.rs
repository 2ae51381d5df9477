//! Artifact extraction
//!
//! Picks the single executable the artifact pass produced and copies it out
//! of the build workspace. The workspace itself is only read.

use crate::error::{KilnError, KilnResult};
use crate::fsutil;
use crate::manifest::Manifest;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::TempDir;
use tracing::{debug, info};

/// The compiled executable, detached from the build workspace
#[derive(Debug)]
pub struct BuildArtifact {
    /// Binary target name
    pub name: String,
    /// Location of the copy inside the hand-off directory
    pub path: PathBuf,
    /// SHA-256 of the executable
    pub digest: String,
    pub size_bytes: u64,
    _handoff: TempDir,
}

/// Candidate executables written under `profile_dir` at or after `built_after`
pub async fn candidates(
    profile_dir: &Path,
    manifest: &Manifest,
    built_after: SystemTime,
) -> KilnResult<Vec<String>> {
    let threshold = whole_seconds(built_after);
    let mut found = Vec::new();

    for name in manifest.bin_names() {
        let path = executable_path(profile_dir, name);
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => continue,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(KilnError::io(format!("inspecting {}", path.display()), e)),
        };
        let modified = meta
            .modified()
            .map_err(|e| KilnError::io(format!("reading mtime of {}", path.display()), e))?;
        if modified >= threshold {
            found.push(name.to_string());
        } else {
            debug!("Ignoring {}: not written by this build", path.display());
        }
    }

    Ok(found)
}

/// Copy the build's one executable into a hand-off directory.
///
/// With `primary` set, exactly that binary must have been built. Without it,
/// the build must have produced exactly one candidate.
pub async fn extract(
    profile_dir: &Path,
    manifest: &Manifest,
    primary: Option<&str>,
    built_after: SystemTime,
) -> KilnResult<BuildArtifact> {
    let found = candidates(profile_dir, manifest, built_after).await?;

    let name = match primary {
        Some(primary) => {
            if !found.iter().any(|c| c == primary) {
                return Err(KilnError::ArtifactNotFound {
                    path: executable_path(profile_dir, primary),
                });
            }
            primary.to_string()
        }
        None => match found.as_slice() {
            [] => {
                return Err(KilnError::ArtifactNotFound {
                    path: profile_dir.to_path_buf(),
                })
            }
            [only] => only.clone(),
            _ => return Err(KilnError::AmbiguousArtifact { candidates: found }),
        },
    };

    let source = executable_path(profile_dir, &name);
    let handoff = TempDir::with_prefix("kiln-artifact-")
        .map_err(|e| KilnError::io("creating artifact hand-off directory", e))?;
    let path = handoff.path().join(&name);

    let size_bytes = tokio::fs::copy(&source, &path)
        .await
        .map_err(|e| KilnError::io(format!("copying {}", source.display()), e))?;
    set_executable(&path).await?;
    let digest = fsutil::sha256_file(&path).await?;

    info!("Extracted {} ({}, sha256 {})", name, fsutil::format_bytes(size_bytes), &digest[..12]);
    Ok(BuildArtifact {
        name,
        path,
        digest,
        size_bytes,
        _handoff: handoff,
    })
}

fn executable_path(profile_dir: &Path, name: &str) -> PathBuf {
    profile_dir.join(format!("{}{}", name, std::env::consts::EXE_SUFFIX))
}

/// Filesystems with coarse timestamps round mtimes down
fn whole_seconds(time: SystemTime) -> SystemTime {
    time.duration_since(UNIX_EPOCH)
        .map(|d| UNIX_EPOCH + Duration::from_secs(d.as_secs()))
        .unwrap_or(time)
}

#[cfg(unix)]
pub(crate) async fn set_executable(path: &Path) -> KilnResult<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .await
        .map_err(|e| KilnError::io(format!("setting permissions on {}", path.display()), e))
}

#[cfg(not(unix))]
pub(crate) async fn set_executable(_path: &Path) -> KilnResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(text: &str) -> Manifest {
        Manifest::parse(Path::new("/p/Cargo.toml"), text.as_bytes().to_vec(), None).unwrap()
    }

    const TWO_BINS: &str =
        "[package]\nname = \"svc\"\n[[bin]]\nname = \"server\"\n[[bin]]\nname = \"worker\"\n";

    fn write_bin(dir: &Path, name: &str, contents: &str) {
        std::fs::write(executable_path(dir, name), contents).unwrap();
    }

    #[tokio::test]
    async fn single_binary_is_extracted() {
        let dir = TempDir::new().unwrap();
        let started = SystemTime::now();
        write_bin(dir.path(), "hello", "binary");

        let hello = manifest("[package]\nname = \"hello\"\n");
        let artifact = extract(dir.path(), &hello, None, started).await.unwrap();

        assert_eq!(artifact.name, "hello");
        assert_eq!(artifact.size_bytes, 6);
        assert_eq!(std::fs::read_to_string(&artifact.path).unwrap(), "binary");
        assert_eq!(artifact.digest.len(), 64);
        // Source is left in place
        assert!(executable_path(dir.path(), "hello").exists());
    }

    #[tokio::test]
    async fn handoff_outlives_source_directory() {
        let dir = TempDir::new().unwrap();
        let started = SystemTime::now();
        write_bin(dir.path(), "hello", "binary");
        let hello = manifest("[package]\nname = \"hello\"\n");
        let artifact = extract(dir.path(), &hello, None, started).await.unwrap();

        drop(dir);
        assert!(artifact.path.is_file());
    }

    #[tokio::test]
    async fn two_binaries_without_primary_is_ambiguous() {
        let dir = TempDir::new().unwrap();
        let started = SystemTime::now();
        write_bin(dir.path(), "server", "s");
        write_bin(dir.path(), "worker", "w");

        let err = extract(dir.path(), &manifest(TWO_BINS), None, started).await.unwrap_err();
        match err {
            KilnError::AmbiguousArtifact { candidates } => {
                assert_eq!(candidates, vec!["server", "worker"])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn primary_selects_one_of_several() {
        let dir = TempDir::new().unwrap();
        let started = SystemTime::now();
        write_bin(dir.path(), "server", "s");
        write_bin(dir.path(), "worker", "w");

        let artifact = extract(dir.path(), &manifest(TWO_BINS), Some("worker"), started)
            .await
            .unwrap();
        assert_eq!(artifact.name, "worker");
    }

    #[tokio::test]
    async fn missing_primary_is_not_found() {
        let dir = TempDir::new().unwrap();
        let started = SystemTime::now();
        write_bin(dir.path(), "server", "s");

        let err = extract(dir.path(), &manifest(TWO_BINS), Some("worker"), started)
            .await
            .unwrap_err();
        match err {
            KilnError::ArtifactNotFound { path } => {
                assert!(path.ends_with(format!("worker{}", std::env::consts::EXE_SUFFIX)))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn stale_binaries_are_not_candidates() {
        let dir = TempDir::new().unwrap();
        write_bin(dir.path(), "server", "old");
        let later = SystemTime::now() + Duration::from_secs(120);

        let found = candidates(dir.path(), &manifest(TWO_BINS), later).await.unwrap();
        assert!(found.is_empty());
        let err = extract(dir.path(), &manifest(TWO_BINS), None, later).await.unwrap_err();
        assert!(matches!(err, KilnError::ArtifactNotFound { .. }));
    }
}
