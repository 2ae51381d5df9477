//! Runtime image assembly
//!
//! Builds the image in a staging directory next to its final location and
//! publishes it with one rename, so a failed assembly never leaves a
//! half-built image where the final one belongs.

use crate::build::extract::set_executable;
use crate::build::{BuildArtifact, STUB_MARKER};
use crate::error::{KilnError, KilnResult};
use crate::fsutil;
use crate::image::base::BaseImage;
use crate::image::packages::PackageInstaller;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Runtime configuration file at the image root
pub const IMAGE_CONFIG_FILE: &str = "config.json";

/// Current `config.json` layout
const SCHEMA_VERSION: u32 = 1;

/// File extensions only a toolchain produces or consumes
const BUILD_ONLY_EXTENSIONS: &[&str] = &["rlib", "rmeta", "d", "o", "rs"];

/// Files larger than this are not scanned for the stub marker
const MARKER_SCAN_LIMIT: u64 = 64 * 1024;

/// Image label keys
pub mod labels {
    pub const PACKAGE: &str = "io.kiln.package";
    pub const FINGERPRINT: &str = "io.kiln.manifest.fingerprint";
    pub const PROFILE: &str = "io.kiln.profile";
}

/// The artifact as recorded in `config.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub name: String,
    /// Absolute path inside the image
    pub path: String,
    pub digest: String,
    pub size_bytes: u64,
}

/// Contents of `config.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    pub schema_version: u32,
    pub base_image: String,
    /// Exactly one element: the artifact path
    pub entrypoint: Vec<String>,
    pub libraries: Vec<String>,
    pub artifact: ArtifactInfo,
    pub labels: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// A published runtime image
#[derive(Debug, Clone)]
pub struct RuntimeImage {
    pub path: PathBuf,
    pub config: ImageConfig,
    /// Digest over the rootfs contents
    pub digest: String,
}

impl RuntimeImage {
    pub fn rootfs(&self) -> PathBuf {
        self.path.join("rootfs")
    }

    /// Read a published image back from disk
    pub async fn load(path: &Path) -> KilnResult<Self> {
        let config_path = path.join(IMAGE_CONFIG_FILE);
        let bytes = tokio::fs::read(&config_path)
            .await
            .map_err(|e| KilnError::io(format!("reading {}", config_path.display()), e))?;
        let config: ImageConfig = serde_json::from_slice(&bytes)?;
        let digest = fsutil::tree_digest(&path.join("rootfs")).await?;
        Ok(Self {
            path: path.to_path_buf(),
            config,
            digest,
        })
    }
}

/// Assembles runtime images from a base, libraries and one artifact
pub struct RuntimeAssembler<'a> {
    installer: &'a dyn PackageInstaller,
    install_dir: String,
}

impl<'a> RuntimeAssembler<'a> {
    pub fn new(installer: &'a dyn PackageInstaller, install_dir: impl Into<String>) -> Self {
        Self {
            installer,
            install_dir: install_dir.into(),
        }
    }

    /// Assemble and publish `<output_dir>/<artifact name>`
    pub async fn assemble(
        &self,
        base: &BaseImage,
        libraries: &[String],
        artifact: &BuildArtifact,
        output_dir: &Path,
        labels: BTreeMap<String, String>,
    ) -> KilnResult<RuntimeImage> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| KilnError::io(format!("creating {}", output_dir.display()), e))?;

        let staging = output_dir.join(format!(".{}.staging-{}", artifact.name, Uuid::new_v4()));
        let result = self
            .assemble_staged(base, libraries, artifact, &staging, labels)
            .await;

        let config = match result {
            Ok(config) => config,
            Err(e) => {
                if let Err(cleanup) = fsutil::remove_dir_if_exists(&staging).await {
                    warn!("Failed to remove {}: {}", staging.display(), cleanup);
                }
                return Err(e);
            }
        };

        let final_dir = output_dir.join(&artifact.name);
        publish(&staging, &final_dir).await?;

        let digest = fsutil::tree_digest(&final_dir.join("rootfs")).await?;
        info!("Assembled runtime image {} (rootfs {})", final_dir.display(), &digest[..12]);
        Ok(RuntimeImage {
            path: final_dir,
            config,
            digest,
        })
    }

    async fn assemble_staged(
        &self,
        base: &BaseImage,
        libraries: &[String],
        artifact: &BuildArtifact,
        staging: &Path,
        labels: BTreeMap<String, String>,
    ) -> KilnResult<ImageConfig> {
        let rootfs = staging.join("rootfs");
        let bytes = fsutil::copy_dir_all(&base.rootfs, &rootfs).await?;
        debug!("Copied base {} ({})", base.reference, fsutil::format_bytes(bytes));

        self.installer.install(base, libraries, &rootfs).await?;

        let entrypoint = format!("{}/{}", self.install_dir.trim_end_matches('/'), artifact.name);
        let dest = rootfs.join(entrypoint.trim_start_matches('/'));
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| KilnError::io(format!("creating {}", parent.display()), e))?;
        }
        tokio::fs::copy(&artifact.path, &dest)
            .await
            .map_err(|e| KilnError::io(format!("installing {}", artifact.name), e))?;
        set_executable(&dest).await?;

        audit_rootfs(&rootfs).await?;

        let config = ImageConfig {
            schema_version: SCHEMA_VERSION,
            base_image: base.reference.clone(),
            entrypoint: vec![entrypoint.clone()],
            libraries: libraries.to_vec(),
            artifact: ArtifactInfo {
                name: artifact.name.clone(),
                path: entrypoint,
                digest: artifact.digest.clone(),
                size_bytes: artifact.size_bytes,
            },
            labels,
            created_at: Utc::now(),
        };
        let config_path = staging.join(IMAGE_CONFIG_FILE);
        tokio::fs::write(&config_path, serde_json::to_vec_pretty(&config)?)
            .await
            .map_err(|e| KilnError::io(format!("writing {}", config_path.display()), e))?;

        Ok(config)
    }
}

/// Fail if the rootfs holds toolchain objects, Rust source or stub files
pub async fn audit_rootfs(rootfs: &Path) -> KilnResult<()> {
    for file in fsutil::list_files(rootfs).await? {
        let build_only = file
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| BUILD_ONLY_EXTENSIONS.contains(&ext));
        if build_only {
            return Err(KilnError::ImageContaminated { path: file });
        }

        let path = rootfs.join(&file);
        let small = tokio::fs::metadata(&path)
            .await
            .map(|m| m.len() <= MARKER_SCAN_LIMIT)
            .unwrap_or(false);
        if small {
            let contents = tokio::fs::read(&path)
                .await
                .map_err(|e| KilnError::io(format!("reading {}", path.display()), e))?;
            if contains(&contents, STUB_MARKER.as_bytes()) {
                return Err(KilnError::ImageContaminated { path: file });
            }
        }
    }
    Ok(())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Move staging into place, replacing any previous image
async fn publish(staging: &Path, final_dir: &Path) -> KilnResult<()> {
    let previous = if final_dir.exists() {
        let name = final_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let old = final_dir.with_file_name(format!(".{}.old-{}", name, Uuid::new_v4()));
        tokio::fs::rename(final_dir, &old)
            .await
            .map_err(|e| KilnError::io(format!("moving aside {}", final_dir.display()), e))?;
        Some(old)
    } else {
        None
    };

    if let Err(e) = tokio::fs::rename(staging, final_dir).await {
        if let Some(old) = &previous {
            // Put the previous image back
            if let Err(restore) = tokio::fs::rename(old, final_dir).await {
                warn!(
                    "Failed to restore previous image {} from {}: {}",
                    final_dir.display(),
                    old.display(),
                    restore
                );
            }
        }
        if let Err(cleanup) = fsutil::remove_dir_if_exists(staging).await {
            warn!("Failed to remove {}: {}", staging.display(), cleanup);
        }
        return Err(KilnError::io(format!("publishing {}", final_dir.display()), e));
    }

    if let Some(old) = previous {
        fsutil::remove_dir_if_exists(&old).await?;
    }
    Ok(())
}
