//! Runtime library installation

use crate::error::{KilnError, KilnResult};
use crate::fsutil;
use crate::image::base::BaseImage;
use async_trait::async_trait;
use std::path::Path;
use tracing::info;

/// Installs named runtime libraries into a root filesystem
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Install every name or fail; a failure installs nothing the caller keeps
    async fn install(&self, base: &BaseImage, names: &[String], rootfs: &Path) -> KilnResult<()>;
}

/// Copies `<packages>/<name>/` trees over the rootfs
#[derive(Debug, Default)]
pub struct DirectoryPackageInstaller;

#[async_trait]
impl PackageInstaller for DirectoryPackageInstaller {
    async fn install(&self, base: &BaseImage, names: &[String], rootfs: &Path) -> KilnResult<()> {
        for name in names {
            let valid = !name.is_empty() && !name.contains('/') && name != "." && name != "..";
            if !valid || !base.packages.join(name).is_dir() {
                return Err(KilnError::MissingRuntimeLibrary {
                    name: name.clone(),
                    source_dir: base.packages.clone(),
                });
            }
        }

        for name in names {
            let bytes = fsutil::copy_dir_all(&base.packages.join(name), rootfs).await?;
            info!("Installed {} ({})", name, fsutil::format_bytes(bytes));
        }
        Ok(())
    }
}
