//! Base image resolution

use crate::error::{KilnError, KilnResult};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Tag used when a reference has none
const DEFAULT_TAG: &str = "latest";

/// A resolved base image on disk
#[derive(Debug, Clone)]
pub struct BaseImage {
    /// Reference as requested (`name:tag`)
    pub reference: String,
    /// Root filesystem copied into every runtime image
    pub rootfs: PathBuf,
    /// Installable packages, one directory per package
    pub packages: PathBuf,
}

/// Source of base images
#[async_trait]
pub trait BaseImageProvider: Send + Sync {
    async fn resolve(&self, reference: &str) -> KilnResult<BaseImage>;
}

/// Base images stored as `<images_dir>/<name>/<tag>/{rootfs,packages}`
pub struct DirectoryImageProvider {
    images_dir: PathBuf,
}

impl DirectoryImageProvider {
    pub fn new(images_dir: impl Into<PathBuf>) -> Self {
        Self {
            images_dir: images_dir.into(),
        }
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }
}

/// Split `name[:tag]`. Rejects empty parts and path escapes.
pub fn parse_reference(reference: &str) -> Option<(&str, &str)> {
    // A colon before the last slash belongs to a registry port
    let (name, tag) = match reference.rfind(':') {
        Some(idx) if !reference[idx..].contains('/') => (&reference[..idx], &reference[idx + 1..]),
        _ => (reference, DEFAULT_TAG),
    };
    if name.is_empty() || tag.is_empty() || tag.contains('/') {
        return None;
    }
    let safe = Path::new(name)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    safe.then_some((name, tag))
}

#[async_trait]
impl BaseImageProvider for DirectoryImageProvider {
    async fn resolve(&self, reference: &str) -> KilnResult<BaseImage> {
        let not_found = |searched: PathBuf| KilnError::BaseImageNotFound {
            reference: reference.to_string(),
            searched,
        };
        let (name, tag) =
            parse_reference(reference).ok_or_else(|| not_found(self.images_dir.clone()))?;

        let root = self.images_dir.join(name).join(tag);
        let rootfs = root.join("rootfs");
        if !rootfs.is_dir() {
            return Err(not_found(root));
        }

        debug!("Resolved base image {} at {}", reference, root.display());
        Ok(BaseImage {
            reference: reference.to_string(),
            rootfs,
            packages: root.join("packages"),
        })
    }
}
