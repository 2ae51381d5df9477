//! Configuration schema for kiln
//!
//! Global configuration is stored at `~/.config/kiln/config.toml`; a
//! project-local `kiln.toml` is merged on top of it.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Toolchain and compile settings
    pub build: BuildConfig,

    /// Dependency cache settings
    pub cache: CacheConfig,

    /// Runtime image settings
    pub runtime: RuntimeConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Toolchain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Toolchain program to invoke
    pub toolchain: String,

    /// Cargo profile used for both passes
    pub profile: String,

    /// Primary binary when the manifest declares several
    pub bin: Option<String>,

    /// Pass --locked when a Cargo.lock is present
    pub locked: bool,

    /// Extra arguments appended to every toolchain invocation
    pub extra_args: Vec<String>,

    /// Builder image used by `kiln dockerfile`
    pub builder_image: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            toolchain: "cargo".to_string(),
            profile: "release".to_string(),
            bin: None,
            locked: true,
            extra_args: vec![],
            builder_image: "rust:1".to_string(),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable dependency caching (default: true)
    pub enabled: bool,

    /// Cache root directory (default: `<state dir>/kiln/cache`)
    pub dir: Option<PathBuf>,

    /// Default age for `kiln cache gc`, in days (0 = disabled)
    pub gc_days: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            gc_days: 30,
        }
    }
}

/// Runtime image configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Base image reference (`name:tag`)
    pub base_image: String,

    /// Directory holding base images as `<name>/<tag>/{rootfs,packages}`
    pub images_dir: Option<PathBuf>,

    /// Runtime libraries to install into the image
    pub libraries: Vec<String>,

    /// Directory inside the image the artifact is installed to
    pub install_dir: String,

    /// Where assembled images are written (relative to the project)
    pub output_dir: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            base_image: "debian:bookworm-slim".to_string(),
            images_dir: None,
            libraries: vec![],
            install_dir: "/usr/local/bin".to_string(),
            output_dir: PathBuf::from("dist"),
        }
    }
}
