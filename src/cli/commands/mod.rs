//! CLI command implementations

pub mod build;
pub mod cache;
pub mod config;
pub mod dockerfile;
pub mod fingerprint;

pub use build::execute as build;
pub use cache::execute as cache;
pub use config::execute as config;
pub use dockerfile::execute as dockerfile;
pub use fingerprint::execute as fingerprint;

use crate::build::CompileSettings;
use crate::cache::DependencyCache;
use crate::config::{Config, ConfigManager};
use crate::error::{KilnError, KilnResult};
use std::path::PathBuf;
use tracing::debug;

/// Absolute project directory, defaulting to the working directory
pub(crate) fn project_dir(project: Option<PathBuf>) -> KilnResult<PathBuf> {
    match project {
        Some(p) => p
            .canonicalize()
            .map_err(|e| KilnError::io(format!("resolving project directory {}", p.display()), e)),
        None => std::env::current_dir().map_err(|e| KilnError::io("getting current directory", e)),
    }
}

/// Open the configured dependency cache, or a throwaway one when caching is off
pub(crate) fn open_cache(config: &Config, no_cache: bool) -> KilnResult<DependencyCache> {
    if no_cache || !config.cache.enabled {
        debug!("Dependency cache disabled, using a temporary cache");
        return DependencyCache::ephemeral();
    }
    let root = config.cache.dir.clone().unwrap_or_else(ConfigManager::cache_dir);
    Ok(DependencyCache::new(root))
}

pub(crate) fn compile_settings(config: &Config, profile: Option<String>) -> CompileSettings {
    CompileSettings {
        profile: profile.unwrap_or_else(|| config.build.profile.clone()),
        locked: config.build.locked,
        extra_args: config.build.extra_args.clone(),
    }
}
