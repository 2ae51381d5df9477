//! Error types for kiln
//!
//! All modules use `KilnResult<T>` as their return type. Every pipeline
//! failure is fatal to the run; `KilnError::stage()` names the stage that
//! failed so operators can tell manifest, source and packaging problems apart.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for kiln operations
pub type KilnResult<T> = Result<T, KilnError>;

/// Pipeline stage an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Manifest,
    Cache,
    Compile,
    Extract,
    Assemble,
    Internal,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Config => "config",
            Self::Manifest => "manifest",
            Self::Cache => "cache",
            Self::Compile => "compile",
            Self::Extract => "extract",
            Self::Assemble => "assemble",
            Self::Internal => "internal",
        };
        write!(f, "{}", name)
    }
}

/// All errors that can occur in kiln
#[derive(Error, Debug)]
pub enum KilnError {
    // Manifest errors
    #[error("Manifest unreadable at {path}: {reason}")]
    ManifestUnreadable { path: PathBuf, reason: String },

    // Cache errors
    #[error("Dependency cache not populated for fingerprint {fingerprint}")]
    CacheNotPopulated { fingerprint: String },

    #[error("Cache entry {fingerprint} is corrupt: {reason}")]
    CacheCorrupt { fingerprint: String, reason: String },

    #[error("Failed to lock cache entry {fingerprint}: {source}")]
    CacheLock {
        fingerprint: String,
        #[source]
        source: std::io::Error,
    },

    // Compile errors
    #[error(
        "Unresolved dependency `{name}` in {pass} pass (fingerprint {fingerprint}): \
         not declared in the manifest"
    )]
    UnresolvedDependency {
        name: String,
        pass: String,
        fingerprint: String,
    },

    #[error("Compilation failed in {pass} pass (fingerprint {fingerprint}):\n{output}")]
    CompileFailed {
        pass: String,
        fingerprint: String,
        output: String,
    },

    #[error("Toolchain not found: {program}")]
    ToolchainNotFound { program: String },

    // Extract errors
    #[error("Build artifact not found at {path}")]
    ArtifactNotFound { path: PathBuf },

    #[error(
        "Ambiguous build artifact: {} candidates ({}) and no primary declared",
        candidates.len(),
        candidates.join(", ")
    )]
    AmbiguousArtifact { candidates: Vec<String> },

    // Assemble errors
    #[error("Base image not found: {reference} (searched {searched})")]
    BaseImageNotFound { reference: String, searched: PathBuf },

    #[error("Missing runtime library `{name}` in package source {source_dir}")]
    MissingRuntimeLibrary { name: String, source_dir: PathBuf },

    #[error("Runtime image would contain build-time file {path}")]
    ImageContaminated { path: PathBuf },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),

    /// A stage-agnostic error (IO, serialization) raised while `stage` ran
    #[error("{source}")]
    InStage {
        stage: Stage,
        source: Box<KilnError>,
    },
}

impl KilnError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a manifest error for the given path
    pub fn manifest(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ManifestUnreadable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Attribute this error to `stage` unless it already names one
    pub fn in_stage(self, stage: Stage) -> Self {
        match self.stage() {
            Stage::Internal => Self::InStage {
                stage,
                source: Box::new(self),
            },
            _ => self,
        }
    }

    /// The pipeline stage this error belongs to
    pub fn stage(&self) -> Stage {
        match self {
            Self::InStage { stage, .. } => *stage,
            Self::ManifestUnreadable { .. } => Stage::Manifest,
            Self::CacheNotPopulated { .. } | Self::CacheCorrupt { .. } | Self::CacheLock { .. } => {
                Stage::Cache
            }
            Self::UnresolvedDependency { .. }
            | Self::CompileFailed { .. }
            | Self::ToolchainNotFound { .. } => Stage::Compile,
            Self::ArtifactNotFound { .. } | Self::AmbiguousArtifact { .. } => Stage::Extract,
            Self::BaseImageNotFound { .. }
            | Self::MissingRuntimeLibrary { .. }
            | Self::ImageContaminated { .. } => Stage::Assemble,
            Self::ConfigInvalid { .. } | Self::ConfigDirCreate { .. } | Self::TomlParse(_) => {
                Stage::Config
            }
            _ => Stage::Internal,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::InStage { source, .. } => source.hint(),
            Self::ManifestUnreadable { .. } => {
                Some("Check that Cargo.toml exists and parses; this is a manifest problem")
            }
            Self::UnresolvedDependency { .. } => {
                Some("Add the crate to [dependencies] in Cargo.toml; source and manifest disagree")
            }
            Self::CompileFailed { .. } => {
                Some("Fix the compile error above; this is a source problem")
            }
            Self::ToolchainNotFound { .. } => {
                Some("Install Rust from https://rustup.rs or set build.toolchain")
            }
            Self::AmbiguousArtifact { .. } => Some("Pick one with --bin or build.bin in kiln.toml"),
            Self::ArtifactNotFound { .. } => {
                Some("Check that the [[bin]] name matches build.bin; this is a packaging problem")
            }
            Self::MissingRuntimeLibrary { .. } => {
                Some("Check runtime.libraries against the base image's packages directory")
            }
            Self::BaseImageNotFound { .. } => {
                Some("Check runtime.base_image and runtime.images_dir")
            }
            Self::CacheLock { .. } | Self::CacheCorrupt { .. } => Some("Run: kiln cache gc"),
            _ => None,
        }
    }
}
