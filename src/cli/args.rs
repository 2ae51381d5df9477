//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

/// Kiln - layered build pipeline for Rust services
///
/// Compiles dependencies once per manifest fingerprint, rebuilds only
/// your own code, and packages the binary into a minimal runtime image.
#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "KILN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Skip local kiln.toml discovery
    #[arg(long, global = true)]
    pub no_local: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the project into a runtime image
    Build(BuildArgs),

    /// Print the manifest fingerprint and its cache state
    Fingerprint(FingerprintArgs),

    /// Print an equivalent multi-stage Dockerfile
    Dockerfile(DockerfileArgs),

    /// Manage the dependency cache
    Cache(CacheArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

impl Commands {
    /// Project directory named on the command line, if any
    pub fn project(&self) -> Option<&Path> {
        match self {
            Self::Build(args) => args.project.as_deref(),
            Self::Fingerprint(args) => args.project.as_deref(),
            Self::Dockerfile(args) => args.project.as_deref(),
            Self::Cache(CacheArgs {
                action: CacheAction::Info { project },
            }) => project.as_deref(),
            Self::Cache(_) | Self::Config(_) => None,
        }
    }
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Project directory (defaults to current directory)
    #[arg(short, long)]
    pub project: Option<PathBuf>,

    /// Output directory for the runtime image (default: runtime.output_dir)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Primary binary when the manifest declares several
    #[arg(long)]
    pub bin: Option<String>,

    /// Cargo profile (default: build.profile)
    #[arg(long)]
    pub profile: Option<String>,

    /// Base image reference (default: runtime.base_image)
    #[arg(long)]
    pub base_image: Option<String>,

    /// Runtime libraries to install (comma-separated, replaces runtime.libraries)
    #[arg(long, value_delimiter = ',')]
    pub libraries: Vec<String>,

    /// Build without the persistent dependency cache
    #[arg(long)]
    pub no_cache: bool,
}

/// Arguments for the fingerprint command
#[derive(Parser, Debug)]
pub struct FingerprintArgs {
    /// Project directory (defaults to current directory)
    #[arg(short, long)]
    pub project: Option<PathBuf>,

    /// Print only the fingerprint
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the dockerfile command
#[derive(Parser, Debug)]
pub struct DockerfileArgs {
    /// Project directory (defaults to current directory)
    #[arg(short, long)]
    pub project: Option<PathBuf>,

    /// Primary binary when the manifest declares several
    #[arg(long)]
    pub bin: Option<String>,

    /// Write to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for listings
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Fingerprints only, one per line
    Plain,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List cache entries
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Show cache state for a project
    Info {
        /// Project directory (defaults to current directory)
        #[arg(short, long)]
        project: Option<PathBuf>,
    },

    /// Remove old entries and abandoned staging directories
    Gc {
        /// Remove entries older than N days (default: from config)
        #[arg(long)]
        days: Option<u32>,

        /// Dry run - show what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// Remove every cache entry
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}
