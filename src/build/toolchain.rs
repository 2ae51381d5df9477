//! Toolchain abstraction
//!
//! Provides a trait for running one compile so the pipeline can drive
//! different toolchains (Cargo in production, scripted fakes in tests).

use crate::error::{KilnError, KilnResult};
use crate::manifest::Fingerprint;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

/// Max number of output lines to include in compile error messages.
const COMPILE_ERROR_TAIL_LINES: usize = 50;

/// Which of the two compile passes is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Stub source; populates the dependency cache
    Dependency,
    /// Real source; produces the build artifact
    Artifact,
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dependency => write!(f, "dependency"),
            Self::Artifact => write!(f, "artifact"),
        }
    }
}

/// Settings shared by both passes
#[derive(Debug, Clone)]
pub struct CompileSettings {
    pub profile: String,
    pub locked: bool,
    pub extra_args: Vec<String>,
}

impl Default for CompileSettings {
    fn default() -> Self {
        Self {
            profile: "release".to_string(),
            locked: true,
            extra_args: vec![],
        }
    }
}

impl CompileSettings {
    /// Output directory name Cargo uses for this profile
    pub fn profile_dir_name(&self) -> &str {
        match self.profile.as_str() {
            "dev" | "test" => "debug",
            "bench" => "release",
            other => other,
        }
    }

    /// Target triple passed through `--target`, if any
    pub fn target_triple(&self) -> Option<&str> {
        let mut args = self.extra_args.iter();
        while let Some(arg) = args.next() {
            if arg == "--target" {
                return args.next().map(String::as_str);
            }
            if let Some(triple) = arg.strip_prefix("--target=") {
                return Some(triple);
            }
        }
        None
    }

    /// Profile output directory relative to the target directory
    pub fn profile_subdir(&self) -> PathBuf {
        match self.target_triple() {
            Some(triple) => Path::new(triple).join(self.profile_dir_name()),
            None => PathBuf::from(self.profile_dir_name()),
        }
    }

    /// `<target_dir>[/<triple>]/<profile dir>`
    pub fn profile_dir(&self, target_dir: &Path) -> PathBuf {
        target_dir.join(self.profile_subdir())
    }

    /// Short digest of everything that changes what the toolchain writes
    /// into the target directory. Entries are stored per key.
    pub fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.profile.as_bytes());
        for arg in &self.extra_args {
            hasher.update([0u8]);
            hasher.update(arg.as_bytes());
        }
        hex::encode(hasher.finalize())[..16].to_string()
    }
}

/// A single toolchain invocation
#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub pass: Pass,
    /// Directory holding the manifest to compile
    pub workspace: PathBuf,
    pub target_dir: PathBuf,
    pub settings: CompileSettings,
    /// Manifest fingerprint, for logging and error context
    pub fingerprint: Fingerprint,
}

impl CompileRequest {
    pub fn manifest_path(&self) -> PathBuf {
        self.workspace.join(crate::manifest::MANIFEST_FILE)
    }
}

/// What the toolchain reported for one compile
#[derive(Debug, Clone, Default)]
pub struct CompileOutput {
    /// Compilation units the toolchain (re)compiled, in order
    pub compiled: Vec<String>,
    /// Full combined output
    pub log: Vec<String>,
}

impl CompileOutput {
    /// Whether a unit with this name was compiled
    pub fn compiled(&self, name: &str) -> bool {
        let wanted = name.replace('-', "_");
        self.compiled.iter().any(|c| c.replace('-', "_") == wanted)
    }
}

/// Abstract toolchain interface
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Run one compile. Failures return `CompileFailed` with the output tail.
    async fn compile(&self, request: &CompileRequest) -> KilnResult<CompileOutput>;

    /// Human-readable name for display
    fn name(&self) -> &str;
}

/// Toolchain that shells out to `cargo build`
pub struct CargoToolchain {
    program: String,
}

impl CargoToolchain {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn args(request: &CompileRequest) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            "--profile".to_string(),
            request.settings.profile.clone(),
            "--manifest-path".to_string(),
            request.manifest_path().display().to_string(),
            "--target-dir".to_string(),
            request.target_dir.display().to_string(),
        ];

        let has_lockfile = request.workspace.join(crate::manifest::LOCKFILE).is_file();
        if request.settings.locked && has_lockfile {
            args.push("--locked".to_string());
        }

        args.extend(request.settings.extra_args.iter().cloned());
        args
    }
}

impl Default for CargoToolchain {
    fn default() -> Self {
        Self::new("cargo")
    }
}

#[async_trait]
impl Toolchain for CargoToolchain {
    async fn compile(&self, request: &CompileRequest) -> KilnResult<CompileOutput> {
        let args = Self::args(request);
        debug!("Executing: {} {:?}", self.program, args);

        let mut child = Command::new(&self.program)
            .args(&args)
            .current_dir(&request.workspace)
            .env("CARGO_TERM_COLOR", "never")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    KilnError::ToolchainNotFound {
                        program: self.program.clone(),
                    }
                } else {
                    KilnError::command_failed(format!("{} build", self.program), e)
                }
            })?;

        let pass = request.pass;
        let log =
            stream_child_output(&mut child, &|line| debug!("[{} pass] {}", pass, line)).await?;

        let status = child
            .wait()
            .await
            .map_err(|e| KilnError::command_failed(format!("{} build", self.program), e))?;

        if !status.success() {
            return Err(KilnError::CompileFailed {
                pass: request.pass.to_string(),
                fingerprint: request.fingerprint.short().to_string(),
                output: compile_error_output(&log),
            });
        }

        let compiled = parse_compiled_units(&log);
        info!(
            "{} pass compiled {} unit(s) for {}",
            request.pass,
            compiled.len(),
            request.fingerprint.short()
        );
        Ok(CompileOutput { compiled, log })
    }

    fn name(&self) -> &str {
        &self.program
    }
}

/// Extract unit names from `Compiling <name> v<version> (...)` lines
pub fn parse_compiled_units(log: &[String]) -> Vec<String> {
    log.iter()
        .filter_map(|line| {
            let rest = line.trim_start().strip_prefix("Compiling ")?;
            let mut parts = rest.split_whitespace();
            let name = parts.next()?;
            let version = parts.next()?;
            version.starts_with('v').then(|| name.to_string())
        })
        .collect()
}

/// Extract the useful tail of compile output for error diagnostics.
pub fn compile_error_output(log: &[String]) -> String {
    let start = log.len().saturating_sub(COMPILE_ERROR_TAIL_LINES);
    log[start..].join("\n")
}

/// Stream stdout+stderr from a child process, calling `on_output` for each line.
///
/// Returns all collected output lines for error reporting.
pub(crate) async fn stream_child_output(
    child: &mut tokio::process::Child,
    on_output: &(dyn Fn(&str) + Send + Sync),
) -> KilnResult<Vec<String>> {
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| KilnError::Internal("child stderr was not piped".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| KilnError::Internal("child stdout was not piped".to_string()))?;

    let mut stderr_reader = BufReader::new(stderr).lines();
    let mut stdout_reader = BufReader::new(stdout).lines();

    let mut all_output = Vec::new();
    let mut stderr_done = false;
    let mut stdout_done = false;

    while !stderr_done || !stdout_done {
        tokio::select! {
            line = stderr_reader.next_line(), if !stderr_done => {
                match line {
                    Ok(Some(line)) => {
                        on_output(&line);
                        all_output.push(line);
                    }
                    _ => stderr_done = true,
                }
            }
            line = stdout_reader.next_line(), if !stdout_done => {
                match line {
                    Ok(Some(line)) => {
                        on_output(&line);
                        all_output.push(line);
                    }
                    _ => stdout_done = true,
                }
            }
        }
    }

    Ok(all_output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn parses_compiling_lines() {
        let log = lines(
            "   Compiling libc v0.2.150\n   Compiling serde v1.0.190 (registry)\n\
             warning: unused variable\n   Compiling app v0.1.0 (/work/app)\n    Finished release",
        );
        assert_eq!(parse_compiled_units(&log), vec!["libc", "serde", "app"]);
    }

    #[test]
    fn error_output_keeps_tail() {
        let log: Vec<String> = (0..80).map(|i| format!("line {i}")).collect();
        let tail = compile_error_output(&log);
        assert_eq!(tail.lines().count(), COMPILE_ERROR_TAIL_LINES);
        assert!(tail.starts_with("line 30"));
        assert!(tail.ends_with("line 79"));
    }

    #[test]
    fn profile_dirs() {
        let mut settings = CompileSettings::default();
        assert_eq!(settings.profile_dir_name(), "release");
        settings.profile = "dev".to_string();
        assert_eq!(settings.profile_dir_name(), "debug");
        settings.profile = "dist".to_string();
        assert_eq!(settings.profile_dir(Path::new("/t")), PathBuf::from("/t/dist"));
    }

    #[test]
    fn cross_target_profile_dir() {
        let mut settings = CompileSettings::default();
        settings.extra_args = vec!["--target".to_string(), "x86_64-unknown-linux-musl".to_string()];
        assert_eq!(settings.target_triple(), Some("x86_64-unknown-linux-musl"));
        assert_eq!(
            settings.profile_dir(Path::new("/t")),
            PathBuf::from("/t/x86_64-unknown-linux-musl/release")
        );

        settings.extra_args = vec![
            "--features=tls".to_string(),
            "--target=aarch64-unknown-linux-gnu".to_string(),
        ];
        assert_eq!(
            settings.profile_dir(Path::new("/t")),
            PathBuf::from("/t/aarch64-unknown-linux-gnu/release")
        );
    }

    #[test]
    fn cache_key_tracks_profile_and_args() {
        let release = CompileSettings::default();
        let mut dev = CompileSettings::default();
        dev.profile = "dev".to_string();
        let mut cross = CompileSettings::default();
        cross.extra_args = vec!["--target=x86_64-unknown-linux-musl".to_string()];
        let mut unlocked = CompileSettings::default();
        unlocked.locked = false;

        assert_eq!(release.cache_key().len(), 16);
        assert_ne!(release.cache_key(), dev.cache_key());
        assert_ne!(release.cache_key(), cross.cache_key());
        // --locked never changes the outputs
        assert_eq!(release.cache_key(), unlocked.cache_key());
    }

    #[test]
    fn cargo_args_include_locked_only_with_lockfile() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut request = CompileRequest {
            pass: Pass::Dependency,
            workspace: dir.path().to_path_buf(),
            target_dir: dir.path().join("target"),
            settings: CompileSettings::default(),
            fingerprint: Fingerprint::from_contents(b"x", None),
        };
        assert!(!CargoToolchain::args(&request).contains(&"--locked".to_string()));

        std::fs::write(dir.path().join("Cargo.lock"), "").unwrap();
        assert!(CargoToolchain::args(&request).contains(&"--locked".to_string()));

        request.settings.locked = false;
        assert!(!CargoToolchain::args(&request).contains(&"--locked".to_string()));
    }

    #[test]
    fn compiled_normalizes_names() {
        let output = CompileOutput {
            compiled: vec!["serde_json".to_string()],
            log: vec![],
        };
        assert!(output.compiled("serde-json"));
        assert!(!output.compiled("serde"));
    }

    #[tokio::test]
    async fn missing_program_is_toolchain_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let request = CompileRequest {
            pass: Pass::Artifact,
            workspace: dir.path().to_path_buf(),
            target_dir: dir.path().join("target"),
            settings: CompileSettings::default(),
            fingerprint: Fingerprint::from_contents(b"x", None),
        };
        let toolchain = CargoToolchain::new("kiln-no-such-toolchain");
        let err = toolchain.compile(&request).await.unwrap_err();
        assert!(matches!(err, KilnError::ToolchainNotFound { .. }));
    }
}
