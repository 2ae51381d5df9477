//! Two-pass compile protocol
//!
//! The dependency pass compiles a stub against the real manifest and feeds
//! only the cache. The artifact pass compiles the real source on top of a
//! populated cache entry for the same fingerprint; it refuses to run
//! otherwise.

use crate::build::stub::StubProgram;
use crate::build::toolchain::{CompileOutput, CompileRequest, CompileSettings, Pass, Toolchain};
use crate::build::workspace::BuildWorkspace;
use crate::cache::{CacheEntry, DependencyCache};
use crate::error::{KilnError, KilnResult};
use crate::manifest::{fingerprint, Fingerprint, Manifest};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::info;

/// Diagnostics that only rustc or cargo emit for a crate that is not linked.
/// Unresolved imports and undeclared modules also fire for local modules and
/// stay plain compile failures.
const UNRESOLVED_PATTERNS: &[&str] = &[
    "can't find crate for `",
    "unresolved module or unlinked crate `",
    "no matching package named `",
];

/// Path roots that are never dependencies
const BUILTIN_ROOTS: &[&str] = &[
    "std",
    "core",
    "alloc",
    "crate",
    "self",
    "super",
    "proc_macro",
    "test",
];

/// Drives both passes with one toolchain and one set of settings
pub struct CompilerStage<'a> {
    toolchain: &'a dyn Toolchain,
    settings: CompileSettings,
}

/// Result of the artifact pass; the workspace still holds the outputs
#[derive(Debug)]
pub struct ArtifactBuild {
    pub workspace: BuildWorkspace,
    pub output: CompileOutput,
    /// When the toolchain was started
    pub started_at: SystemTime,
}

impl ArtifactBuild {
    /// Directory the artifact pass wrote executables to
    pub fn profile_dir(&self, settings: &CompileSettings) -> PathBuf {
        settings.profile_dir(&self.workspace.target_dir())
    }
}

impl<'a> CompilerStage<'a> {
    pub fn new(toolchain: &'a dyn Toolchain, settings: CompileSettings) -> Self {
        Self { toolchain, settings }
    }

    pub fn settings(&self) -> &CompileSettings {
        &self.settings
    }

    /// Compile the stub in `stub.root()` into `target_dir`
    pub async fn dependency_pass(
        &self,
        manifest: &Manifest,
        stub: &StubProgram,
        target_dir: &Path,
        fingerprint: &Fingerprint,
    ) -> KilnResult<CompileOutput> {
        info!(
            "Dependency pass for {} ({} dependencies, fingerprint {})",
            manifest.package,
            manifest.dependencies.len(),
            fingerprint.short()
        );
        let request = CompileRequest {
            pass: Pass::Dependency,
            workspace: stub.root().to_path_buf(),
            target_dir: target_dir.to_path_buf(),
            settings: self.settings.clone(),
            fingerprint: fingerprint.clone(),
        };
        self.toolchain
            .compile(&request)
            .await
            .map_err(|e| classify_failure(e, manifest))
    }

    /// Compile the real source against the cached dependencies.
    ///
    /// `entry` must be the populated entry for this manifest's fingerprint and
    /// these settings, and still be present in `cache`. `exclude` lists
    /// project paths that are not source (e.g. the image output directory).
    pub async fn artifact_pass(
        &self,
        manifest: &Manifest,
        entry: Option<&CacheEntry>,
        cache: &DependencyCache,
        exclude: &[PathBuf],
    ) -> KilnResult<ArtifactBuild> {
        let fp = fingerprint(manifest);
        let not_populated = || KilnError::CacheNotPopulated {
            fingerprint: fp.to_string(),
        };

        let key = self.settings.cache_key();
        match entry {
            Some(entry) if entry.fingerprint == fp && entry.settings_key == key => {}
            _ => return Err(not_populated()),
        }

        // Shared lock while the entry is copied so it cannot be removed midway
        let guard = cache.read_guard(&fp).await?;
        let entry = cache.lookup(&fp, &self.settings).await.ok_or_else(not_populated)?;
        let workspace = BuildWorkspace::prepare(manifest, &entry, exclude).await?;
        drop(guard);
        info!("Artifact pass for {} (fingerprint {})", manifest.package, fp.short());

        let request = CompileRequest {
            pass: Pass::Artifact,
            workspace: workspace.source_dir(),
            target_dir: workspace.target_dir(),
            settings: self.settings.clone(),
            fingerprint: fp,
        };
        let started_at = SystemTime::now();
        let output = self
            .toolchain
            .compile(&request)
            .await
            .map_err(|e| classify_failure(e, manifest))?;

        Ok(ArtifactBuild {
            workspace,
            output,
            started_at,
        })
    }
}

/// Turn a compile failure that names an undeclared crate into
/// `UnresolvedDependency`; other errors pass through.
pub fn classify_failure(err: KilnError, manifest: &Manifest) -> KilnError {
    match err {
        KilnError::CompileFailed {
            pass,
            fingerprint,
            output,
        } => match unresolved_crate(&output, manifest) {
            Some(name) => KilnError::UnresolvedDependency {
                name,
                pass,
                fingerprint,
            },
            None => KilnError::CompileFailed {
                pass,
                fingerprint,
                output,
            },
        },
        other => other,
    }
}

/// First crate named by an unresolved-import diagnostic that the manifest
/// does not declare
pub fn unresolved_crate(output: &str, manifest: &Manifest) -> Option<String> {
    for line in output.lines() {
        for pattern in UNRESOLVED_PATTERNS {
            let Some(start) = line.find(pattern) else {
                continue;
            };
            let rest = &line[start + pattern.len()..];
            let Some(end) = rest.find('`') else {
                continue;
            };
            let root = rest[..end]
                .trim_start_matches("::")
                .split("::")
                .next()
                .unwrap_or_default()
                .trim();

            if root.is_empty() || BUILTIN_ROOTS.contains(&root) || manifest.declares(root) {
                continue;
            }
            return Some(root.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> Manifest {
        let text = "[package]\nname = \"app\"\n[dependencies]\nlibfoo = \"1.0\"\n";
        Manifest::parse(Path::new("/p/Cargo.toml"), text.as_bytes().to_vec(), None).unwrap()
    }

    fn failed(output: &str) -> KilnError {
        KilnError::CompileFailed {
            pass: "artifact".to_string(),
            fingerprint: "abc".to_string(),
            output: output.to_string(),
        }
    }

    #[test]
    fn missing_crate_is_unresolved_dependency() {
        let err = classify_failure(
            failed("error[E0463]: can't find crate for `libbar`\n  --> src/main.rs:1:1"),
            &manifest(),
        );
        match err {
            KilnError::UnresolvedDependency { name, pass, .. } => {
                assert_eq!(name, "libbar");
                assert_eq!(pass, "artifact");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unlinked_crate_uses_path_root() {
        let output = "error[E0433]: failed to resolve: \
                      use of unresolved module or unlinked crate `regex::Regex`";
        assert_eq!(unresolved_crate(output, &manifest()), Some("regex".to_string()));
    }

    #[test]
    fn declared_and_builtin_roots_are_ignored() {
        let output = "error[E0463]: can't find crate for `std`\n\
                      error[E0463]: can't find crate for `libfoo`";
        assert_eq!(unresolved_crate(output, &manifest()), None);
        assert!(matches!(
            classify_failure(failed(output), &manifest()),
            KilnError::CompileFailed { .. }
        ));
    }

    #[test]
    fn missing_local_module_is_compile_failure() {
        let output = "error[E0432]: unresolved import `utils`\n\
                      error[E0433]: failed to resolve: use of undeclared crate or module `helpers`";
        assert_eq!(unresolved_crate(output, &manifest()), None);
        match classify_failure(failed(output), &manifest()) {
            KilnError::CompileFailed { output: kept, .. } => assert!(kept.contains("utils")),
            other => panic!("unexpected error: {other}"),
        }
    }

    fn write(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    /// `app` depending on `a1..a8`, each depending on its own `bN`, all by path
    fn path_dependency_project(root: &Path) -> PathBuf {
        let mut app = String::from(
            "[package]\nname = \"app\"\nversion = \"0.1.0\"\nedition = \"2021\"\n\n\
             [dependencies]\n",
        );
        let mut sum = Vec::new();
        for n in 1..=8 {
            write(
                &root.join(format!("crates/b{n}/Cargo.toml")),
                &format!("[package]\nname = \"b{n}\"\nversion = \"0.1.0\"\nedition = \"2021\"\n"),
            );
            write(
                &root.join(format!("crates/b{n}/src/lib.rs")),
                &format!("pub fn value() -> u32 {{ {n} }}\n"),
            );
            write(
                &root.join(format!("crates/a{n}/Cargo.toml")),
                &format!(
                    "[package]\nname = \"a{n}\"\nversion = \"0.1.0\"\nedition = \"2021\"\n\n\
                     [dependencies]\nb{n} = {{ path = \"../b{n}\" }}\n"
                ),
            );
            write(
                &root.join(format!("crates/a{n}/src/lib.rs")),
                &format!("pub fn value() -> u32 {{ b{n}::value() * 10 }}\n"),
            );
            app.push_str(&format!("a{n} = {{ path = \"../crates/a{n}\" }}\n"));
            sum.push(format!("a{n}::value()"));
        }
        let project = root.join("app");
        write(&project.join("Cargo.toml"), &app);
        write(
            &project.join("src/main.rs"),
            &format!("fn main() {{ println!(\"{{}}\", {}); }}\n", sum.join(" + ")),
        );
        project
    }

    #[tokio::test]
    async fn cargo_reuses_cached_path_dependencies() {
        let cargo = std::env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());
        if std::process::Command::new(&cargo).arg("--version").output().is_err() {
            eprintln!("cargo not available, skipping");
            return;
        }

        let sources = tempfile::TempDir::new().unwrap();
        let store = tempfile::TempDir::new().unwrap();
        let project = path_dependency_project(sources.path());
        let manifest = Manifest::load(&project).await.unwrap();
        let cache = DependencyCache::new(store.path());

        let toolchain = crate::build::CargoToolchain::new(cargo);
        let settings = CompileSettings {
            profile: "dev".to_string(),
            locked: true,
            extra_args: vec!["--offline".to_string()],
        };
        let compiler = CompilerStage::new(&toolchain, settings);

        let population = cache.populate(&manifest, &compiler).await.unwrap();
        let mut cached = population.entry.compiled.clone();
        cached.sort();
        let mut expected: Vec<String> = (1..=8).map(|n| format!("a{n}")).collect();
        expected.extend((1..=8).map(|n| format!("b{n}")));
        assert_eq!(cached, expected);

        // The copied dependency tree is fresh: only the application recompiles
        let build = compiler
            .artifact_pass(&manifest, Some(&population.entry), &cache, &[])
            .await
            .unwrap();
        assert_eq!(build.output.compiled, vec!["app"]);
        let binary = format!("app{}", std::env::consts::EXE_SUFFIX);
        assert!(build.profile_dir(compiler.settings()).join(binary).is_file());
    }

    #[test]
    fn other_errors_pass_through() {
        let err = classify_failure(KilnError::Internal("x".to_string()), &manifest());
        assert!(matches!(err, KilnError::Internal(_)));
    }
}
