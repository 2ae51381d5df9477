//! Test utilities for kiln.
//!
//! Provides a scripted toolchain that mimics Cargo's on-disk behavior closely
//! enough to exercise the cache and pipeline, plus project and base image
//! fixtures.

use crate::build::{CompileOutput, CompileRequest, Pass, Toolchain};
use crate::error::{KilnError, KilnResult};
use crate::manifest::Manifest;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// Built-in path roots the fake compiler never treats as crates
const BUILTIN: &[&str] = &["std", "core", "alloc", "crate", "self", "super"];

/// Toolchain double.
///
/// A dependency is "compiled" only when its `deps/lib<name>-<hash>.rlib` is
/// missing from the target directory, so reuse of a copied cache shows up in
/// [`CompileOutput::compiled`]. The package's own unit always compiles.
/// Binaries are derived from the source bytes, so identical source gives
/// identical artifacts.
#[derive(Default)]
pub struct FakeToolchain {
    fail_pass: Option<Pass>,
    skip_binary: bool,
    delay: Option<Duration>,
    dependency_runs: AtomicUsize,
    artifact_runs: AtomicUsize,
}

impl FakeToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every compile of this pass with a generic error
    pub fn fail_pass(mut self, pass: Pass) -> Self {
        self.fail_pass = Some(pass);
        self
    }

    /// Succeed without writing any executables
    pub fn skip_binary(mut self) -> Self {
        self.skip_binary = true;
        self
    }

    /// Sleep before compiling, to widen race windows
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn dependency_runs(&self) -> usize {
        self.dependency_runs.load(Ordering::SeqCst)
    }

    pub fn artifact_runs(&self) -> usize {
        self.artifact_runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Toolchain for FakeToolchain {
    async fn compile(&self, request: &CompileRequest) -> KilnResult<CompileOutput> {
        match request.pass {
            Pass::Dependency => self.dependency_runs.fetch_add(1, Ordering::SeqCst),
            Pass::Artifact => self.artifact_runs.fetch_add(1, Ordering::SeqCst),
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failed = |output: String| KilnError::CompileFailed {
            pass: request.pass.to_string(),
            fingerprint: request.fingerprint.short().to_string(),
            output,
        };
        if self.fail_pass == Some(request.pass) {
            return Err(failed("error: could not compile (forced failure)".to_string()));
        }

        let manifest = Manifest::load(&request.workspace).await?;
        let profile_dir = request.settings.profile_dir(&request.target_dir);
        let deps_dir = profile_dir.join("deps");
        std::fs::create_dir_all(&deps_dir).map_err(|e| KilnError::io("creating deps", e))?;

        let mut compiled = Vec::new();
        let mut log = Vec::new();
        for dep in &manifest.dependencies {
            let rlib = deps_dir.join(format!(
                "lib{}-{}.rlib",
                dep.name.replace('-', "_"),
                short_hash(dep.to_string().as_bytes())
            ));
            if !rlib.exists() {
                std::fs::write(&rlib, dep.to_string())
                    .map_err(|e| KilnError::io("writing rlib", e))?;
                log.push(format!("   Compiling {} v1.0.0", dep.name));
                compiled.push(dep.name.clone());
            }
        }

        // Source check and binary content
        let mut source_hasher = Sha256::new();
        for target in &manifest.targets {
            let path = request.workspace.join(&target.path);
            let source = std::fs::read_to_string(&path)
                .map_err(|_| failed(format!("error: couldn't read {}", target.path.display())))?;
            if let Some(missing) = referenced_crates(&source)
                .into_iter()
                .find(|name| !manifest.declares(name))
            {
                return Err(failed(format!("error[E0463]: can't find crate for `{}`", missing)));
            }
            source_hasher.update(target.path.to_string_lossy().as_bytes());
            source_hasher.update(source.as_bytes());
        }
        let source_digest = hex::encode(source_hasher.finalize());

        let unit = format!("{}-{}", manifest.crate_name(), short_hash(manifest.package.as_bytes()));
        std::fs::write(deps_dir.join(&unit), &source_digest)
            .map_err(|e| KilnError::io("writing unit", e))?;
        std::fs::create_dir_all(profile_dir.join(".fingerprint").join(&unit))
            .map_err(|e| KilnError::io("writing fingerprint", e))?;
        log.push(format!(
            "   Compiling {} v0.1.0 ({})",
            manifest.package,
            request.workspace.display()
        ));
        compiled.push(manifest.package.clone());

        if !self.skip_binary {
            for bin in manifest.bin_names() {
                let path = profile_dir.join(format!("{}{}", bin, std::env::consts::EXE_SUFFIX));
                std::fs::write(&path, format!("#!fake-binary {}\n{}\n", bin, source_digest))
                    .map_err(|e| KilnError::io("writing binary", e))?;
            }
        }

        log.push(format!("    Finished `{}` profile", request.settings.profile));
        Ok(CompileOutput { compiled, log })
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Crate roots named by `extern crate` and `use` items
fn referenced_crates(source: &str) -> Vec<String> {
    let mut found = Vec::new();
    for line in source.lines().map(str::trim) {
        let path = if let Some(rest) = line.strip_prefix("extern crate ") {
            rest.split([' ', ';']).next()
        } else if let Some(rest) = line.strip_prefix("use ") {
            rest.split("::").next().filter(|_| rest.contains("::"))
        } else {
            None
        };
        if let Some(root) = path.map(str::trim) {
            if !root.is_empty() && !BUILTIN.contains(&root) && !found.iter().any(|f| f == root) {
                found.push(root.to_string());
            }
        }
    }
    found
}

fn short_hash(bytes: &[u8]) -> String {
    hex::encode(&Sha256::digest(bytes)[..8])
}

/// Project directory with `Cargo.toml` and the given source files
pub fn write_project(manifest: &str, files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().expect("create project dir");
    write_file(&dir.path().join("Cargo.toml"), manifest);
    for (path, contents) in files {
        write_file(&dir.path().join(path), contents);
    }
    dir
}

/// Writes `contents` to `path`, creating parent directories
pub fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent dir");
    }
    std::fs::write(path, contents).expect("write fixture file");
}

/// Base image `<name>:<tag>` under `images_dir` with a tiny rootfs and the
/// given installable packages (each with one file under `usr/lib`)
pub fn write_base_image(images_dir: &Path, name: &str, tag: &str, packages: &[&str]) {
    let root = images_dir.join(name).join(tag);
    write_file(&root.join("rootfs/etc/os-release"), &format!("ID={}\n", name));
    std::fs::create_dir_all(root.join("rootfs/usr/local/bin")).expect("create bin dir");
    for package in packages {
        write_file(
            &root.join("packages").join(package).join("usr/lib").join(format!("{}.so", package)),
            package,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_extern_and_use_roots() {
        let source = "extern crate libfoo;\nuse libbar::Thing;\nuse std::fmt;\n\
                      use self::inner::x;\nfn main() {}\n";
        assert_eq!(referenced_crates(source), vec!["libfoo", "libbar"]);
    }

    #[test]
    fn plain_use_of_local_item_is_ignored() {
        assert!(referenced_crates("use foo;\n").is_empty());
    }
}
