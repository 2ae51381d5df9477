//! Dockerfile rendering
//!
//! Emits a multi-stage Dockerfile that performs the same layered build as
//! the local pipeline: the dependency layer depends only on the manifest and
//! lockfile, so container build caches reuse it until those change.

use crate::build::stub::stub_source;
use crate::build::CompileSettings;
use crate::error::{KilnError, KilnResult};
use crate::manifest::{fingerprint, Manifest, Requirement, TargetKind, LOCKFILE, MANIFEST_FILE};
use std::path::Path;

/// Working directory of the builder stage
const BUILD_DIR: &str = "/build";

/// Everything besides the manifest that shapes the Dockerfile
#[derive(Debug, Clone)]
pub struct DockerfileOptions {
    pub builder_image: String,
    pub base_image: String,
    pub libraries: Vec<String>,
    pub install_dir: String,
    pub primary: Option<String>,
    pub settings: CompileSettings,
}

/// Render the Dockerfile for `manifest`
pub fn generate_dockerfile(manifest: &Manifest, options: &DockerfileOptions) -> KilnResult<String> {
    let bin = select_bin(manifest, options.primary.as_deref())?;
    let profile_dir = format!("target/{}", options.settings.profile_subdir().display());
    let build_cmd = build_command(manifest, &options.settings);

    let mut lines = Vec::new();
    lines.push("# syntax=docker/dockerfile:1".to_string());
    lines.push(format!(
        "# Generated by kiln for {} (manifest {})",
        manifest.package,
        fingerprint(manifest).short()
    ));
    for dep in &manifest.dependencies {
        if let Requirement::Path(path) = &dep.requirement {
            lines.push(format!(
                "# warning: path dependency `{}` ({}) must be inside the build context",
                dep.name,
                path.display()
            ));
        }
    }
    lines.push(String::new());

    // Builder: dependency layer
    lines.push(format!("FROM {} AS builder", options.builder_image));
    lines.push(format!("WORKDIR {}", BUILD_DIR));
    let mut copied = vec![MANIFEST_FILE];
    if manifest.lockfile().is_some() {
        copied.push(LOCKFILE);
    }
    lines.push(format!("COPY {} ./", copied.join(" ")));

    let mut stub_files = Vec::new();
    for target in &manifest.targets {
        let path = target.path.to_string_lossy().to_string();
        lines.push(format!("RUN {}", stub_command(&path, target.kind)));
        stub_files.push(shell_quote(&path));
    }
    lines.push(format!("RUN {}", build_cmd));

    let mut doomed = stub_files;
    doomed.extend(byproduct_globs(manifest, &profile_dir));
    lines.push(format!("RUN rm -rf {}", doomed.join(" ")));
    lines.push(String::new());

    // Builder: artifact layer
    lines.push("COPY . .".to_string());
    lines.push(format!("RUN {}", build_cmd));
    lines.push(String::new());

    // Runtime
    let entrypoint = format!("{}/{}", options.install_dir.trim_end_matches('/'), bin);
    lines.push(format!("FROM {}", options.base_image));
    if !options.libraries.is_empty() {
        let packages: Vec<String> = options.libraries.iter().map(|l| shell_quote(l)).collect();
        lines.push(format!(
            "RUN apt-get update && apt-get install -y --no-install-recommends {} \
             && rm -rf /var/lib/apt/lists/*",
            packages.join(" ")
        ));
    }
    lines.push(format!(
        "COPY --from=builder {}/{}/{} {}",
        BUILD_DIR, profile_dir, bin, entrypoint
    ));
    lines.push(format!("ENTRYPOINT {}", serde_json::to_string(&[entrypoint])?));

    Ok(lines.join("\n") + "\n")
}

fn select_bin(manifest: &Manifest, primary: Option<&str>) -> KilnResult<String> {
    let bins = manifest.bin_names();
    match primary {
        Some(name) if bins.contains(&name) => Ok(name.to_string()),
        Some(name) => Err(KilnError::ArtifactNotFound {
            path: Path::new("target").join(name),
        }),
        None => match bins.as_slice() {
            [only] => Ok(only.to_string()),
            [] => Err(KilnError::ArtifactNotFound {
                path: Path::new("target").to_path_buf(),
            }),
            _ => Err(KilnError::AmbiguousArtifact {
                candidates: bins.iter().map(|b| b.to_string()).collect(),
            }),
        },
    }
}

fn build_command(manifest: &Manifest, settings: &CompileSettings) -> String {
    let mut args = vec![
        "cargo".to_string(),
        "build".to_string(),
        "--profile".to_string(),
        shell_quote(&settings.profile),
    ];
    if settings.locked && manifest.lockfile().is_some() {
        args.push("--locked".to_string());
    }
    args.extend(settings.extra_args.iter().map(|a| shell_quote(a)));
    args.join(" ")
}

fn stub_command(path: &str, kind: TargetKind) -> String {
    let lines: Vec<String> = stub_source(kind).lines().map(shell_quote).collect();
    let write = format!("printf '%s\\n' {} > {}", lines.join(" "), shell_quote(path));
    match Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => format!("mkdir -p {} && {}", shell_quote(&parent.to_string_lossy()), write),
        None => write,
    }
}

/// Globs matching exactly the package's own units (`<name>-<16 hex>`)
fn byproduct_globs(manifest: &Manifest, profile_dir: &str) -> Vec<String> {
    let hash = "[0-9a-f]".repeat(16);
    let mut names = vec![manifest.crate_name()];
    for target in &manifest.targets {
        if matches!(target.kind, TargetKind::Bin | TargetKind::Lib) {
            names.push(target.name.replace('-', "_"));
        }
    }
    names.push(manifest.package.clone());
    names.sort();
    names.dedup();

    let mut globs = Vec::new();
    for bin in manifest.bin_names() {
        globs.push(format!("{}/{}", profile_dir, shell_quote(bin)));
        globs.push(format!("{}/{}.d", profile_dir, shell_quote(bin)));
    }
    for sub in ["deps", ".fingerprint", "build", "incremental"] {
        for name in &names {
            globs.push(format!("{}/{}/{}-{}*", profile_dir, sub, name, hash));
            if sub == "deps" {
                globs.push(format!("{}/{}/lib{}-{}*", profile_dir, sub, name, hash));
            }
        }
    }
    globs.push(format!("{}/lib{}.*", profile_dir, manifest.crate_name()));
    globs
}

/// Quote a value for a POSIX shell `RUN` line.
/// Plain words pass through; anything else is single-quoted.
fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '=' | ':' | '+')
        });
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "'\\''"))
    }
}
