//! Dependency manifest parsing
//!
//! Reads a project's `Cargo.toml` (and `Cargo.lock`, when present) into an
//! immutable [`Manifest`]. Dependency declarations keep their file order.

pub mod fingerprint;

pub use fingerprint::{fingerprint, Fingerprint};

use crate::error::{KilnError, KilnResult};
use semver::VersionReq;
use std::fmt;
use std::path::{Path, PathBuf};
use toml_edit::{DocumentMut, Item, TableLike};
use tracing::debug;

/// Manifest file name
pub const MANIFEST_FILE: &str = "Cargo.toml";

/// Lockfile that sits next to the manifest
pub const LOCKFILE: &str = "Cargo.lock";

/// Where a dependency is resolved from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// Registry dependency with a version requirement
    Version(VersionReq),
    /// Local crate on disk (as written in the manifest)
    Path(PathBuf),
    /// Git repository URL
    Git(String),
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // VersionReq renders "1.0" as "^1.0"; keep the caret implicit like Cargo does
            Self::Version(req) => write!(f, "{}", req.to_string().trim_start_matches('^')),
            Self::Path(path) => write!(f, "path+{}", path.display()),
            Self::Git(url) => write!(f, "git+{}", url),
        }
    }
}

/// Dependency table a declaration came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    Normal,
    Build,
}

/// A single dependency declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Name the dependency is declared under
    pub name: String,
    pub requirement: Requirement,
    pub kind: DependencyKind,
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.requirement)
    }
}

/// Kind of compilation target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Bin,
    Lib,
    BuildScript,
    /// Declared `[[example]]`, `[[test]]` or `[[bench]]` target
    Auxiliary,
}

/// A compilation target the toolchain expects to find source for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub kind: TargetKind,
    pub name: String,
    /// Source path relative to the project root
    pub path: PathBuf,
}

/// Parsed dependency manifest
#[derive(Debug, Clone)]
pub struct Manifest {
    /// Path of the manifest file
    pub path: PathBuf,
    /// `[package] name`
    pub package: String,
    /// Declarations in file order (normal, target-specific, then build)
    pub dependencies: Vec<Dependency>,
    /// Targets (explicit and auto-discovered)
    pub targets: Vec<Target>,
    contents: Vec<u8>,
    lockfile: Option<Vec<u8>>,
}

impl Manifest {
    /// Load the manifest from a project directory
    pub async fn load(project_dir: &Path) -> KilnResult<Self> {
        let path = project_dir.join(MANIFEST_FILE);
        let contents = tokio::fs::read(&path)
            .await
            .map_err(|e| KilnError::manifest(&path, e.to_string()))?;

        let lock_path = project_dir.join(LOCKFILE);
        let lockfile = if lock_path.is_file() {
            let bytes = tokio::fs::read(&lock_path)
                .await
                .map_err(|e| KilnError::manifest(&lock_path, e.to_string()))?;
            Some(bytes)
        } else {
            None
        };

        let manifest = Self::parse(&path, contents, lockfile)?;
        debug!(
            "Loaded manifest for {} with {} dependencies",
            manifest.package,
            manifest.dependencies.len()
        );
        Ok(manifest)
    }

    /// Parse manifest bytes. Auto-discovered targets are looked up next to `path`.
    pub fn parse(path: &Path, contents: Vec<u8>, lockfile: Option<Vec<u8>>) -> KilnResult<Self> {
        let text = std::str::from_utf8(&contents)
            .map_err(|e| KilnError::manifest(path, format!("not valid UTF-8: {}", e)))?;
        let doc: DocumentMut = text
            .parse()
            .map_err(|e: toml_edit::TomlError| KilnError::manifest(path, e.to_string()))?;

        let package_table = doc
            .get("package")
            .and_then(Item::as_table_like)
            .ok_or_else(|| KilnError::manifest(path, "missing [package] table"))?;
        let package = package_table
            .get("name")
            .and_then(Item::as_str)
            .ok_or_else(|| KilnError::manifest(path, "missing package.name"))?
            .to_string();

        let mut dependencies = Vec::new();
        if let Some(table) = doc.get("dependencies").and_then(Item::as_table_like) {
            collect_dependencies(path, table, DependencyKind::Normal, &mut dependencies)?;
        }
        if let Some(targets) = doc.get("target").and_then(Item::as_table_like) {
            for (_, platform) in targets.iter() {
                if let Some(table) = platform.get("dependencies").and_then(Item::as_table_like) {
                    collect_dependencies(path, table, DependencyKind::Normal, &mut dependencies)?;
                }
            }
        }
        for key in ["build-dependencies", "build_dependencies"] {
            if let Some(table) = doc.get(key).and_then(Item::as_table_like) {
                collect_dependencies(path, table, DependencyKind::Build, &mut dependencies)?;
            }
        }

        let root = path.parent().unwrap_or_else(|| Path::new("."));
        let targets = discover_targets(root, &doc, package_table, &package);

        Ok(Self {
            path: path.to_path_buf(),
            package,
            dependencies,
            targets,
            contents,
            lockfile,
        })
    }

    /// Project root (directory holding the manifest)
    pub fn root(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Raw manifest bytes
    pub fn contents(&self) -> &[u8] {
        &self.contents
    }

    /// Raw lockfile bytes, if a lockfile was present
    pub fn lockfile(&self) -> Option<&[u8]> {
        self.lockfile.as_deref()
    }

    /// Crate name of the package's own code as the toolchain writes it
    pub fn crate_name(&self) -> String {
        self.package.replace('-', "_")
    }

    /// Names of declared binary targets
    pub fn bin_names(&self) -> Vec<&str> {
        self.targets
            .iter()
            .filter(|t| t.kind == TargetKind::Bin)
            .map(|t| t.name.as_str())
            .collect()
    }

    /// Whether the manifest declares a dependency with this name
    pub fn declares(&self, name: &str) -> bool {
        let wanted = name.replace('-', "_");
        self.dependencies
            .iter()
            .any(|d| d.name.replace('-', "_") == wanted)
    }
}

fn collect_dependencies(
    path: &Path,
    table: &dyn TableLike,
    kind: DependencyKind,
    out: &mut Vec<Dependency>,
) -> KilnResult<()> {
    for (name, item) in table.iter() {
        let requirement = parse_requirement(path, name, item)?;
        out.push(Dependency {
            name: name.to_string(),
            requirement,
            kind,
        });
    }
    Ok(())
}

fn parse_requirement(path: &Path, name: &str, item: &Item) -> KilnResult<Requirement> {
    if let Some(version) = item.as_str() {
        return parse_version(path, name, version);
    }

    let table = item.as_table_like().ok_or_else(|| {
        KilnError::manifest(path, format!("dependency `{}` must be a string or table", name))
    })?;

    if table.get("workspace").and_then(Item::as_bool) == Some(true) {
        return Err(KilnError::manifest(
            path,
            format!("dependency `{}` inherits from a workspace, which is not supported", name),
        ));
    }
    if let Some(dep_path) = table.get("path").and_then(Item::as_str) {
        return Ok(Requirement::Path(PathBuf::from(dep_path)));
    }
    if let Some(url) = table.get("git").and_then(Item::as_str) {
        return Ok(Requirement::Git(url.to_string()));
    }
    if let Some(version) = table.get("version").and_then(Item::as_str) {
        return parse_version(path, name, version);
    }

    Err(KilnError::manifest(
        path,
        format!("dependency `{}` has no version, path, or git source", name),
    ))
}

fn parse_version(path: &Path, name: &str, version: &str) -> KilnResult<Requirement> {
    VersionReq::parse(version)
        .map(Requirement::Version)
        .map_err(|e| {
            KilnError::manifest(
                path,
                format!("dependency `{}` has invalid version `{}`: {}", name, version, e),
            )
        })
}

/// Resolve targets the way Cargo does for a single package: explicit `[lib]`,
/// `[[bin]]` and `package.build`, plus auto-discovery of `src/main.rs`,
/// `src/lib.rs`, `src/bin/*.rs` and `build.rs`.
fn discover_targets(
    root: &Path,
    doc: &DocumentMut,
    package_table: &dyn TableLike,
    package: &str,
) -> Vec<Target> {
    let mut targets = Vec::new();

    let lib_table = doc.get("lib").and_then(Item::as_table_like);
    if lib_table.is_some() || root.join("src/lib.rs").is_file() {
        let name = lib_table
            .and_then(|t| t.get("name"))
            .and_then(Item::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| package.replace('-', "_"));
        let path = lib_table
            .and_then(|t| t.get("path"))
            .and_then(Item::as_str)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("src/lib.rs"));
        targets.push(Target {
            kind: TargetKind::Lib,
            name,
            path,
        });
    }

    if let Some(bins) = doc.get("bin").and_then(Item::as_array_of_tables) {
        for bin in bins.iter() {
            let name = bin
                .get("name")
                .and_then(Item::as_str)
                .unwrap_or(package)
                .to_string();
            let path = bin
                .get("path")
                .and_then(Item::as_str)
                .map(PathBuf::from)
                .unwrap_or_else(|| {
                    if name == package {
                        PathBuf::from("src/main.rs")
                    } else {
                        PathBuf::from(format!("src/bin/{}.rs", name))
                    }
                });
            targets.push(Target {
                kind: TargetKind::Bin,
                name,
                path,
            });
        }
    }

    let autobins = package_table
        .get("autobins")
        .and_then(Item::as_bool)
        .unwrap_or(true);
    if autobins {
        let mut auto = Vec::new();
        if root.join("src/main.rs").is_file() {
            auto.push((package.to_string(), PathBuf::from("src/main.rs")));
        }
        if let Ok(entries) = std::fs::read_dir(root.join("src/bin")) {
            let mut found: Vec<_> = entries
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "rs"))
                .collect();
            found.sort();
            for file in found {
                if let Some(stem) = file.file_stem().and_then(|s| s.to_str()) {
                    auto.push((stem.to_string(), PathBuf::from(format!("src/bin/{}.rs", stem))));
                }
            }
        }
        for (name, path) in auto {
            let declared = targets
                .iter()
                .any(|t| t.kind == TargetKind::Bin && (t.name == name || t.path == path));
            if !declared {
                targets.push(Target {
                    kind: TargetKind::Bin,
                    name,
                    path,
                });
            }
        }
    }

    // Cargo validates explicit auxiliary target paths even for a plain build
    for (key, dir) in [("example", "examples"), ("test", "tests"), ("bench", "benches")] {
        if let Some(declared) = doc.get(key).and_then(Item::as_array_of_tables) {
            for table in declared.iter() {
                let Some(name) = table.get("name").and_then(Item::as_str) else {
                    continue;
                };
                let path = table
                    .get("path")
                    .and_then(Item::as_str)
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(format!("{}/{}.rs", dir, name)));
                targets.push(Target {
                    kind: TargetKind::Auxiliary,
                    name: name.to_string(),
                    path,
                });
            }
        }
    }

    // A package with no targets at all still needs an entry point for the stub
    if !targets
        .iter()
        .any(|t| matches!(t.kind, TargetKind::Bin | TargetKind::Lib))
    {
        targets.push(Target {
            kind: TargetKind::Bin,
            name: package.to_string(),
            path: PathBuf::from("src/main.rs"),
        });
    }

    let build = package_table.get("build");
    let build_script = match build {
        Some(item) if item.as_bool() == Some(false) => None,
        Some(item) if item.as_bool() == Some(true) => Some(PathBuf::from("build.rs")),
        Some(item) => item.as_str().map(PathBuf::from),
        None => root.join("build.rs").is_file().then(|| PathBuf::from("build.rs")),
    };
    if let Some(path) = build_script {
        targets.push(Target {
            kind: TargetKind::BuildScript,
            name: "build-script-build".to_string(),
            path,
        });
    }

    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SERVICE_MANIFEST: &str = r#"
[package]
name = "config-service"
version = "0.4.0"
edition = "2021"

[dependencies]
serde = { version = "1.0", features = ["derive"] }
regex = "1"
local-util = { path = "../util" }
templating = { git = "https://example.com/templating.git" }

[target.'cfg(unix)'.dependencies]
libc = "0.2"

[build-dependencies]
cc = "1.0"
"#;

    fn parse(text: &str) -> KilnResult<Manifest> {
        let dir = TempDir::new().unwrap();
        Manifest::parse(&dir.path().join(MANIFEST_FILE), text.as_bytes().to_vec(), None)
    }

    #[test]
    fn parses_dependencies_in_order() {
        let manifest = parse(SERVICE_MANIFEST).unwrap();
        assert_eq!(manifest.package, "config-service");

        let names: Vec<_> = manifest.dependencies.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["serde", "regex", "local-util", "templating", "libc", "cc"]);
        assert_eq!(manifest.dependencies[5].kind, DependencyKind::Build);
        assert!(matches!(manifest.dependencies[2].requirement, Requirement::Path(_)));
        assert!(matches!(manifest.dependencies[3].requirement, Requirement::Git(_)));
    }

    #[test]
    fn dependency_display() {
        let manifest = parse(
            r#"
[package]
name = "app"
[dependencies]
libfoo = "1.0"
"#,
        )
        .unwrap();
        assert_eq!(manifest.dependencies[0].to_string(), "libfoo@1.0");
    }

    #[test]
    fn missing_package_is_unreadable() {
        let err = parse("[workspace]\nmembers = [\"a\"]\n").unwrap_err();
        assert!(matches!(err, KilnError::ManifestUnreadable { .. }));
    }

    #[test]
    fn invalid_version_is_unreadable() {
        let err = parse(
            r#"
[package]
name = "app"
[dependencies]
libfoo = "not-a-version"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("libfoo"));
    }

    #[test]
    fn broken_toml_is_unreadable() {
        let err = parse("[package\nname = ").unwrap_err();
        assert!(matches!(err, KilnError::ManifestUnreadable { .. }));
    }

    #[tokio::test]
    async fn load_missing_manifest() {
        let dir = TempDir::new().unwrap();
        let err = Manifest::load(dir.path()).await.unwrap_err();
        match err {
            KilnError::ManifestUnreadable { path, .. } => {
                assert_eq!(path, dir.path().join(MANIFEST_FILE));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn load_reads_lockfile() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), "[package]\nname = \"app\"\n").unwrap();
        std::fs::write(dir.path().join(LOCKFILE), "version = 3\n").unwrap();

        let manifest = Manifest::load(dir.path()).await.unwrap();
        assert_eq!(manifest.lockfile(), Some(&b"version = 3\n"[..]));
    }

    #[test]
    fn default_target_is_main_bin() {
        let manifest = parse("[package]\nname = \"hello-world\"\n").unwrap();
        assert_eq!(manifest.bin_names(), vec!["hello-world"]);
        assert_eq!(manifest.targets[0].path, PathBuf::from("src/main.rs"));
        assert_eq!(manifest.crate_name(), "hello_world");
    }

    #[test]
    fn discovers_declared_and_auto_targets() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src/bin")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("src/bin/worker.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("build.rs"), "fn main() {}").unwrap();

        let text = r#"
[package]
name = "svc"

[[bin]]
name = "admin"
path = "tools/admin.rs"
"#;
        let manifest = Manifest::parse(
            &dir.path().join(MANIFEST_FILE),
            text.as_bytes().to_vec(),
            None,
        )
        .unwrap();

        assert_eq!(manifest.bin_names(), vec!["admin", "svc", "worker"]);
        assert!(manifest.targets.iter().any(|t| t.kind == TargetKind::Lib));
        assert!(manifest
            .targets
            .iter()
            .any(|t| t.kind == TargetKind::BuildScript && t.path == PathBuf::from("build.rs")));
    }

    #[test]
    fn declares_normalizes_dashes() {
        let manifest = parse(SERVICE_MANIFEST).unwrap();
        assert!(manifest.declares("local_util"));
        assert!(manifest.declares("serde"));
        assert!(!manifest.declares("tokio"));
    }
}
