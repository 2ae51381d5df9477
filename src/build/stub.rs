//! Dependency stub generation
//!
//! Writes a placeholder copy of the project that has the real manifest but
//! no real code, so one toolchain run compiles every dependency. Each stub
//! file carries [`STUB_MARKER`] and is removed, together with everything the
//! toolchain built from it, before the artifact pass.

use crate::error::{KilnError, KilnResult};
use crate::manifest::{Manifest, TargetKind, LOCKFILE, MANIFEST_FILE};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use toml_edit::{DocumentMut, Item};
use tracing::debug;

/// Sentinel carried by every generated stub file
pub const STUB_MARKER: &str = "kiln:dependency-stub";

/// Dependency tables that may hold `path = "..."` entries
const DEPENDENCY_TABLES: &[&str] = &["dependencies", "dev-dependencies", "build-dependencies"];

/// Subdirectories of a profile directory that hold per-unit byproducts
const BYPRODUCT_DIRS: &[&str] = &["deps", ".fingerprint", "build", "incremental"];

/// A generated stub source tree
#[derive(Debug)]
pub struct StubProgram {
    root: PathBuf,
    files: Vec<PathBuf>,
    /// Unit name prefixes (`<name>-<hash>`) the package's own targets compile to
    unit_prefixes: BTreeSet<String>,
    /// Executables the stub build writes to the profile directory
    bins: Vec<String>,
    /// Library crate name, if the package has a lib target
    lib: Option<String>,
}

/// Placeholder source for a target
pub fn stub_source(kind: TargetKind) -> String {
    match kind {
        TargetKind::Lib => format!("// {}\n", STUB_MARKER),
        TargetKind::Bin | TargetKind::BuildScript | TargetKind::Auxiliary => {
            format!("// {}\nfn main() {{}}\n", STUB_MARKER)
        }
    }
}

/// Whether file contents came from the stub generator
pub fn is_stub_source(contents: &str) -> bool {
    contents
        .lines()
        .next()
        .is_some_and(|first| first.trim() == format!("// {}", STUB_MARKER))
}

/// Render the manifest with relative `path` dependencies made absolute, so it
/// resolves the same dependencies from any directory.
pub fn portable_manifest(manifest: &Manifest) -> KilnResult<String> {
    let text = std::str::from_utf8(manifest.contents())
        .map_err(|e| KilnError::manifest(&manifest.path, e.to_string()))?;
    let mut doc: DocumentMut = text
        .parse()
        .map_err(|e: toml_edit::TomlError| KilnError::manifest(&manifest.path, e.to_string()))?;
    let root = manifest.root();

    for table in DEPENDENCY_TABLES {
        if let Some(item) = doc.get_mut(table) {
            absolutize_paths(item, root);
        }
    }
    if let Some(targets) = doc.get_mut("target").and_then(Item::as_table_like_mut) {
        for (_, platform) in targets.iter_mut() {
            for table in DEPENDENCY_TABLES {
                if let Some(item) = platform.get_mut(table) {
                    absolutize_paths(item, root);
                }
            }
        }
    }
    if let Some(patches) = doc.get_mut("patch").and_then(Item::as_table_like_mut) {
        for (_, registry) in patches.iter_mut() {
            absolutize_paths(registry, root);
        }
    }

    Ok(doc.to_string())
}

fn absolutize_paths(table: &mut Item, root: &Path) {
    let Some(table) = table.as_table_like_mut() else {
        return;
    };
    for (_, dep) in table.iter_mut() {
        let Some(dep) = dep.as_table_like_mut() else {
            continue;
        };
        let Some(relative) = dep.get("path").and_then(Item::as_str).map(PathBuf::from) else {
            continue;
        };
        if relative.is_relative() {
            let absolute = root.join(&relative);
            dep.insert("path", toml_edit::value(absolute.display().to_string()));
        }
    }
}

impl StubProgram {
    /// Write the stub tree for `manifest` under `root`
    pub async fn generate(manifest: &Manifest, root: &Path) -> KilnResult<Self> {
        fs::create_dir_all(root)
            .await
            .map_err(|e| KilnError::io(format!("creating stub workspace {}", root.display()), e))?;

        let manifest_text = portable_manifest(manifest)?;
        write_file(&root.join(MANIFEST_FILE), manifest_text.as_bytes()).await?;
        if let Some(lock) = manifest.lockfile() {
            write_file(&root.join(LOCKFILE), lock).await?;
        }

        let mut files = Vec::new();
        let mut unit_prefixes = BTreeSet::new();
        let mut bins = Vec::new();
        let mut lib = None;
        unit_prefixes.insert(manifest.package.clone());
        unit_prefixes.insert(manifest.crate_name());

        for target in &manifest.targets {
            let path = root.join(&target.path);
            write_file(&path, stub_source(target.kind).as_bytes()).await?;
            files.push(path);

            match target.kind {
                TargetKind::Bin => {
                    unit_prefixes.insert(target.name.clone());
                    unit_prefixes.insert(target.name.replace('-', "_"));
                    bins.push(target.name.clone());
                }
                TargetKind::Lib => {
                    unit_prefixes.insert(target.name.clone());
                    lib = Some(target.name.replace('-', "_"));
                }
                TargetKind::BuildScript | TargetKind::Auxiliary => {}
            }
        }

        debug!("Generated stub with {} file(s) in {}", files.len(), root.display());
        Ok(Self {
            root: root.to_path_buf(),
            files,
            unit_prefixes,
            bins,
            lib,
        })
    }

    /// Stub workspace root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Generated source files
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Remove the stub sources and every byproduct of the package's own units
    /// from `profile_dir`, leaving only compiled dependencies. Returns the
    /// number of removed entries.
    pub async fn discard(self, profile_dir: &Path) -> KilnResult<usize> {
        let mut removed = 0;

        for name in self.profile_root_outputs() {
            let path = profile_dir.join(&name);
            if remove_any(&path).await? {
                removed += 1;
            }
        }

        for sub in BYPRODUCT_DIRS {
            let dir = profile_dir.join(sub);
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(KilnError::io(format!("reading {}", dir.display()), e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| KilnError::io(format!("reading entry in {}", dir.display()), e))?
            {
                let name = entry.file_name().to_string_lossy().to_string();
                if self.is_own_unit(&name) && remove_any(&entry.path()).await? {
                    removed += 1;
                }
            }
        }

        if remove_any(&self.root).await? {
            removed += 1;
        }

        debug!("Discarded {} stub byproduct(s)", removed);
        Ok(removed)
    }

    /// Files the toolchain writes directly into the profile directory
    fn profile_root_outputs(&self) -> Vec<String> {
        let mut names = Vec::new();
        for bin in &self.bins {
            names.push(format!("{}{}", bin, std::env::consts::EXE_SUFFIX));
            names.push(format!("{}.d", bin));
            names.push(format!("{}.pdb", bin.replace('-', "_")));
        }
        if let Some(lib) = &self.lib {
            for ext in ["rlib", "rmeta", "d"] {
                names.push(format!("lib{}.{}", lib, ext));
            }
        }
        names
    }

    /// Unit outputs are named `<prefix>-<16 hex>` with an optional `lib` prefix
    /// and extension; anything else belongs to a dependency.
    fn is_own_unit(&self, file_name: &str) -> bool {
        let stem = file_name.split('.').next().unwrap_or(file_name);
        let candidates = [stem, stem.strip_prefix("lib").unwrap_or(stem)];

        candidates.iter().any(|name| {
            self.unit_prefixes.iter().any(|prefix| {
                name.strip_prefix(prefix.as_str())
                    .and_then(|rest| rest.strip_prefix('-'))
                    .is_some_and(|hash| {
                        !hash.is_empty() && hash.chars().all(|c| c.is_ascii_hexdigit())
                    })
            })
        })
    }
}

async fn write_file(path: &Path, contents: &[u8]) -> KilnResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| KilnError::io(format!("creating {}", parent.display()), e))?;
    }
    fs::write(path, contents)
        .await
        .map_err(|e| KilnError::io(format!("writing {}", path.display()), e))
}

/// Remove a file or directory; returns whether anything was there
async fn remove_any(path: &Path) -> KilnResult<bool> {
    let meta = match fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(KilnError::io(format!("inspecting {}", path.display()), e)),
    };
    let result = if meta.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    };
    result.map_err(|e| KilnError::io(format!("removing {}", path.display()), e))?;
    Ok(true)
}
