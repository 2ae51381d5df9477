//! End-to-end build pipeline
//!
//! Fingerprint → cache lookup or populate → artifact pass → extract →
//! assemble. Stages run strictly in order and any failure aborts the run
//! before an image is published.

use crate::build::{extract, CompileSettings, CompilerStage, Toolchain};
use crate::cache::DependencyCache;
use crate::error::{KilnError, KilnResult, Stage};
use crate::image::{labels, BaseImageProvider, PackageInstaller, RuntimeAssembler, RuntimeImage};
use crate::manifest::{fingerprint, Fingerprint, Manifest};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info};

/// Inputs for one run
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub project_dir: PathBuf,
    /// Absolute directory images are published to
    pub output_dir: PathBuf,
    pub settings: CompileSettings,
    /// Primary binary when the manifest declares several
    pub primary: Option<String>,
    pub base_image: String,
    pub libraries: Vec<String>,
    pub install_dir: String,
}

/// How the dependency layer was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// A published entry matched; the dependency pass was skipped
    Hit,
    /// This run compiled and published the entry
    Populated,
    /// Another run published the entry while this one waited
    Reused,
}

impl fmt::Display for CacheOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hit => write!(f, "hit"),
            Self::Populated => write!(f, "populated"),
            Self::Reused => write!(f, "reused"),
        }
    }
}

/// Pipeline stage being entered, for progress display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Fingerprint,
    DependencyPass,
    ArtifactPass,
    Extract,
    Assemble,
}

impl Step {
    /// Stage that stage-agnostic failures raised during this step belong to
    pub fn stage(self) -> Stage {
        match self {
            Self::Fingerprint => Stage::Manifest,
            Self::DependencyPass => Stage::Cache,
            Self::ArtifactPass => Stage::Compile,
            Self::Extract => Stage::Extract,
            Self::Assemble => Stage::Assemble,
        }
    }

    fn tag(self) -> impl FnOnce(KilnError) -> KilnError {
        move |e| e.in_stage(self.stage())
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::Fingerprint => "Reading manifest",
            Self::DependencyPass => "Compiling dependencies",
            Self::ArtifactPass => "Compiling application",
            Self::Extract => "Extracting artifact",
            Self::Assemble => "Assembling runtime image",
        };
        write!(f, "{}", message)
    }
}

/// Summary of a successful run
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub package: String,
    pub fingerprint: Fingerprint,
    pub cache: CacheOutcome,
    /// Units compiled by this run's dependency pass (empty on a hit)
    pub dependency_units: Vec<String>,
    /// Units compiled by the artifact pass
    pub artifact_units: Vec<String>,
    pub artifact_name: String,
    pub artifact_digest: String,
    pub artifact_size: u64,
    pub image: RuntimeImage,
}

/// Collaborators for a run
pub struct Pipeline<'a> {
    pub toolchain: &'a dyn Toolchain,
    pub images: &'a dyn BaseImageProvider,
    pub installer: &'a dyn PackageInstaller,
    pub cache: &'a DependencyCache,
}

impl Pipeline<'_> {
    pub async fn run(
        &self,
        options: &PipelineOptions,
        on_step: &(dyn Fn(Step) + Send + Sync),
    ) -> KilnResult<BuildReport> {
        on_step(Step::Fingerprint);
        let manifest = Manifest::load(&options.project_dir)
            .await
            .map_err(Step::Fingerprint.tag())?;
        let fp = fingerprint(&manifest);
        info!("Building {} (fingerprint {})", manifest.package, fp.short());

        let compiler = CompilerStage::new(self.toolchain, options.settings.clone());

        let hit = self.cache.lookup(&fp, &options.settings).await;
        let (entry, cache, dependency_units) = match hit {
            Some(entry) => {
                info!("Dependency cache hit for {}", fp.short());
                (entry, CacheOutcome::Hit, vec![])
            }
            None => {
                on_step(Step::DependencyPass);
                let population = self
                    .cache
                    .populate(&manifest, &compiler)
                    .await
                    .map_err(Step::DependencyPass.tag())?;
                if population.reused {
                    (population.entry, CacheOutcome::Reused, vec![])
                } else {
                    let units = population.entry.compiled.clone();
                    (population.entry, CacheOutcome::Populated, units)
                }
            }
        };

        on_step(Step::ArtifactPass);
        let build = compiler
            .artifact_pass(&manifest, Some(&entry), self.cache, &[options.output_dir.clone()])
            .await
            .map_err(Step::ArtifactPass.tag())?;

        on_step(Step::Extract);
        let artifact = extract(
            &build.profile_dir(&options.settings),
            &manifest,
            options.primary.as_deref(),
            build.started_at,
        )
        .await
        .map_err(Step::Extract.tag())?;
        let artifact_units = build.output.compiled.clone();
        drop(build);
        debug!("Build workspace released");

        on_step(Step::Assemble);
        let base = self
            .images
            .resolve(&options.base_image)
            .await
            .map_err(Step::Assemble.tag())?;
        let mut image_labels = BTreeMap::new();
        image_labels.insert(labels::PACKAGE.to_string(), manifest.package.clone());
        image_labels.insert(labels::FINGERPRINT.to_string(), fp.to_string());
        image_labels.insert(labels::PROFILE.to_string(), options.settings.profile.clone());

        let assembler = RuntimeAssembler::new(self.installer, options.install_dir.clone());
        let image = assembler
            .assemble(&base, &options.libraries, &artifact, &options.output_dir, image_labels)
            .await
            .map_err(Step::Assemble.tag())?;

        Ok(BuildReport {
            package: manifest.package,
            fingerprint: fp,
            cache,
            dependency_units,
            artifact_units,
            artifact_name: artifact.name.clone(),
            artifact_digest: artifact.digest.clone(),
            artifact_size: artifact.size_bytes,
            image,
        })
    }
}
