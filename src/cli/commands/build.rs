//! Build command - run the full pipeline

use super::{compile_settings, open_cache, project_dir};
use crate::build::CargoToolchain;
use crate::cli::args::BuildArgs;
use crate::config::{Config, ConfigManager};
use crate::error::KilnResult;
use crate::fsutil::format_bytes;
use crate::image::{DirectoryImageProvider, DirectoryPackageInstaller};
use crate::pipeline::{CacheOutcome, Pipeline, PipelineOptions};
use crate::ui::{self, BuildProgress, UiContext};
use tracing::{debug, info};

/// Execute the build command
pub async fn execute(args: BuildArgs, config: &Config) -> KilnResult<()> {
    let ctx = UiContext::detect();
    let project_dir = project_dir(args.project)?;

    let output_dir = args.output.unwrap_or_else(|| config.runtime.output_dir.clone());
    let output_dir = if output_dir.is_absolute() {
        output_dir
    } else {
        project_dir.join(output_dir)
    };

    let libraries = if args.libraries.is_empty() {
        config.runtime.libraries.clone()
    } else {
        args.libraries
    };

    let options = PipelineOptions {
        project_dir: project_dir.clone(),
        output_dir,
        settings: compile_settings(config, args.profile),
        primary: args.bin.or_else(|| config.build.bin.clone()),
        base_image: args.base_image.unwrap_or_else(|| config.runtime.base_image.clone()),
        libraries,
        install_dir: config.runtime.install_dir.clone(),
    };
    debug!("Build options: {:?}", options);

    let cache = open_cache(config, args.no_cache)?;
    let toolchain = CargoToolchain::new(config.build.toolchain.clone());
    let images = DirectoryImageProvider::new(
        config
            .runtime
            .images_dir
            .clone()
            .unwrap_or_else(ConfigManager::images_dir),
    );
    let installer = DirectoryPackageInstaller;

    let pipeline = Pipeline {
        toolchain: &toolchain,
        images: &images,
        installer: &installer,
        cache: &cache,
    };

    let label = project_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());

    ui::intro(&ctx, "kiln build");
    let progress = BuildProgress::new(&ctx, &label);
    let result = pipeline.run(&options, &|step| progress.on_step(step)).await;
    progress.finish();
    let report = result?;

    info!(
        "Built {} (fingerprint {}, cache {})",
        report.package, report.fingerprint, report.cache
    );

    let cache_line = match report.cache {
        CacheOutcome::Hit => format!("Dependency cache hit ({})", report.fingerprint.short()),
        CacheOutcome::Populated => format!(
            "Dependency cache populated ({}, {} units)",
            report.fingerprint.short(),
            report.dependency_units.len()
        ),
        CacheOutcome::Reused => format!(
            "Dependency cache populated by a concurrent build ({})",
            report.fingerprint.short()
        ),
    };
    ui::step_ok(&ctx, &cache_line);
    if cache.is_ephemeral() {
        ui::step_info(&ctx, "Persistent cache disabled; dependencies were not kept");
    }
    ui::step_ok_detail(
        &ctx,
        &format!("Compiled {}", report.artifact_units.join(", ")),
        &format!("{} units", report.artifact_units.len()),
    );
    ui::step_ok_detail(
        &ctx,
        &format!("Artifact {}", report.artifact_name),
        &format_bytes(report.artifact_size),
    );

    ui::key_value("image", report.image.path.display());
    ui::key_value("entrypoint", report.image.config.entrypoint.join(" "));
    ui::key_value("base", &report.image.config.base_image);
    ui::key_value("digest", &report.image.digest);
    ui::outro_success(&ctx, &format!("Built {}", report.package));

    Ok(())
}
