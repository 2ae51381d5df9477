//! Dockerfile command - emit the pipeline as a multi-stage Dockerfile

use super::{compile_settings, project_dir};
use crate::cli::args::DockerfileArgs;
use crate::config::Config;
use crate::error::{KilnError, KilnResult};
use crate::image::{generate_dockerfile, DockerfileOptions};
use crate::manifest::Manifest;
use crate::ui::{self, UiContext};
use tokio::fs;

/// Execute the dockerfile command
pub async fn execute(args: DockerfileArgs, config: &Config) -> KilnResult<()> {
    let project_dir = project_dir(args.project)?;
    let manifest = Manifest::load(&project_dir).await?;

    let options = DockerfileOptions {
        builder_image: config.build.builder_image.clone(),
        base_image: config.runtime.base_image.clone(),
        libraries: config.runtime.libraries.clone(),
        install_dir: config.runtime.install_dir.clone(),
        primary: args.bin.or_else(|| config.build.bin.clone()),
        settings: compile_settings(config, None),
    };
    let dockerfile = generate_dockerfile(&manifest, &options)?;

    match args.output {
        Some(path) => {
            fs::write(&path, &dockerfile)
                .await
                .map_err(|e| KilnError::io(format!("writing {}", path.display()), e))?;
            let ctx = UiContext::detect();
            ui::step_ok_detail(&ctx, "Dockerfile written", &path.display().to_string());
        }
        None => print!("{}", dockerfile),
    }

    Ok(())
}
