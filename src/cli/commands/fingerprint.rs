//! Fingerprint command - show the dependency identity of a project

use super::{compile_settings, open_cache, project_dir};
use crate::cli::args::FingerprintArgs;
use crate::config::Config;
use crate::error::KilnResult;
use crate::manifest::{fingerprint, Manifest};
use crate::ui;

/// Execute the fingerprint command
pub async fn execute(args: FingerprintArgs, config: &Config) -> KilnResult<()> {
    let project_dir = project_dir(args.project)?;
    let manifest = Manifest::load(&project_dir).await?;
    let fp = fingerprint(&manifest);

    if args.quiet {
        println!("{}", fp);
        return Ok(());
    }

    let cache = open_cache(config, false)?;
    let settings = compile_settings(config, None);
    let state = cache.state(&fp, &settings).await?;

    ui::key_value("package", &manifest.package);
    ui::key_value("fingerprint", &fp);
    ui::key_value(
        "lockfile",
        if manifest.lockfile().is_some() { "present" } else { "absent" },
    );
    ui::key_value("dependencies", manifest.dependencies.len());
    ui::key_value("cache", format!("{} (profile {})", state, settings.profile));

    Ok(())
}
