//! Cache command - manage the dependency cache

use super::{compile_settings, open_cache, project_dir};
use crate::cache::{CacheEntry, CacheState, DependencyCache};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::Config;
use crate::error::KilnResult;
use crate::fsutil::format_bytes;
use crate::manifest::{fingerprint, Manifest};
use crate::ui::{self, TaskSpinner, UiContext};
use chrono::Utc;
use console::style;
use std::path::PathBuf;
use tracing::debug;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> KilnResult<()> {
    let cache = open_cache(config, false)?;
    debug!("Cache root: {}", cache.root().display());

    match args.action {
        CacheAction::List { format } => list_entries(&cache, format).await,
        CacheAction::Info { project } => show_project_info(&cache, config, project).await,
        CacheAction::Gc { days, dry_run } => gc_entries(&cache, config, days, dry_run).await,
        CacheAction::Clear { yes } => clear_entries(&cache, yes).await,
    }
}

/// List all cache entries
async fn list_entries(cache: &DependencyCache, format: OutputFormat) -> KilnResult<()> {
    let entries = cache.list().await?;

    match format {
        OutputFormat::Table => print_entry_table(&entries),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Plain => {
            for entry in &entries {
                println!("{}", entry.fingerprint);
            }
        }
    }

    Ok(())
}

fn print_entry_table(entries: &[CacheEntry]) {
    if entries.is_empty() {
        println!("No cache entries found.");
        return;
    }

    println!(
        "{:<14} {:<24} {:<10} {:<8} {:>10} {:<17}",
        "FINGERPRINT", "PACKAGE", "STATE", "PROFILE", "SIZE", "CREATED"
    );
    println!("{}", "-".repeat(88));

    for entry in entries {
        // Pad before styling so ANSI codes don't break alignment
        let state = format!("{:<10}", entry.state);
        let state = match entry.state {
            CacheState::Complete => style(state).green().to_string(),
            CacheState::Building => style(state).yellow().to_string(),
            CacheState::Miss => style(state).dim().to_string(),
        };

        println!(
            "{:<14} {:<24} {} {:<8} {:>10} {:<17}",
            entry.fingerprint.short(),
            entry.package,
            state,
            entry.profile,
            format_bytes(entry.size_bytes),
            entry.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    let total: u64 = entries.iter().map(|e| e.size_bytes).sum();
    println!();
    println!("Total: {} {} ({})", entries.len(), entries_word(entries.len()), format_bytes(total));
}

fn entries_word(n: usize) -> &'static str {
    if n == 1 {
        "entry"
    } else {
        "entries"
    }
}

/// Show the cache state for a project's current manifest
async fn show_project_info(
    cache: &DependencyCache,
    config: &Config,
    project: Option<PathBuf>,
) -> KilnResult<()> {
    let project_dir = project_dir(project)?;
    let manifest = Manifest::load(&project_dir).await?;
    let fp = fingerprint(&manifest);
    let settings = compile_settings(config, None);

    println!("Project: {}", project_dir.display());
    println!();

    ui::key_value("package", &manifest.package);
    ui::key_value("fingerprint", &fp);
    ui::key_value("cache root", cache.root().display());
    ui::key_value("cache size", format_bytes(cache.total_size().await?));

    ui::key_value("settings key", settings.cache_key());

    match cache.lookup(&fp, &settings).await {
        Some(entry) => {
            ui::key_value("state", style("complete").green());
            ui::key_value("profile", &entry.profile);
            ui::key_value("size", format_bytes(entry.size_bytes));
            ui::key_value("created", entry.created_at.format("%Y-%m-%d %H:%M"));
            ui::key_value("units", entry.compiled.len());
        }
        None => {
            let state = cache.state(&fp, &settings).await?;
            let label = match state {
                CacheState::Building => style("building (populate in progress)").yellow(),
                _ => style("miss (next build compiles dependencies)").dim(),
            };
            ui::key_value("state", label);
        }
    }

    if !manifest.dependencies.is_empty() {
        println!();
        println!("Dependencies:");
        for dep in &manifest.dependencies {
            println!("  {} {}", style("•").cyan(), dep);
        }
    }

    Ok(())
}

/// Remove old entries and abandoned staging directories
async fn gc_entries(
    cache: &DependencyCache,
    config: &Config,
    days_override: Option<u32>,
    dry_run: bool,
) -> KilnResult<()> {
    let gc_days = days_override.unwrap_or(config.cache.gc_days);

    if gc_days == 0 {
        println!("Cache GC is disabled (gc_days = 0)");
        return Ok(());
    }

    if dry_run {
        let stale: Vec<CacheEntry> = cache
            .list()
            .await?
            .into_iter()
            .filter(|e| e.is_older_than_days(gc_days))
            .collect();

        if stale.is_empty() {
            println!("No cache entries older than {} days.", gc_days);
        } else {
            println!(
                "Would remove {} {} older than {} days:",
                stale.len(),
                entries_word(stale.len()),
                gc_days
            );
            for entry in &stale {
                let age_days = (Utc::now() - entry.created_at).num_days();
                println!(
                    "  {} {} {} ({} days old, {})",
                    style("•").red(),
                    entry.fingerprint.short(),
                    entry.package,
                    age_days,
                    format_bytes(entry.size_bytes)
                );
            }
        }
        println!();
        println!("Dry run - nothing removed.");
        return Ok(());
    }

    let ctx = UiContext::detect();
    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start("Collecting cache garbage...");
    match cache.gc(gc_days).await {
        Ok(report) => {
            spinner.stop(&format!(
                "Removed {} {} and {} staging dir(s), freed {}",
                report.entries,
                entries_word(report.entries),
                report.staging,
                format_bytes(report.bytes)
            ));
            Ok(())
        }
        Err(e) => {
            spinner.stop_error("Cache GC failed");
            Err(e)
        }
    }
}

/// Remove every entry
async fn clear_entries(cache: &DependencyCache, yes: bool) -> KilnResult<()> {
    let entries = cache.list().await?;

    if entries.is_empty() {
        println!("No cache entries to clear.");
        return Ok(());
    }

    let total: u64 = entries.iter().map(|e| e.size_bytes).sum();
    println!(
        "This will remove {} cache {} ({}):",
        entries.len(),
        entries_word(entries.len()),
        format_bytes(total)
    );
    for entry in &entries {
        println!("  {} {} {}", style("•").red(), entry.fingerprint.short(), entry.package);
    }
    println!();

    let ctx = UiContext::detect().with_auto_yes(yes);
    if !ui::confirm(&ctx, "Remove these entries?", false).await? {
        println!("Aborted.");
        return Ok(());
    }

    let removed = cache.clear().await?;
    ui::step_ok(&ctx, &format!("Cleared {} cache {}", removed, entries_word(removed)));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn commands_handle_empty_cache() {
        let dir = TempDir::new().unwrap();
        let cache = DependencyCache::new(dir.path());

        list_entries(&cache, OutputFormat::Table).await.unwrap();
        list_entries(&cache, OutputFormat::Json).await.unwrap();
        clear_entries(&cache, true).await.unwrap();
    }

    #[tokio::test]
    async fn gc_disabled_with_zero_days() {
        let dir = TempDir::new().unwrap();
        let cache = DependencyCache::new(dir.path());
        gc_entries(&cache, &Config::default(), Some(0), false).await.unwrap();
        gc_entries(&cache, &Config::default(), Some(7), true).await.unwrap();
    }
}
