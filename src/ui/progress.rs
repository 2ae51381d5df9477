//! Progress indicators with CI fallback

use super::context::UiContext;
use crate::pipeline::Step;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Number of stages a build reports
const BUILD_STEPS: u64 = 5;

/// A single-task spinner
pub struct TaskSpinner {
    spinner: Option<cliclack::ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.is_interactive(),
        }
    }

    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let spinner = cliclack::spinner();
            spinner.start(message);
            self.spinner = Some(spinner);
        } else {
            println!("{} {}", style("...").dim(), message);
        }
    }

    pub fn stop(&mut self, message: &str) {
        match self.spinner.take() {
            Some(spinner) => spinner.stop(message),
            None => println!("{} {}", style("[OK]").green(), message),
        }
    }

    pub fn stop_error(&mut self, message: &str) {
        match self.spinner.take() {
            Some(spinner) => spinner.error(message),
            None => println!("{} {}", style("[FAIL]").red(), message),
        }
    }
}

/// Stage-by-stage bar for `kiln build`.
///
/// Interactive mode shows one indicatif bar advanced per [`Step`]; plain
/// mode prints a numbered line per step.
pub struct BuildProgress {
    bar: Option<ProgressBar>,
}

impl BuildProgress {
    pub fn new(ctx: &UiContext, package: &str) -> Self {
        let bar = ctx.is_interactive().then(|| {
            let bar = ProgressBar::new(BUILD_STEPS);
            let template = concat!(
                "  {spinner:.yellow} {prefix:.bold}  {bar:20.yellow/dim}",
                " {pos}/{len} {msg}  {elapsed:.dim}"
            );
            if let Ok(progress_style) = ProgressStyle::default_bar().template(template) {
                bar.set_style(
                    progress_style
                        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                        .progress_chars("━╸─"),
                );
            }
            bar.set_prefix(package.to_string());
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        });
        Self { bar }
    }

    pub fn on_step(&self, step: Step) {
        let position = step_position(step);
        match &self.bar {
            Some(bar) => {
                bar.set_position(position - 1);
                bar.set_message(step.to_string());
            }
            None => println!("  [{}/{}] {}", position, BUILD_STEPS, step),
        }
    }

    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}

/// 1-based position of a build step
fn step_position(step: Step) -> u64 {
    match step {
        Step::Fingerprint => 1,
        Step::DependencyPass => 2,
        Step::ArtifactPass => 3,
        Step::Extract => 4,
        Step::Assemble => 5,
    }
}
