//! Terminal presentation
//!
//! Uses `cliclack` and `indicatif` on a terminal, with plain line output
//! in CI and when output is piped.

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{
    intro, key_value, outro_success, step_error, step_info, step_ok, step_ok_detail, step_warn,
};
pub use progress::{BuildProgress, TaskSpinner};

/// Ask for confirmation. Auto-yes answers yes; non-interactive answers `default`.
pub async fn confirm(
    ctx: &UiContext,
    message: &str,
    default: bool,
) -> crate::error::KilnResult<bool> {
    if ctx.auto_yes() {
        return Ok(true);
    }
    if !ctx.is_interactive() {
        return Ok(default);
    }

    let message = message.to_string();
    tokio::task::spawn_blocking(move || {
        cliclack::confirm(&message)
            .initial_value(default)
            .interact()
    })
    .await
    .map_err(|e| crate::error::KilnError::Internal(format!("prompt task failed: {}", e)))?
    .map_err(|e| crate::error::KilnError::User(format!("prompt failed: {}", e)))
}
