//! Line output with the same shape in interactive and plain modes

use super::context::UiContext;
use console::style;
use std::fmt::Display;

#[derive(Debug, Clone, Copy)]
enum Level {
    Ok,
    Info,
    Warn,
    Fail,
}

fn emit(ctx: &UiContext, level: Level, message: impl Display) {
    let message = message.to_string();
    if ctx.is_interactive() {
        let _ = match level {
            Level::Ok => cliclack::log::success(&message),
            Level::Info => cliclack::log::info(&message),
            Level::Warn => cliclack::log::warning(&message),
            Level::Fail => cliclack::log::error(&message),
        };
        return;
    }
    let tag = match level {
        Level::Ok => style("[OK]").green(),
        Level::Info => style("[INFO]").cyan(),
        Level::Warn => style("[WARN]").yellow(),
        Level::Fail => style("[FAIL]").red(),
    };
    println!("  {} {}", tag, message);
}

pub fn intro(ctx: &UiContext, title: &str) {
    if ctx.is_interactive() {
        let _ = cliclack::intro(style(title).yellow().bold());
    } else {
        println!("{}", style(title).bold());
    }
}

pub fn outro_success(ctx: &UiContext, message: &str) {
    if ctx.is_interactive() {
        let _ = cliclack::outro(style(message).green().bold());
    } else {
        println!("{} {}", style("[OK]").green(), message);
    }
}

pub fn step_ok(ctx: &UiContext, message: &str) {
    emit(ctx, Level::Ok, message);
}

/// Success line with a dimmed detail, e.g. a digest or size
pub fn step_ok_detail(ctx: &UiContext, message: &str, detail: &str) {
    emit(ctx, Level::Ok, format!("{} ({})", message, style(detail).dim()));
}

pub fn step_info(ctx: &UiContext, message: &str) {
    emit(ctx, Level::Info, message);
}

pub fn step_warn(ctx: &UiContext, message: &str) {
    emit(ctx, Level::Warn, message);
}

pub fn step_error(ctx: &UiContext, message: &str) {
    emit(ctx, Level::Fail, message);
}

pub fn key_value(key: &str, value: impl Display) {
    println!("  {:<14} {}", style(format!("{}:", key)).dim(), value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_output_does_not_panic() {
        let ctx = UiContext::non_interactive();
        intro(&ctx, "kiln build");
        step_ok(&ctx, "done");
        step_ok_detail(&ctx, "artifact", "1.2 MB");
        step_info(&ctx, "cache hit");
        step_warn(&ctx, "profile changed");
        step_error(&ctx, "failed");
        key_value("fingerprint", "abc");
        outro_success(&ctx, "built");
    }
}
