//! Terminal detection

use std::io::IsTerminal;

/// Environment variables set by common CI systems
const CI_VARS: &[&str] = &[
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "CIRCLECI",
    "BUILDKITE",
    "JENKINS_URL",
    "TF_BUILD",
];

/// Decides between spinners/prompts and plain line output
#[derive(Debug, Clone)]
pub struct UiContext {
    interactive: bool,
    auto_yes: bool,
}

impl UiContext {
    /// Interactive only on a terminal outside CI
    pub fn detect() -> Self {
        let tty = std::io::stdout().is_terminal() && std::io::stderr().is_terminal();
        Self {
            interactive: tty && !in_ci(|var| std::env::var_os(var).is_some()),
            auto_yes: false,
        }
    }

    pub fn non_interactive() -> Self {
        Self {
            interactive: false,
            auto_yes: false,
        }
    }

    /// Answer every confirmation with yes
    pub fn with_auto_yes(mut self, yes: bool) -> Self {
        self.auto_yes = yes;
        self
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn auto_yes(&self) -> bool {
        self.auto_yes
    }
}

fn in_ci(is_set: impl Fn(&str) -> bool) -> bool {
    CI_VARS.iter().any(|var| is_set(var))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ci_variables_disable_interaction() {
        assert!(in_ci(|var| var == "GITHUB_ACTIONS"));
        assert!(!in_ci(|_| false));
    }

    #[test]
    fn non_interactive_defaults() {
        let ctx = UiContext::non_interactive();
        assert!(!ctx.is_interactive());
        assert!(!ctx.auto_yes());
        assert!(ctx.with_auto_yes(true).auto_yes());
    }
}
