mod ambiguous_tie_break;
mod inactive_with_rules;
mod shadowed_rules;
mod single_version_range;
mod zero_rollout;

use std::io::{self, IsTerminal};
use std::process;

use flagsnap_lib::{FlagDefinition, Snapshot};

use crate::Settings;

#[derive(Debug, PartialEq)]
pub enum LintLevel {
    Warning,
    Error,
}

#[derive(Debug)]
pub struct LintWarning {
    pub level: LintLevel,
    pub message: String,
}

impl LintWarning {
    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            level: LintLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: LintLevel::Error,
            message: message.into(),
        }
    }
}

/// Every lint for one flag, in a stable order.
pub fn check_flag(def: &FlagDefinition) -> Vec<LintWarning> {
    let mut warnings = Vec::new();
    warnings.extend(inactive_with_rules::check(def));
    warnings.extend(zero_rollout::check(def));
    warnings.extend(shadowed_rules::check(def));
    warnings.extend(ambiguous_tie_break::check(def));
    warnings.extend(single_version_range::check(def));
    warnings
}

pub fn check_snapshot(snapshot: &Snapshot) -> Vec<LintWarning> {
    snapshot
        .flags()
        .flat_map(|def| check_flag(def))
        .collect()
}

/// Inner lint logic that returns Ok(()) on success or Err(()) on failure.
/// Used by both the standalone `lint` command and the combined `check` command.
pub fn run_lint_inner(settings: &Settings) -> Result<(), ()> {
    let snapshot = settings.load_snapshot()?;

    let use_color = io::stderr().is_terminal();
    let warn_icon = if use_color {
        "\x1b[33m\u{26a0}\x1b[0m"
    } else {
        "\u{26a0}"
    };
    let error_icon = if use_color {
        "\x1b[31m\u{26a0}\x1b[0m"
    } else {
        "\u{26a0}"
    };

    let warnings = check_snapshot(&snapshot);

    if warnings.is_empty() {
        println!("{} ok, no warnings", settings.snapshot);
        Ok(())
    } else {
        for w in &warnings {
            let icon = match w.level {
                LintLevel::Warning => warn_icon,
                LintLevel::Error => error_icon,
            };
            eprintln!("{} {}", icon, w.message);
        }
        eprintln!();
        eprintln!("{} warnings found", warnings.len());
        Err(())
    }
}

/// Standalone lint command entry point. Calls `run_lint_inner` and exits on failure.
pub fn run_lint(settings: &Settings) {
    if run_lint_inner(settings).is_err() {
        process::exit(1);
    }
}
