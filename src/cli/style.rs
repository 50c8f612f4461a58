//! Terminal styling helpers
//!
//! Output goes through `anstream`, which strips the escape codes when
//! stdout is not a terminal.

use owo_colors::OwoColorize;
use std::fmt::Display;

/// Semantic colours for CLI output
pub trait Stylize {
    /// De-emphasised text
    fn muted(&self) -> String;
    /// Headings and names
    fn emphasis(&self) -> String;
    /// Identifiers such as MR references
    fn accent(&self) -> String;
    /// Something needs attention
    fn warn(&self) -> String;
    /// Positive outcome
    fn success(&self) -> String;
}

impl<T: Display> Stylize for T {
    fn muted(&self) -> String {
        self.dimmed().to_string()
    }

    fn emphasis(&self) -> String {
        self.bold().to_string()
    }

    fn accent(&self) -> String {
        self.cyan().to_string()
    }

    fn warn(&self) -> String {
        self.yellow().to_string()
    }

    fn success(&self) -> String {
        self.green().to_string()
    }
}

/// Green check mark
pub fn check() -> String {
    "✓".success()
}

/// Yellow cross
pub fn cross() -> String {
    "✗".warn()
}
