//! Terminal capability detection and report styling

use std::{fmt::Display, sync::OnceLock};

use owo_colors::{OwoColorize, colors::css};
use retrace::Coverage;

/// Below this many columns, tables are printed stacked.
const NARROW_COLUMNS: u16 = 60;

/// Whether stdout accepts ANSI colours, detected once per process.
fn color_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| supports_color::on(supports_color::Stream::Stdout).is_some())
}

/// Check if the terminal is too narrow for side-by-side columns
pub fn is_narrow() -> bool {
    terminal_size::terminal_size().is_some_and(|(width, _)| width.0 < NARROW_COLUMNS)
}

/// How a piece of report text should read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Good,
    Warn,
    Bad,
    Muted,
}

impl Tone {
    /// The tone of a coverage figure: full, partial, none, or undefined.
    pub fn of_coverage(coverage: Coverage) -> Self {
        match coverage.ratio() {
            None => Self::Muted,
            Some(ratio) if ratio >= 1.0 => Self::Good,
            Some(ratio) if ratio > 0.0 => Self::Warn,
            Some(_) => Self::Bad,
        }
    }

    /// Render `text` in this tone, or plainly if colours are unsupported.
    pub fn paint(self, text: impl Display) -> String {
        if !color_enabled() {
            return text.to_string();
        }
        match self {
            Self::Good => text.fg::<css::Green>().to_string(),
            Self::Warn => text.fg::<css::Orange>().to_string(),
            Self::Bad => text.fg::<css::Red>().to_string(),
            Self::Muted => text.dimmed().to_string(),
        }
    }
}

/// Shorthand for painting report text
pub trait Colorize: Display {
    fn success(&self) -> String {
        Tone::Good.paint(self)
    }

    fn warning(&self) -> String {
        Tone::Warn.paint(self)
    }

    fn error(&self) -> String {
        Tone::Bad.paint(self)
    }

    fn dim(&self) -> String {
        Tone::Muted.paint(self)
    }
}

impl<T: Display + ?Sized> Colorize for T {}
