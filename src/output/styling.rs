use std::fmt::Display;

use console::{Style, StyledObject};

fn paint(text: impl Display, with: Style) -> StyledObject<String> {
    with.apply_to(text.to_string())
}

/// Warnings and in-progress phases.
pub fn bright_yellow(text: impl Display) -> StyledObject<String> {
    paint(text, Style::new().bright().yellow())
}

pub fn bright_green(text: impl Display) -> StyledObject<String> {
    paint(text, Style::new().bright().green())
}

pub fn bright_red(text: impl Display) -> StyledObject<String> {
    paint(text, Style::new().bright().red())
}

/// Pull requests, commits and revisions.
pub fn cyan(text: impl Display) -> StyledObject<String> {
    paint(text, Style::new().cyan())
}

/// Labels and secondary counts.
pub fn dim(text: impl Display) -> StyledObject<String> {
    paint(text, Style::new().dim())
}

pub fn bright(text: impl Display) -> StyledObject<String> {
    paint(text, Style::new().bright())
}

pub fn magenta_bold(text: impl Display) -> StyledObject<String> {
    paint(text, Style::new().magenta().bold())
}
