//! Terminal color selection
//!
//! `--color` wins when given explicitly. Under `auto`, the NO_COLOR standard
//! (https://no-color.org/) and the CLICOLOR conventions apply, and colors are
//! only used when stderr is a terminal.
use clap::ValueEnum;
use colored::control;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ColorChoice {
    #[default]
    Auto,
    Always,
    Never,
}

/// Decide whether to color output; call once, early in main.
pub fn init_colors(choice: ColorChoice) {
    control::set_override(colors_enabled(choice, |key| std::env::var(key).ok(), || {
        std::io::IsTerminal::is_terminal(&std::io::stderr())
    }));
}

fn colors_enabled(
    choice: ColorChoice,
    var: impl Fn(&str) -> Option<String>,
    is_tty: impl Fn() -> bool,
) -> bool {
    match choice {
        ColorChoice::Always => return true,
        ColorChoice::Never => return false,
        ColorChoice::Auto => {}
    }

    if var("NO_COLOR").is_some() {
        return false;
    }
    if var("CLICOLOR_FORCE").is_some_and(|v| v != "0") {
        return true;
    }
    if var("CLICOLOR").is_some_and(|v| v == "0") {
        return false;
    }
    is_tty()
}
