//! Shared rendering helpers for command implementations

use crate::error::KegError;
use colored::Colorize;

/// Lines of captured output shown under a failure
const OUTPUT_TAIL_LINES: usize = 20;

/// Print a `==> title` header
pub fn header(title: &str) {
    println!("{}", format!("==> {}", title).bold().green());
}

/// Last `max` lines of `output`
pub fn tail(output: &str, max: usize) -> Vec<&str> {
    let lines: Vec<&str> = output.trim_end().lines().collect();
    let start = lines.len().saturating_sub(max);
    lines[start..].to_vec()
}

/// Print an error with its captured output, if any.
pub fn print_failure(err: &KegError) {
    eprintln!("{} {}", "Error:".red().bold(), err);
    if let Some(output) = err.output().filter(|o| !o.trim().is_empty()) {
        let lines = tail(output, OUTPUT_TAIL_LINES);
        eprintln!("{}", format!("Last {} lines of output:", lines.len()).dimmed());
        for line in lines {
            eprintln!("  {}", line);
        }
    }
}

/// Print caveats under a formula heading
pub fn print_caveats(name: &str, caveats: &str) {
    header("Caveats");
    println!("{}", name.bold());
    println!("{}", caveats);
}
