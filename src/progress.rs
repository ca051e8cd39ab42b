//! Plan progress rendering
//!
//! [`PlanProgress`] draws one spinner per running formula and mirrors overall
//! plan completion to the terminal's native progress indicator (OSC 9;4).

use crate::engine::{Outcome, PlanObserver, PlanReport};
use crate::resolve::InstallPlan;
use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, IsTerminal, Write};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Progress state for terminal indicators
#[derive(Debug, Clone, Copy)]
pub enum ProgressState {
    Off = 0,
    Normal = 1,
    Error = 2,
    Indeterminate = 3,
}

/// Set terminal progress using OSC 9;4. Terminals without support ignore it.
pub fn set_terminal_progress(progress: u8, state: ProgressState) {
    let progress = progress.min(100);
    eprint!("\x1b]9;4;{};{}\x1b\\", state as u8, progress);
    let _ = io::stderr().flush();
}

pub fn clear_terminal_progress() {
    set_terminal_progress(0, ProgressState::Off);
}

/// Whether progress output should be drawn at all
pub fn should_show_progress() -> bool {
    io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((done as f64 / total as f64) * 100.0).min(100.0) as u8
}

fn format_elapsed(elapsed: Duration) -> String {
    let ms = elapsed.as_millis();
    if ms < 1000 {
        format!("{}ms", ms)
    } else {
        format!("{:.1}s", elapsed.as_secs_f64())
    }
}

struct State {
    bars: HashMap<String, (ProgressBar, Instant)>,
    total: usize,
    finished: usize,
    failed: bool,
}

/// Renders engine events as spinners
pub struct PlanProgress {
    multi: MultiProgress,
    native: bool,
    state: Mutex<State>,
}

impl PlanProgress {
    pub fn new() -> Self {
        let visible = should_show_progress();
        let multi = if visible {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };
        Self {
            multi,
            native: visible,
            state: Mutex::new(State {
                bars: HashMap::new(),
                total: 0,
                finished: 0,
                failed: false,
            }),
        }
    }

    /// Print a line above the spinners without tearing them.
    pub fn println(&self, line: impl AsRef<str>) {
        if self.multi.is_hidden() {
            eprintln!("{}", line.as_ref());
        } else {
            let _ = self.multi.println(line);
        }
    }

    fn finish_line(name: &str, outcome: &Outcome, elapsed: Option<Duration>) -> String {
        let took = elapsed
            .map(|e| format!(" ({})", format_elapsed(e)).dimmed().to_string())
            .unwrap_or_default();
        match outcome {
            Outcome::Installed { version, .. } => {
                format!("{} {} {}{}", "✓".green(), name.bold(), version, took)
            }
            Outcome::AlreadyInstalled { version } => {
                format!("{} {} {} already installed", "✓".green(), name.bold(), version)
            }
            Outcome::Failed(e) => format!("{} {}: {}{}", "✗".red(), name.bold(), e, took),
            Outcome::Skipped { blocked_by } => format!(
                "{} {} skipped ({} did not install)",
                "-".yellow(),
                name.bold(),
                blocked_by
            ),
            Outcome::Cancelled => format!("{} {} cancelled", "-".yellow(), name.bold()),
        }
    }
}

impl Default for PlanProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanObserver for PlanProgress {
    fn plan_started(&self, plan: &InstallPlan) {
        if let Ok(mut state) = self.state.lock() {
            state.total = plan.len();
        }
        if self.native {
            set_terminal_progress(0, ProgressState::Indeterminate);
        }
    }

    fn formula_started(&self, name: &str, version: &str) {
        let spinner = self.multi.add(ProgressBar::new_spinner());
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg} {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(format!("Building {} {}", name.bold(), version));
        spinner.enable_steady_tick(Duration::from_millis(100));
        if let Ok(mut state) = self.state.lock() {
            state
                .bars
                .insert(name.to_string(), (spinner, Instant::now()));
        }
    }

    fn formula_finished(&self, name: &str, outcome: &Outcome) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let started = state.bars.remove(name);
        let line = Self::finish_line(name, outcome, started.as_ref().map(|(_, t)| t.elapsed()));
        match started {
            Some((bar, _)) => bar.finish_with_message(line),
            None => self.println(line),
        }

        state.finished += 1;
        state.failed |= matches!(outcome, Outcome::Failed(_));
        if self.native {
            let kind = if state.failed {
                ProgressState::Error
            } else {
                ProgressState::Normal
            };
            set_terminal_progress(percent(state.finished, state.total), kind);
        }
    }

    fn plan_finished(&self, _report: &PlanReport) {
        if self.native {
            clear_terminal_progress();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(1, 4), 25);
        assert_eq!(percent(5, 4), 100);
    }

    #[test]
    fn test_elapsed_formatting() {
        assert_eq!(format_elapsed(Duration::from_millis(250)), "250ms");
        assert_eq!(format_elapsed(Duration::from_millis(2500)), "2.5s");
    }

    #[test]
    fn test_finish_line_names_blocker() {
        colored::control::set_override(false);
        let line = PlanProgress::finish_line(
            "app",
            &Outcome::Skipped {
                blocked_by: "lib".to_string(),
            },
            None,
        );
        assert_eq!(line, "- app skipped (lib did not install)");
    }
}
