use crate::formula::Phase;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KegError {
    #[error("Formula not found: {name}{}", did_you_mean(.suggestion))]
    FormulaNotFound {
        name: String,
        suggestion: Option<String>,
    },

    #[error("Invalid formula {name}: {reason}")]
    InvalidFormula { name: String, reason: String },

    #[error("Unrecognized option `{flag}` for {formula}{}", did_you_mean(.suggestion))]
    UnrecognizedOption {
        formula: String,
        flag: String,
        suggestion: Option<String>,
    },

    #[error("Cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("{formula} requires {dependency}, which is not available")]
    UnsatisfiedDependency { formula: String, dependency: String },

    #[error("{formula}: source not available at {}", .path.display())]
    SourceUnavailable { formula: String, path: PathBuf },

    #[error("{formula}: checksum mismatch (expected {expected}, got {actual})")]
    ChecksumMismatch {
        formula: String,
        expected: String,
        actual: String,
    },

    #[error("{formula}: {phase} step {}: patch does not apply to {}: {reason}", .step + 1, .file.display())]
    PatchApplication {
        formula: String,
        phase: Phase,
        step: usize,
        file: PathBuf,
        reason: String,
    },

    #[error("{formula}: {phase} step {}: `{command}` failed with {}", .step + 1, exit_status(.exit_code))]
    BuildCommand {
        formula: String,
        phase: Phase,
        step: usize,
        command: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("{formula}: {phase} step {}: `{command}` timed out after {}s", .step + 1, .limit.as_secs())]
    Timeout {
        formula: String,
        phase: Phase,
        step: usize,
        command: String,
        limit: Duration,
        output: String,
    },

    #[error("{formula}: {} is already owned by {owner}", .path.display())]
    FilesystemConflict {
        formula: String,
        path: PathBuf,
        owner: String,
    },

    #[error("{formula}: {phase} step {}: {message}", .step + 1)]
    StepFailed {
        formula: String,
        phase: Phase,
        step: usize,
        message: String,
    },

    #[error("{0} is not installed")]
    NotInstalled(String),

    #[error("{formula}: test `{command}` failed: {reason}")]
    TestFailed {
        formula: String,
        command: String,
        reason: String,
        output: String,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, KegError>;

fn did_you_mean(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(" (did you mean `{}`?)", s),
        None => String::new(),
    }
}

fn exit_status(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {}", c),
        None => "no exit code".to_string(),
    }
}

impl KegError {
    /// Name of the formula the error originated from, if any.
    pub fn formula(&self) -> Option<&str> {
        match self {
            Self::UnrecognizedOption { formula, .. }
            | Self::UnsatisfiedDependency { formula, .. }
            | Self::SourceUnavailable { formula, .. }
            | Self::ChecksumMismatch { formula, .. }
            | Self::PatchApplication { formula, .. }
            | Self::BuildCommand { formula, .. }
            | Self::Timeout { formula, .. }
            | Self::FilesystemConflict { formula, .. }
            | Self::StepFailed { formula, .. }
            | Self::TestFailed { formula, .. } => Some(formula),
            Self::InvalidFormula { name, .. } | Self::NotInstalled(name) => Some(name),
            _ => None,
        }
    }

    /// Zero-based index of the failing step within its phase.
    pub fn step(&self) -> Option<usize> {
        match self {
            Self::PatchApplication { step, .. }
            | Self::BuildCommand { step, .. }
            | Self::Timeout { step, .. }
            | Self::StepFailed { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Step list the failing step belongs to.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::PatchApplication { phase, .. }
            | Self::BuildCommand { phase, .. }
            | Self::Timeout { phase, .. }
            | Self::StepFailed { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Captured tool output, when the failure came from an external command.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::BuildCommand { output, .. }
            | Self::Timeout { output, .. }
            | Self::TestFailed { output, .. } => Some(output),
            _ => None,
        }
    }

    /// Structural errors abort a whole plan before anything touches the filesystem.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::FormulaNotFound { .. }
                | Self::InvalidFormula { .. }
                | Self::UnrecognizedOption { .. }
                | Self::CyclicDependency { .. }
                | Self::UnsatisfiedDependency { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_index_is_displayed_one_based() {
        let err = KegError::BuildCommand {
            formula: "python".into(),
            phase: Phase::Install,
            step: 2,
            command: "make install".into(),
            exit_code: Some(2),
            output: "boom".into(),
        };
        assert_eq!(
            err.to_string(),
            "python: install step 3: `make install` failed with exit code 2"
        );
        assert_eq!(err.step(), Some(2));
        assert_eq!(err.phase(), Some(Phase::Install));
        assert_eq!(err.output(), Some("boom"));
        assert!(!err.is_structural());
    }

    #[test]
    fn test_cycle_message() {
        let err = KegError::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Cyclic dependency: a -> b -> a");
        assert!(err.is_structural());
    }

    #[test]
    fn test_suggestion_in_message() {
        let err = KegError::UnrecognizedOption {
            formula: "python".into(),
            flag: "--with-sqlit".into(),
            suggestion: Some("--with-sqlite".into()),
        };
        assert!(err.to_string().contains("did you mean `--with-sqlite`?"));
        assert_eq!(err.formula(), Some("python"));
    }
}
