//! Declarative conditions attached to dependencies, options, steps, caveats and tests.
//!
//! A predicate is plain data in the formula document:
//!
//! ```json
//! { "all": [ { "os": "linux" }, { "with": "tcl-tk" } ] }
//! ```
//!
//! and is evaluated against a [`Scope`]: the run's [`Platform`] plus the
//! formula's resolved [`BuildOptions`].

use crate::options::BuildOptions;
use crate::platform::{Arch, Compiler, OsFamily, Platform};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Os(OsFamily),
    Arch(Arch),
    Compiler(Compiler),
    /// True when the named feature is enabled (`build.with?`).
    With(String),
    /// True when the named feature is disabled.
    Without(String),
    Not(Box<Predicate>),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
}

/// Everything a predicate may look at.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub platform: &'a Platform,
    pub options: &'a BuildOptions,
}

impl<'a> Scope<'a> {
    pub fn new(platform: &'a Platform, options: &'a BuildOptions) -> Self {
        Self { platform, options }
    }
}

impl Predicate {
    pub fn eval(&self, scope: &Scope<'_>) -> bool {
        match self {
            Self::Os(os) => scope.platform.os == *os,
            Self::Arch(arch) => scope.platform.arch == *arch,
            Self::Compiler(cc) => scope.platform.compiler == *cc,
            Self::With(feature) => scope.options.with(feature),
            Self::Without(feature) => !scope.options.with(feature),
            Self::Not(inner) => !inner.eval(scope),
            Self::All(preds) => preds.iter().all(|p| p.eval(scope)),
            Self::Any(preds) => preds.iter().any(|p| p.eval(scope)),
        }
    }
}

/// Evaluate an optional gate; an absent gate always holds.
pub fn holds(when: Option<&Predicate>, scope: &Scope<'_>) -> bool {
    when.is_none_or(|p| p.eval(scope))
}
