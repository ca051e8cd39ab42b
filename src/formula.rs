//! Formula documents.
//!
//! A formula is a JSON document describing how to obtain, build, and install
//! one piece of software. Formulae are immutable once loaded; the registry owns
//! them for the duration of a run.
//!
//! ```json
//! {
//!   "name": "hello",
//!   "version": "2.12",
//!   "source": { "url": "https://ftp.gnu.org/gnu/hello/hello-2.12.tar.gz", "sha256": "..." },
//!   "dependencies": [ { "name": "gettext", "kind": "recommended" } ],
//!   "install": [
//!     { "action": "run", "program": "./configure", "args": ["--prefix={prefix}"] },
//!     { "action": "run", "program": "make", "args": ["install"] }
//!   ],
//!   "test": [ { "program": "{bin}/hello", "expect_output": "Hello, world!" } ]
//! }
//! ```

use crate::error::{KegError, Result};
use crate::options::BuildOptions;
use crate::platform::Platform;
use crate::predicate::{Predicate, Scope, holds};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formula {
    pub name: String,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    pub version: String,
    #[serde(default)]
    pub revision: u32,
    #[serde(default)]
    pub source: Option<Source>,
    #[serde(default)]
    pub keg_only: bool,
    #[serde(default)]
    pub options: Vec<OptionDecl>,
    #[serde(default)]
    pub deprecated_options: Vec<DeprecatedOption>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    /// Environment overrides applied to every run-command step.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Variables removed from the inherited environment.
    #[serde(default)]
    pub unset_env: Vec<String>,
    /// Default timeout for run-command steps, in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub install: Vec<Step>,
    #[serde(default)]
    pub post_install: Vec<Step>,
    #[serde(default)]
    pub caveats: Vec<Caveat>,
    #[serde(default)]
    pub test: Vec<TestCommand>,
    /// Where this formula was loaded from (set by the registry).
    #[serde(skip)]
    pub path: Option<PathBuf>,
}

/// Source archive location and checksum
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    #[serde(default)]
    pub sha256: Option<String>,
}

/// A user-selectable build toggle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionDecl {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default: bool,
    /// Dependencies activated when this option is on.
    #[serde(default)]
    pub adds: Vec<String>,
    /// Dependencies deactivated when this option is on.
    #[serde(default)]
    pub removes: Vec<String>,
    /// The option only exists where this holds.
    #[serde(default)]
    pub when: Option<Predicate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeprecatedOption {
    pub old: String,
    pub new: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    #[default]
    Runtime,
    Build,
    Recommended,
    Optional,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    #[serde(default)]
    pub kind: DependencyKind,
    /// Needed only while building (combined with `recommended`/`optional`).
    #[serde(default)]
    pub build: bool,
    /// A system requirement probed on PATH instead of a formula.
    #[serde(default)]
    pub system: bool,
    /// Informational version constraint, e.g. `1.8+`.
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub when: Option<Predicate>,
}

impl Dependency {
    pub fn is_build_only(&self) -> bool {
        self.kind == DependencyKind::Build || self.build
    }
}

/// Which step list of a formula a step belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Install,
    PostInstall,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Install => write!(f, "install"),
            Self::PostInstall => write!(f, "post-install"),
        }
    }
}

/// One install or post-install step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Predicate>,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Exact find/replace in a file; every `before` must be present.
    Inreplace {
        file: String,
        replacements: Vec<Replacement>,
    },
    /// Unified diff, inline or from a file next to the formula.
    Patch {
        #[serde(default)]
        diff: Option<String>,
        #[serde(default)]
        file: Option<String>,
        #[serde(default = "default_strip")]
        strip: usize,
    },
    Run {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default)]
        cwd: Option<String>,
        #[serde(default)]
        timeout_secs: Option<u64>,
        /// Skip the command when this path already exists.
        #[serde(default)]
        creates: Option<String>,
    },
    /// Copy (or symlink) files matching a glob into the keg.
    Install {
        from: String,
        to: String,
        #[serde(default)]
        rename: Option<String>,
        #[serde(default)]
        link: bool,
    },
    Remove {
        paths: Vec<String>,
    },
    Move {
        from: String,
        to: String,
    },
    Mkdir {
        path: String,
    },
    Write {
        path: String,
        content: String,
    },
    Symlink {
        target: String,
        link: String,
    },
}

fn default_strip() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replacement {
    pub before: String,
    pub after: String,
}

impl Action {
    /// Short human label used in logs and progress output.
    pub fn describe(&self) -> String {
        match self {
            Self::Inreplace { file, .. } => format!("inreplace {}", file),
            Self::Patch { file, .. } => match file {
                Some(f) => format!("patch {}", f),
                None => "patch (inline)".to_string(),
            },
            Self::Run { program, args, .. } => {
                if args.is_empty() {
                    program.clone()
                } else {
                    format!("{} {}", program, args.join(" "))
                }
            }
            Self::Install { from, to, .. } => format!("install {} -> {}", from, to),
            Self::Remove { paths } => format!("remove {}", paths.join(" ")),
            Self::Move { from, to } => format!("move {} -> {}", from, to),
            Self::Mkdir { path } => format!("mkdir {}", path),
            Self::Write { path, .. } => format!("write {}", path),
            Self::Symlink { target, link } => format!("symlink {} -> {}", link, target),
        }
    }

    /// Whether re-applying this action to an already-correct tree is a no-op.
    fn is_idempotent(&self) -> bool {
        match self {
            Self::Inreplace { .. } | Self::Patch { .. } => false,
            Self::Run { creates, .. } => creates.is_some(),
            _ => true,
        }
    }
}

/// Informational text shown after install
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Caveat {
    pub text: String,
    #[serde(default)]
    pub when: Option<Predicate>,
}

/// A smoke test run against the installed keg
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub expect_output: Option<String>,
    #[serde(default)]
    pub when: Option<Predicate>,
}

impl Formula {
    /// Parse and validate a formula document.
    pub fn from_json(content: &str) -> Result<Self> {
        let formula: Formula = serde_json::from_str(content)?;
        formula.validate()?;
        Ok(formula)
    }

    /// Version including the revision suffix, e.g. `3.6.4_1`.
    pub fn pkg_version(&self) -> String {
        if self.revision == 0 {
            self.version.clone()
        } else {
            format!("{}_{}", self.version, self.revision)
        }
    }

    /// Options that exist on this platform: explicit declarations plus the
    /// implicit `with-X`/`without-X` toggles of optional/recommended dependencies.
    pub fn declared_options(&self, platform: &Platform) -> Vec<OptionDecl> {
        let defaults = BuildOptions::default();
        let scope = Scope::new(platform, &defaults);

        let mut declared: Vec<OptionDecl> = self
            .options
            .iter()
            .filter(|o| holds(o.when.as_ref(), &scope))
            .cloned()
            .collect();
        let mut seen: HashSet<String> = declared.iter().map(|o| o.name.clone()).collect();

        for dep in &self.dependencies {
            if !holds(dep.when.as_ref(), &scope) {
                continue;
            }
            let (name, description) = match dep.kind {
                DependencyKind::Optional => (
                    format!("with-{}", dep.name),
                    format!("Build with {} support", dep.name),
                ),
                DependencyKind::Recommended => (
                    format!("without-{}", dep.name),
                    format!("Build without {} support", dep.name),
                ),
                _ => continue,
            };
            if seen.insert(name.clone()) {
                declared.push(OptionDecl {
                    name,
                    description,
                    default: false,
                    adds: vec![],
                    removes: vec![],
                    when: None,
                });
            }
        }

        declared
    }

    /// Install steps that apply in this scope, with their declared indices.
    pub fn active_install_steps<'a>(&'a self, scope: &Scope<'_>) -> Vec<(usize, &'a Step)> {
        active_steps(&self.install, scope)
    }

    pub fn active_post_install_steps<'a>(&'a self, scope: &Scope<'_>) -> Vec<(usize, &'a Step)> {
        active_steps(&self.post_install, scope)
    }

    fn invalid(&self, reason: impl Into<String>) -> KegError {
        KegError::InvalidFormula {
            name: self.name.clone(),
            reason: reason.into(),
        }
    }

    /// Structural checks performed at load time.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(self.invalid("name is empty"));
        }
        if self.version.trim().is_empty() {
            return Err(self.invalid("version is empty"));
        }

        let mut names = HashSet::new();
        for option in &self.options {
            if option.name.starts_with('-') || option.name.is_empty() {
                return Err(self.invalid(format!(
                    "option `{}` must be a bare name without leading dashes",
                    option.name
                )));
            }
            if !names.insert(option.name.as_str()) {
                return Err(self.invalid(format!("option `{}` declared twice", option.name)));
            }
        }

        let dep_names: HashSet<&str> = self.dependencies.iter().map(|d| d.name.as_str()).collect();
        for dep in &self.dependencies {
            if dep.name == self.name {
                return Err(self.invalid("formula depends on itself"));
            }
        }
        for option in &self.options {
            for target in option.adds.iter().chain(&option.removes) {
                if !dep_names.contains(target.as_str()) {
                    return Err(self.invalid(format!(
                        "option `{}` refers to undeclared dependency `{}`",
                        option.name, target
                    )));
                }
            }
        }

        for deprecated in &self.deprecated_options {
            let known = names.contains(deprecated.new.as_str())
                || self.dependencies.iter().any(|d| {
                    (d.kind == DependencyKind::Optional && deprecated.new == format!("with-{}", d.name))
                        || (d.kind == DependencyKind::Recommended
                            && deprecated.new == format!("without-{}", d.name))
                });
            if !known {
                return Err(self.invalid(format!(
                    "deprecated option `{}` points at unknown option `{}`",
                    deprecated.old, deprecated.new
                )));
            }
        }

        for (index, step) in self.install.iter().enumerate() {
            if let Action::Patch { diff, file, .. } = &step.action
                && diff.is_some() == file.is_some()
            {
                return Err(self.invalid(format!(
                    "install step {} must set exactly one of `diff` or `file`",
                    index + 1
                )));
            }
        }

        for (index, step) in self.post_install.iter().enumerate() {
            if !step.action.is_idempotent() {
                return Err(self.invalid(format!(
                    "post-install step {} ({}) is not idempotent",
                    index + 1,
                    step.action.describe()
                )));
            }
        }

        Ok(())
    }
}

fn active_steps<'a>(steps: &'a [Step], scope: &Scope<'_>) -> Vec<(usize, &'a Step)> {
    steps
        .iter()
        .enumerate()
        .filter(|(_, step)| holds(step.when.as_ref(), scope))
        .collect()
}
