//! Option resolution: user flags to an immutable option snapshot.
//!
//! Flags follow Homebrew's conventions. `--with-foo` turns on a declared
//! `with-foo` option, `--without-foo` turns it off (and vice versa for
//! `without-` options). Deprecated spellings are rewritten before matching.
//! Anything else is rejected.
//!
//! Resolution is a pure function of the formula, the platform and the flags:
//! identical input always yields an identical [`BuildOptions`].

use crate::error::{KegError, Result};
use crate::formula::Formula;
use crate::platform::Platform;
use crate::registry::suggest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Resolved option states for one formula, keyed by option name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
    values: BTreeMap<String, bool>,
}

impl BuildOptions {
    pub fn from_map(values: BTreeMap<String, bool>) -> Self {
        Self { values }
    }

    /// Rebuild from the `used_options`/`unused_options` lists of an install
    /// receipt. Off options are kept so `without-X` still answers `with("X")`.
    pub fn from_flags(used: &[String], unused: &[String]) -> Self {
        let off = unused.iter().map(|flag| (flag, false));
        let on = used.iter().map(|flag| (flag, true));
        Self {
            values: off
                .chain(on)
                .map(|(flag, state)| (flag.trim_start_matches('-').to_string(), state))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<bool> {
        self.values.get(name).copied()
    }

    pub fn is_on(&self, name: &str) -> bool {
        self.get(name).unwrap_or(false)
    }

    /// Whether the feature `name` is enabled: `with-name` is on, or
    /// `without-name` exists and is off.
    pub fn with(&self, name: &str) -> bool {
        if let Some(on) = self.get(&format!("with-{}", name)) {
            return on;
        }
        if let Some(on) = self.get(&format!("without-{}", name)) {
            return !on;
        }
        false
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Flags that are on, in `--name` form.
    pub fn used(&self) -> Vec<String> {
        self.iter()
            .filter(|(_, on)| *on)
            .map(|(name, _)| format!("--{}", name))
            .collect()
    }

    /// Flags that are off, in `--name` form.
    pub fn unused(&self) -> Vec<String> {
        self.iter()
            .filter(|(_, on)| !*on)
            .map(|(name, _)| format!("--{}", name))
            .collect()
    }
}

/// A deprecated flag that was rewritten during resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deprecation {
    pub old: String,
    pub new: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub options: BuildOptions,
    pub deprecations: Vec<Deprecation>,
}

/// Resolve user flags against the options a formula declares on `platform`.
pub fn resolve(formula: &Formula, platform: &Platform, flags: &[String]) -> Result<Resolution> {
    let declared = formula.declared_options(platform);
    let mut values: BTreeMap<String, bool> = declared
        .iter()
        .map(|o| (o.name.clone(), o.default))
        .collect();
    let mut deprecations = Vec::new();

    for flag in flags {
        let mut name = flag.trim_start_matches('-').to_string();

        if let Some(dep) = formula.deprecated_options.iter().find(|d| d.old == name) {
            deprecations.push(Deprecation {
                old: dep.old.clone(),
                new: dep.new.clone(),
            });
            name = dep.new.clone();
        }

        if values.contains_key(&name) {
            values.insert(name, true);
            continue;
        }

        // --without-X on a `with-X` option, --with-X on a `without-X` option
        let inverse = if let Some(feature) = name.strip_prefix("without-") {
            Some(format!("with-{}", feature))
        } else {
            name.strip_prefix("with-")
                .map(|feature| format!("without-{}", feature))
        };
        if let Some(inverse) = inverse
            && values.contains_key(&inverse)
        {
            values.insert(inverse, false);
            continue;
        }

        let candidates: Vec<String> = declared.iter().map(|o| format!("--{}", o.name)).collect();
        return Err(KegError::UnrecognizedOption {
            formula: formula.name.clone(),
            flag: flag.clone(),
            suggestion: suggest(&format!("--{}", name), candidates.iter().map(String::as_str)),
        });
    }

    Ok(Resolution {
        options: BuildOptions::from_map(values),
        deprecations,
    })
}

/// Defaults only, as used for formulae pulled in as dependencies.
pub fn defaults(formula: &Formula, platform: &Platform) -> BuildOptions {
    BuildOptions::from_map(
        formula
            .declared_options(platform)
            .into_iter()
            .map(|o| (o.name, o.default))
            .collect(),
    )
}
