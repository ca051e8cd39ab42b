//! Formula registry - loading formula documents from formula directories and taps

use crate::cellar::Layout;
use crate::error::{KegError, Result};
use crate::formula::Formula;
use anyhow::Context;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// All formulae known to a run, keyed by name.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    formulae: BTreeMap<String, Formula>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from already-parsed formulae.
    pub fn from_formulae(formulae: impl IntoIterator<Item = Formula>) -> Result<Self> {
        let mut registry = Self::new();
        for formula in formulae {
            registry.insert(formula)?;
        }
        Ok(registry)
    }

    /// Load every `*.json` formula from `dirs`, in order.
    ///
    /// A name seen in an earlier directory shadows later definitions, so local
    /// formula paths take precedence over taps.
    pub fn load(dirs: &[PathBuf]) -> Result<Self> {
        let mut registry = Self::new();

        for dir in dirs {
            if !dir.is_dir() {
                debug!("Skipping missing formula directory {}", dir.display());
                continue;
            }

            let mut paths: Vec<PathBuf> = fs::read_dir(dir)
                .with_context(|| format!("Failed to read formula directory: {}", dir.display()))?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
                .collect();
            paths.sort();

            for path in paths {
                let formula = load_formula(&path)?;
                if registry.formulae.contains_key(&formula.name) {
                    warn!(
                        "{} shadowed by an earlier definition, ignoring {}",
                        formula.name,
                        path.display()
                    );
                    continue;
                }
                registry.formulae.insert(formula.name.clone(), formula);
            }
        }

        debug!("Loaded {} formulae", registry.len());
        Ok(registry)
    }

    pub fn insert(&mut self, formula: Formula) -> Result<()> {
        formula.validate()?;
        if self.formulae.contains_key(&formula.name) {
            return Err(KegError::InvalidFormula {
                name: formula.name.clone(),
                reason: "defined twice".to_string(),
            });
        }
        self.formulae.insert(formula.name.clone(), formula);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Formula> {
        self.formulae.get(name)
    }

    /// Look up a formula, failing with a suggestion for near misses.
    pub fn require(&self, name: &str) -> Result<&Formula> {
        self.get(name).ok_or_else(|| KegError::FormulaNotFound {
            name: name.to_string(),
            suggestion: suggest(name, self.names()),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.formulae.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.formulae.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formulae.is_empty()
    }
}

/// Read and validate one formula file.
pub fn load_formula(path: &Path) -> Result<Formula> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read formula: {}", path.display()))?;
    let mut formula: Formula = serde_json::from_str(&content).map_err(|e| {
        KegError::InvalidFormula {
            name: path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default(),
            reason: e.to_string(),
        }
    })?;
    formula.validate()?;
    formula.path = Some(path.to_path_buf());
    Ok(formula)
}

/// The Taps directory under the shared prefix
pub fn taps_path(layout: &Layout) -> PathBuf {
    layout.root().join("Library/Taps")
}

/// `Formula/` directories of every installed tap (`<user>/<repo>/Formula`)
pub fn tap_formula_dirs(layout: &Layout) -> Result<Vec<PathBuf>> {
    let taps_dir = taps_path(layout);

    if !taps_dir.exists() {
        return Ok(vec![]);
    }

    let mut dirs = Vec::new();

    for user_entry in fs::read_dir(&taps_dir)? {
        let user_entry = user_entry?;
        if user_entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        let user_path = user_entry.path();
        if !user_path.is_dir() {
            continue;
        }

        for repo_entry in fs::read_dir(user_path)? {
            let repo_entry = repo_entry?;
            if repo_entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }

            let formula_dir = repo_entry.path().join("Formula");
            if formula_dir.is_dir() {
                dirs.push(formula_dir);
            }
        }
    }

    dirs.sort();
    Ok(dirs)
}

/// Closest candidate to `needle`, if any is reasonably similar. Swapped
/// adjacent letters count as a single edit.
pub fn suggest<'a>(needle: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<String> {
    candidates
        .into_iter()
        .map(|c| (c, strsim::normalized_damerau_levenshtein(needle, c)))
        .filter(|(_, score)| *score >= 0.7)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(c, _)| c.to_string())
}
