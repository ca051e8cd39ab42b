//! Engine settings.
//!
//! Resolved once at start-up from the environment and then overridden by CLI
//! flags:
//!
//! | Setting | Environment | Default |
//! |---|---|---|
//! | prefix | `KEG_PREFIX` | `/opt/homebrew` (arm64), `/usr/local` |
//! | cache | `KEG_CACHE`, `XDG_CACHE_HOME/keg` | `~/.cache/keg` |
//! | formula path | `KEG_FORMULA_PATH` (colon separated) | taps only |
//! | workers | `KEG_JOBS` | available parallelism |
//! | step timeout | `KEG_STEP_TIMEOUT` (seconds) | 3600 |
//! | failure policy | `KEG_ON_FAILURE` (`keep`/`clean`) | `keep` |

use crate::cellar::{self, Layout};
use crate::error::Result;
use crate::registry;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// What happens to the keg of a formula whose build failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Leave the contaminated keg and build directory for inspection
    #[default]
    Keep,
    /// Remove the keg immediately
    Clean,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "keep" => Ok(Self::Keep),
            "clean" => Ok(Self::Clean),
            other => Err(format!("unknown failure policy `{}`", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub prefix: PathBuf,
    pub cache: PathBuf,
    pub formula_path: Vec<PathBuf>,
    pub jobs: usize,
    pub step_timeout: Duration,
    pub on_failure: FailurePolicy,
}

impl Settings {
    /// Settings rooted at explicit directories, with every other value at its default.
    pub fn new(prefix: impl Into<PathBuf>, cache: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
            cache: cache.into(),
            formula_path: vec![],
            jobs: default_jobs(),
            step_timeout: DEFAULT_STEP_TIMEOUT,
            on_failure: FailurePolicy::Keep,
        }
    }

    pub fn from_env() -> Self {
        let mut settings = Self::new(cellar::detect_prefix(), cache_dir());

        if let Some(path) = std::env::var_os("KEG_FORMULA_PATH") {
            settings.formula_path = std::env::split_paths(&path)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }
        if let Some(jobs) = parse_env::<usize>("KEG_JOBS")
            && jobs > 0
        {
            settings.jobs = jobs;
        }
        if let Some(secs) = parse_env::<u64>("KEG_STEP_TIMEOUT") {
            settings.step_timeout = Duration::from_secs(secs);
        }
        if let Some(policy) = parse_env::<FailurePolicy>("KEG_ON_FAILURE") {
            settings.on_failure = policy;
        }

        settings
    }

    pub fn layout(&self) -> Layout {
        Layout::new(&self.prefix)
    }

    /// Where the fetcher leaves source archives
    pub fn downloads_dir(&self) -> PathBuf {
        self.cache.join("downloads")
    }

    pub fn build_dir(&self) -> PathBuf {
        self.cache.join("build")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.cache.join("logs")
    }

    /// Formula directories in lookup order: explicit path first, then taps.
    pub fn formula_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = self.formula_path.clone();
        dirs.extend(registry::tap_formula_dirs(&self.layout())?);
        Ok(dirs)
    }
}

/// Get the cache directory (~/.cache/keg/ or equivalent)
pub fn cache_dir() -> PathBuf {
    if let Some(cache) = std::env::var_os("KEG_CACHE") {
        PathBuf::from(cache)
    } else if let Some(cache_home) = std::env::var_os("XDG_CACHE_HOME") {
        PathBuf::from(cache_home).join("keg")
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".cache/keg")
    } else {
        PathBuf::from(".cache/keg")
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn parse_env<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid {}={}", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_policy_parse() {
        assert_eq!("keep".parse::<FailurePolicy>(), Ok(FailurePolicy::Keep));
        assert_eq!("CLEAN".parse::<FailurePolicy>(), Ok(FailurePolicy::Clean));
        assert!("sometimes".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn test_derived_dirs() {
        let settings = Settings::new("/p", "/c");
        assert_eq!(settings.downloads_dir(), PathBuf::from("/c/downloads"));
        assert_eq!(settings.logs_dir(), PathBuf::from("/c/logs"));
        assert_eq!(settings.layout().cellar(), PathBuf::from("/p/Cellar"));
        assert_eq!(settings.step_timeout, DEFAULT_STEP_TIMEOUT);
        assert!(settings.jobs >= 1);
        // no taps under a nonexistent prefix
        assert!(settings.formula_dirs().unwrap().is_empty());
    }
}
