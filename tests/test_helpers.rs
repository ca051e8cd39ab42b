// Test helpers for isolated testing
// Every environment gets its own prefix, cache and formula directory

#![allow(dead_code)]

use kegworks::config::Settings;
use kegworks::engine::Engine;
use kegworks::platform::{Arch, Compiler, OsFamily, Platform};
use kegworks::registry::Registry;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Isolated test environment using temporary directories
/// Automatically cleaned up when dropped (RAII pattern)
///
/// - temp/
///   - prefix/     (Cellar, opt, bin, ...)
///   - cache/      (downloads, build, logs)
///   - formulae/   (one JSON document per formula)
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub prefix: PathBuf,
    pub cache: PathBuf,
    pub formulae: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let prefix = temp_dir.path().join("prefix");
        let cache = temp_dir.path().join("cache");
        let formulae = temp_dir.path().join("formulae");

        std::fs::create_dir_all(&prefix).unwrap();
        std::fs::create_dir_all(&cache).unwrap();
        std::fs::create_dir_all(&formulae).unwrap();

        Self {
            temp_dir,
            prefix,
            cache,
            formulae,
        }
    }

    /// Write `<name>.json` into the formula directory
    pub fn write_formula(&self, name: &str, json: &str) -> PathBuf {
        let path = self.formulae.join(format!("{}.json", name));
        std::fs::write(&path, json).unwrap();
        path
    }

    /// A formula with the given dependencies whose build drops a script
    /// `bin/<name>` that prints `<name>`.
    pub fn write_simple(&self, name: &str, deps: &[&str]) -> PathBuf {
        let deps: Vec<String> = deps
            .iter()
            .map(|d| format!(r#"{{ "name": "{}" }}"#, d))
            .collect();
        self.write_formula(
            name,
            &format!(
                r##"{{
                    "name": "{name}",
                    "version": "1.0",
                    "dependencies": [{deps}],
                    "install": [
                        {{ "action": "write", "path": "{{bin}}/{name}",
                           "content": "#!/bin/sh\necho {name}\n" }},
                        {{ "action": "run", "program": "chmod", "args": ["+x", "{{bin}}/{name}"] }}
                    ]
                }}"##,
                name = name,
                deps = deps.join(", ")
            ),
        )
    }

    pub fn settings(&self) -> Settings {
        let mut settings = Settings::new(&self.prefix, &self.cache);
        settings.formula_path = vec![self.formulae.clone()];
        settings.jobs = 4;
        settings.step_timeout = Duration::from_secs(60);
        settings
    }

    pub fn registry(&self) -> Registry {
        Registry::load(&[self.formulae.clone()]).unwrap()
    }

    pub fn engine(&self) -> Engine {
        self.engine_with(self.settings())
    }

    pub fn engine_with(&self, settings: Settings) -> Engine {
        Engine::with_platform(settings, self.registry(), linux())
    }

    pub fn keg(&self, name: &str, version: &str) -> PathBuf {
        self.prefix.join("Cellar").join(name).join(version)
    }

    pub fn path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.prefix.join(rel)
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

pub fn linux() -> Platform {
    Platform::new(OsFamily::Linux, Arch::X86_64, Compiler::Gcc)
}

pub fn macos() -> Platform {
    Platform::new(OsFamily::Macos, Arch::Arm64, Compiler::Clang)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_creates_directories() {
        let env = TestEnvironment::new();
        assert!(env.prefix.exists());
        assert!(env.cache.exists());
        assert!(env.formulae.exists());
    }

    #[test]
    fn test_environment_cleanup() {
        let prefix = {
            let env = TestEnvironment::new();
            env.prefix.clone()
        };
        assert!(!prefix.exists());
    }

    #[test]
    fn test_simple_formula_loads() {
        let env = TestEnvironment::new();
        env.write_simple("a", &[]);
        env.write_simple("b", &["a"]);
        let registry = env.registry();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.require("b").unwrap().dependencies[0].name, "a");
    }
}
