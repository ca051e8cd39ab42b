//! Per-formula build context.
//!
//! A [`BuildContext`] is assembled once before a formula's install run and is
//! read-only afterwards: chosen options, the platform, every path a step may
//! refer to, and the environment handed to run-command steps. Steps receive
//! it by reference; nothing mutates a process-wide environment.
//!
//! Step strings may contain placeholders that expand against the context:
//!
//! | Placeholder | Expands to |
//! |---|---|
//! | `{prefix}` | the keg, `<root>/Cellar/<name>/<pkg_version>` |
//! | `{bin}` `{sbin}` `{lib}` `{libexec}` `{include}` `{share}` `{frameworks}` | keg subdirectories |
//! | `{pkgshare}` `{doc}` | `share/<name>`, `share/doc/<name>` |
//! | `{etc}` `{var}` | shared `<root>/etc`, `<root>/var` |
//! | `{opt_prefix}` `{opt_bin}` `{opt_lib}` `{opt_include}` | the stable opt path |
//! | `{opt:<dep>}` | opt path of a dependency |
//! | `{root}` `{source}` | shared prefix, staged source tree |
//! | `{name}` `{version}` `{jobs}` `{os}` `{arch}` | scalars |
//!
//! Anything else in braces is left untouched, so shell snippets such as
//! `${HOME}` survive expansion.

use crate::cellar::Layout;
use crate::config::DEFAULT_STEP_TIMEOUT;
use crate::formula::Formula;
use crate::options::BuildOptions;
use crate::platform::Platform;
use crate::predicate::Scope;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BuildPaths {
    /// Shared prefix
    pub root: PathBuf,
    /// The keg being populated
    pub prefix: PathBuf,
    pub opt_prefix: PathBuf,
    /// Staged source tree; the working directory of install steps
    pub source: PathBuf,
    /// Directory holding the formula document, for patch files
    pub formula_dir: Option<PathBuf>,
    /// Per-step command logs
    pub logs: PathBuf,
}

#[derive(Debug, Clone)]
pub struct BuildContext {
    pub name: String,
    pub version: String,
    pub pkg_version: String,
    pub options: BuildOptions,
    pub platform: Platform,
    pub paths: BuildPaths,
    /// Default timeout for run-command steps
    pub timeout: Duration,
    pub jobs: usize,
    /// Active dependencies and their opt paths, in declaration order
    dependencies: Vec<(String, PathBuf)>,
    formula_env: BTreeMap<String, String>,
    unset_env: Vec<String>,
}

impl BuildContext {
    pub fn new(
        formula: &Formula,
        options: BuildOptions,
        platform: Platform,
        layout: &Layout,
    ) -> Self {
        let pkg_version = formula.pkg_version();
        let prefix = layout.keg(&formula.name, &pkg_version);
        Self {
            name: formula.name.clone(),
            version: formula.version.clone(),
            pkg_version,
            options,
            platform,
            paths: BuildPaths {
                root: layout.root().to_path_buf(),
                opt_prefix: layout.opt(&formula.name),
                source: prefix.clone(),
                formula_dir: formula
                    .path
                    .as_ref()
                    .and_then(|p| p.parent())
                    .map(Path::to_path_buf),
                logs: std::env::temp_dir().join("keg-logs").join(&formula.name),
                prefix,
            },
            timeout: formula
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_STEP_TIMEOUT),
            jobs: 1,
            dependencies: vec![],
            formula_env: formula.env.clone(),
            unset_env: formula.unset_env.clone(),
        }
    }

    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.paths.source = source.into();
        self
    }

    pub fn with_logs(mut self, logs: impl Into<PathBuf>) -> Self {
        self.paths.logs = logs.into();
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Engine-wide default timeout; a formula's own `timeout_secs` wins.
    pub fn with_default_timeout(mut self, formula: &Formula, timeout: Duration) -> Self {
        if formula.timeout_secs.is_none() {
            self.timeout = timeout;
        }
        self
    }

    pub fn with_dependencies<'a>(
        mut self,
        layout: &Layout,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        self.dependencies = names
            .into_iter()
            .map(|n| (n.to_string(), layout.opt(n)))
            .collect();
        self
    }

    pub fn scope(&self) -> Scope<'_> {
        Scope::new(&self.platform, &self.options)
    }

    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(|(n, _)| n.as_str())
    }

    /// Variables set for every run-command step.
    ///
    /// Search paths point at the opt links of the active dependencies; the
    /// formula's own `env` is applied last and wins.
    pub fn environment(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        let opts: Vec<&Path> = self.dependencies.iter().map(|(_, p)| p.as_path()).collect();

        let join_flags = |flag: &str, sub: &str| -> String {
            opts.iter()
                .map(|p| format!("{}{}", flag, p.join(sub).display()))
                .collect::<Vec<_>>()
                .join(" ")
        };
        let join_paths = |subs: &[&str]| -> String {
            opts.iter()
                .flat_map(|p| subs.iter().map(move |s| p.join(s).display().to_string()))
                .collect::<Vec<_>>()
                .join(":")
        };

        if !opts.is_empty() {
            env.insert("CPPFLAGS".to_string(), join_flags("-I", "include"));
            env.insert("LDFLAGS".to_string(), join_flags("-L", "lib"));
            env.insert(
                "PKG_CONFIG_PATH".to_string(),
                join_paths(&["lib/pkgconfig", "share/pkgconfig"]),
            );
            env.insert(
                "CMAKE_PREFIX_PATH".to_string(),
                opts.iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(":"),
            );
        }

        let mut path = join_paths(&["bin"]);
        if let Ok(inherited) = std::env::var("PATH") {
            if !path.is_empty() {
                path.push(':');
            }
            path.push_str(&inherited);
        }
        env.insert("PATH".to_string(), path);
        env.insert("MAKEFLAGS".to_string(), format!("-j{}", self.jobs));

        for (key, value) in &self.formula_env {
            env.insert(key.clone(), self.expand(value));
        }
        for key in &self.unset_env {
            env.remove(key);
        }
        env
    }

    /// Variables removed from the inherited environment.
    pub fn removed_env(&self) -> &[String] {
        &self.unset_env
    }

    fn lookup(&self, key: &str) -> Option<String> {
        let keg = &self.paths.prefix;
        let opt = &self.paths.opt_prefix;
        let path = |p: PathBuf| Some(p.display().to_string());

        if let Some(dep) = key.strip_prefix("opt:") {
            return self
                .dependencies
                .iter()
                .find(|(n, _)| n == dep)
                .and_then(|(_, p)| path(p.clone()));
        }

        match key {
            "name" => Some(self.name.clone()),
            "version" => Some(self.version.clone()),
            "prefix" => path(keg.clone()),
            "bin" => path(keg.join("bin")),
            "sbin" => path(keg.join("sbin")),
            "lib" => path(keg.join("lib")),
            "libexec" => path(keg.join("libexec")),
            "include" => path(keg.join("include")),
            "share" => path(keg.join("share")),
            "pkgshare" => path(keg.join("share").join(&self.name)),
            "doc" => path(keg.join("share/doc").join(&self.name)),
            "frameworks" => path(keg.join("Frameworks")),
            "etc" => path(self.paths.root.join("etc")),
            "var" => path(self.paths.root.join("var")),
            "opt_prefix" => path(opt.clone()),
            "opt_bin" => path(opt.join("bin")),
            "opt_lib" => path(opt.join("lib")),
            "opt_include" => path(opt.join("include")),
            "root" => path(self.paths.root.clone()),
            "source" => path(self.paths.source.clone()),
            "jobs" => Some(self.jobs.to_string()),
            "os" => Some(self.platform.os.to_string()),
            "arch" => Some(self.platform.arch.to_string()),
            _ => None,
        }
    }

    /// Expand `{placeholder}`s; unknown ones are kept verbatim.
    pub fn expand(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            match after.find('}') {
                Some(end) => {
                    let key = &after[..end];
                    match self.lookup(key) {
                        Some(value) => out.push_str(&value),
                        None => {
                            out.push('{');
                            out.push_str(key);
                            out.push('}');
                        }
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }

    /// Expand `raw` and resolve it against `base` unless it is absolute.
    pub fn resolve_path(&self, base: &Path, raw: &str) -> PathBuf {
        let expanded = PathBuf::from(self.expand(raw));
        if expanded.is_absolute() {
            expanded
        } else {
            base.join(expanded)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Arch, Compiler, OsFamily};

    fn context() -> BuildContext {
        let formula = Formula::from_json(
            r#"{
                "name": "python",
                "version": "3.6.4",
                "revision": 1,
                "env": { "PYTHONDONTWRITEBYTECODE": "1", "SITE": "{lib}/site" },
                "unset_env": ["PYTHONHOME", "MAKEFLAGS"],
                "dependencies": [ { "name": "sqlite" }, { "name": "xz" } ]
            }"#,
        )
        .unwrap();
        let layout = Layout::new("/p");
        BuildContext::new(
            &formula,
            BuildOptions::default(),
            Platform::new(OsFamily::Linux, Arch::X86_64, Compiler::Gcc),
            &layout,
        )
        .with_source("/build/python-3.6.4")
        .with_jobs(4)
        .with_dependencies(&layout, ["sqlite", "xz"])
    }

    #[test]
    fn test_expand_placeholders() {
        let ctx = context();
        assert_eq!(
            ctx.expand("--prefix={prefix}"),
            "--prefix=/p/Cellar/python/3.6.4_1"
        );
        assert_eq!(ctx.expand("{pkgshare}/x"), "/p/Cellar/python/3.6.4_1/share/python/x");
        assert_eq!(ctx.expand("{opt_bin}/python3"), "/p/opt/python/bin/python3");
        assert_eq!(ctx.expand("--with-sqlite={opt:sqlite}"), "--with-sqlite=/p/opt/sqlite");
        assert_eq!(ctx.expand("-j{jobs} {os}/{arch}"), "-j4 linux/x86_64");
        assert_eq!(ctx.expand("{version}"), "3.6.4");
    }

    #[test]
    fn test_unknown_placeholders_are_kept() {
        let ctx = context();
        assert_eq!(ctx.expand("echo ${HOME} {nope} {opt:ghost}"), "echo ${HOME} {nope} {opt:ghost}");
        assert_eq!(ctx.expand("dangling {prefix"), "dangling {prefix");
        assert_eq!(ctx.expand("{}"), "{}");
    }

    #[test]
    fn test_environment_from_dependencies() {
        let ctx = context();
        let env = ctx.environment();
        assert_eq!(env["CPPFLAGS"], "-I/p/opt/sqlite/include -I/p/opt/xz/include");
        assert_eq!(env["LDFLAGS"], "-L/p/opt/sqlite/lib -L/p/opt/xz/lib");
        assert!(env["PKG_CONFIG_PATH"].starts_with("/p/opt/sqlite/lib/pkgconfig:"));
        assert!(env["PATH"].starts_with("/p/opt/sqlite/bin:/p/opt/xz/bin"));
        assert_eq!(env["PYTHONDONTWRITEBYTECODE"], "1");
        assert_eq!(env["SITE"], "/p/Cellar/python/3.6.4_1/lib/site");
        assert!(!env.contains_key("MAKEFLAGS"));
        assert_eq!(ctx.removed_env(), ["PYTHONHOME", "MAKEFLAGS"]);
    }

    #[test]
    fn test_resolve_path() {
        let ctx = context();
        assert_eq!(
            ctx.resolve_path(Path::new("/src"), "Makefile"),
            PathBuf::from("/src/Makefile")
        );
        assert_eq!(
            ctx.resolve_path(Path::new("/src"), "{bin}/x"),
            PathBuf::from("/p/Cellar/python/3.6.4_1/bin/x")
        );
    }
}
