//! Plan execution.
//!
//! The engine walks an [`InstallPlan`] with a bounded pool of workers. A
//! formula starts only after every one of its dependencies has been
//! installed (or was already present); formulae with no relationship to
//! each other build concurrently.
//!
//! # Failure handling
//!
//! - A failed formula does not stop the plan. Its dependents are reported as
//!   [`Outcome::Skipped`]; unrelated formulae keep building, and the caller gets a
//!   partial-success [`PlanReport`].
//! - A keg carries a contamination marker from the moment its build starts
//!   until it is linked, its post-install hooks have run and it has a
//!   receipt. [`FailurePolicy`] decides whether a failed keg is removed right
//!   away or kept for inspection; either way the next install of that version
//!   starts from an empty keg.
//!
//! # Cancellation
//!
//! [`CancelToken::cancel`] stops scheduling immediately. Builds already in
//! flight run to completion (or failure); everything not yet started is
//! reported as [`Outcome::Cancelled`].

use crate::cellar::{self, Layout};
use crate::config::{FailurePolicy, Settings};
use crate::context::BuildContext;
use crate::error::{KegError, Result};
use crate::executor;
use crate::formula::Formula;
use crate::locks::PrefixLocks;
use crate::options::{self, Deprecation};
use crate::platform::Platform;
use crate::postinstall;
use crate::receipt::{InstallReceipt, RuntimeDependency};
use crate::registry::Registry;
use crate::resolve::{
    ClosureDependency, InstallPlan, PathProbe, PlanBuilder, PlannedFormula, SystemProbe,
};
use crate::stage;
use crate::symlink;
use anyhow::Context;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Cooperative cancellation shared between the caller and the scheduler
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Final state of one formula in a plan
#[derive(Debug)]
pub enum Outcome {
    Installed {
        version: String,
        linked: usize,
        caveats: Option<String>,
    },
    AlreadyInstalled {
        version: String,
    },
    Failed(KegError),
    /// Not attempted because a dependency did not install
    Skipped {
        blocked_by: String,
    },
    Cancelled,
}

impl Outcome {
    /// Whether dependents may build on top of this formula.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Installed { .. } | Self::AlreadyInstalled { .. })
    }
}

/// Hooks for rendering plan progress
pub trait PlanObserver: Send + Sync {
    fn plan_started(&self, _plan: &InstallPlan) {}
    fn formula_started(&self, _name: &str, _version: &str) {}
    fn formula_finished(&self, _name: &str, _outcome: &Outcome) {}
    fn plan_finished(&self, _report: &PlanReport) {}
}

/// Observer that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentObserver;

impl PlanObserver for SilentObserver {}

/// Outcomes in plan order
#[derive(Debug, Default)]
pub struct PlanReport {
    pub outcomes: Vec<(String, Outcome)>,
}

impl PlanReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|(_, o)| o.is_success())
    }

    pub fn get(&self, name: &str) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, o)| o)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &KegError)> {
        self.outcomes.iter().filter_map(|(n, o)| match o {
            Outcome::Failed(e) => Some((n.as_str(), e)),
            _ => None,
        })
    }

    pub fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

struct EngineInner {
    settings: Settings,
    registry: Registry,
    platform: Platform,
    layout: Layout,
    locks: PrefixLocks,
    probe: Arc<dyn SystemProbe>,
}

/// Cheap to clone; all clones share one lock table.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(settings: Settings, registry: Registry) -> Self {
        Self::with_platform(settings, registry, Platform::detect())
    }

    pub fn with_platform(settings: Settings, registry: Registry, platform: Platform) -> Self {
        let layout = settings.layout();
        Self {
            inner: Arc::new(EngineInner {
                locks: PrefixLocks::new(layout.locks_dir()),
                settings,
                registry,
                platform,
                layout,
                probe: Arc::new(PathProbe),
            }),
        }
    }

    /// Load formulae from the configured search path.
    pub fn load(settings: Settings) -> Result<Self> {
        let registry = Registry::load(&settings.formula_dirs()?)?;
        Ok(Self::new(settings, registry))
    }

    /// Replace the system requirement probe. Only valid before the engine is cloned.
    pub fn with_probe(mut self, probe: Arc<dyn SystemProbe>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.probe = probe;
        }
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn platform(&self) -> &Platform {
        &self.inner.platform
    }

    pub fn layout(&self) -> &Layout {
        &self.inner.layout
    }

    /// Resolve `flags` for `root` and plan its dependency closure.
    ///
    /// Every error here is structural: nothing has touched the filesystem.
    pub fn plan(&self, root: &str, flags: &[String]) -> Result<(InstallPlan, Vec<Deprecation>)> {
        let formula = self.inner.registry.require(root)?;
        let resolution = options::resolve(formula, &self.inner.platform, flags)?;
        for deprecation in &resolution.deprecations {
            info!(
                "{}: option --{} is deprecated, use --{}",
                root, deprecation.old, deprecation.new
            );
        }
        let plan = PlanBuilder::new(&self.inner.registry, &self.inner.platform)
            .with_probe(self.inner.probe.as_ref())
            .build(root, resolution.options)?;
        Ok((plan, resolution.deprecations))
    }

    /// Execute `plan`. Never fails as a whole; see the per-formula outcomes.
    pub async fn install(
        &self,
        plan: &InstallPlan,
        force: bool,
        observer: Arc<dyn PlanObserver>,
        cancel: CancelToken,
    ) -> PlanReport {
        observer.plan_started(plan);
        let jobs = self.inner.settings.jobs.max(1);

        let mut pending: Vec<PlannedFormula> = plan.iter().cloned().collect();
        let mut done: HashMap<String, Outcome> = HashMap::new();
        let mut running: JoinSet<(String, Outcome)> = JoinSet::new();
        let mut task_names: HashMap<tokio::task::Id, String> = HashMap::new();

        loop {
            let mut i = 0;
            while i < pending.len() && !cancel.is_cancelled() {
                let blocker = pending[i].dependencies.iter().find_map(|dep| {
                    done.get(&dep.name)
                        .filter(|o| !o.is_success())
                        .map(|_| dep.name.clone())
                });
                if let Some(blocked_by) = blocker {
                    let entry = pending.remove(i);
                    let outcome = Outcome::Skipped { blocked_by };
                    observer.formula_finished(&entry.name, &outcome);
                    done.insert(entry.name, outcome);
                    continue;
                }

                let ready = pending[i]
                    .dependencies
                    .iter()
                    .all(|dep| done.get(&dep.name).is_some_and(Outcome::is_success));
                if ready && running.len() < jobs {
                    let entry = pending.remove(i);
                    observer.formula_started(&entry.name, &entry.version);
                    let engine = self.clone();
                    let name = entry.name.clone();
                    let closure = plan.dependency_closure(&entry.name);
                    let handle = running.spawn(async move {
                        let outcome = match engine.install_formula(&entry, &closure, force).await {
                            Ok(outcome) => outcome,
                            Err(e) => Outcome::Failed(e),
                        };
                        (entry.name, outcome)
                    });
                    task_names.insert(handle.id(), name);
                    continue;
                }
                i += 1;
            }

            if running.is_empty() {
                break;
            }

            let joined = if cancel.is_cancelled() {
                running.join_next_with_id().await
            } else {
                tokio::select! {
                    joined = running.join_next_with_id() => joined,
                    _ = cancel.cancelled() => {
                        info!("Cancelled; waiting for {} running builds", running.len());
                        continue;
                    }
                }
            };

            let (name, outcome) = match joined {
                Some(Ok((id, (name, outcome)))) => {
                    task_names.remove(&id);
                    (name, outcome)
                }
                Some(Err(e)) => {
                    let name = task_names.remove(&e.id()).unwrap_or_default();
                    let err = anyhow::anyhow!("build task for {} panicked: {}", name, e);
                    (name, Outcome::Failed(err.into()))
                }
                None => break,
            };
            observer.formula_finished(&name, &outcome);
            done.insert(name, outcome);
        }

        for entry in pending {
            let outcome = if cancel.is_cancelled() {
                Outcome::Cancelled
            } else {
                Outcome::Skipped {
                    blocked_by: entry
                        .dependencies
                        .first()
                        .map(|d| d.name.clone())
                        .unwrap_or_default(),
                }
            };
            observer.formula_finished(&entry.name, &outcome);
            done.insert(entry.name, outcome);
        }

        let report = PlanReport {
            outcomes: plan
                .iter()
                .filter_map(|e| done.remove(&e.name).map(|o| (e.name.clone(), o)))
                .collect(),
        };
        observer.plan_finished(&report);
        report
    }

    /// Build, link and finalize one formula.
    async fn install_formula(
        &self,
        entry: &PlannedFormula,
        closure: &[ClosureDependency],
        force: bool,
    ) -> Result<Outcome> {
        let inner = &self.inner;
        let formula = inner.registry.require(&entry.name)?.clone();
        let layout = &inner.layout;
        let version = formula.pkg_version();
        let keg = layout.keg(&formula.name, &version);

        let _keg_lock = inner.locks.acquire(&keg).await?;

        if keg.exists() {
            let complete = InstallReceipt::read(&keg).is_ok() && !cellar::is_contaminated(&keg);
            if complete && !force {
                debug!("{} {} already installed", formula.name, version);
                return Ok(Outcome::AlreadyInstalled { version });
            }
            info!("Removing previous keg {}", keg.display());
            fs::remove_dir_all(&keg)
                .with_context(|| format!("Failed to remove {}", keg.display()))?;
        }

        let build_root = inner.settings.build_dir();
        let downloads = inner.settings.downloads_dir();
        let staged = {
            let formula = formula.clone();
            tokio::task::spawn_blocking(move || {
                stage::stage_source(&formula, &downloads, &build_root)
            })
            .await
            .context("Staging task panicked")??
        };
        let build_dir = inner
            .settings
            .build_dir()
            .join(format!("{}-{}", formula.name, version));

        let ctx = BuildContext::new(&formula, entry.options.clone(), inner.platform, layout)
            .with_source(staged)
            .with_logs(inner.settings.logs_dir().join(&formula.name))
            .with_jobs(inner.settings.jobs)
            .with_default_timeout(&formula, inner.settings.step_timeout)
            .with_dependencies(layout, closure.iter().map(|d| d.name.as_str()));

        fs::create_dir_all(&keg).with_context(|| format!("Failed to create {}", keg.display()))?;
        cellar::mark_contaminated(&keg)?;

        let finished = self.build_keg(&formula, entry, closure, &ctx).await;
        let (linked, report) = match finished {
            Ok(done) => done,
            Err(e) => {
                self.discard_failed(&formula.name, &version, &build_dir);
                return Err(e);
            }
        };

        if let Err(e) = fs::remove_dir_all(&build_dir) {
            debug!("Could not remove {}: {}", build_dir.display(), e);
        }

        Ok(Outcome::Installed {
            version,
            linked,
            caveats: report.caveats,
        })
    }

    /// Build, link and run post-install hooks. The receipt is written and the
    /// contamination marker cleared only once all of that succeeded.
    async fn build_keg(
        &self,
        formula: &Formula,
        entry: &PlannedFormula,
        closure: &[ClosureDependency],
        ctx: &BuildContext,
    ) -> Result<(usize, postinstall::PostInstallReport)> {
        let inner = &self.inner;
        let layout = &inner.layout;
        let version = &ctx.pkg_version;

        executor::install(formula, ctx).await?;

        let linked = {
            let _root_lock = inner.locks.acquire(layout.root()).await?;
            symlink::unlink_other_versions(layout, &formula.name, version)?;
            let linked = if formula.keg_only {
                debug!("{} is keg-only; not linking", formula.name);
                0
            } else {
                symlink::link_keg(layout, &formula.name, version)?.len()
            };
            symlink::optlink(layout, &formula.name, version)?;
            linked
        };

        let report = postinstall::run_post_install(formula, ctx).await?;

        let runtime_dependencies = closure
            .iter()
            .filter(|d| !d.build_only)
            .map(|d| RuntimeDependency {
                full_name: d.name.clone(),
                pkg_version: inner
                    .registry
                    .get(&d.name)
                    .map(Formula::pkg_version)
                    .unwrap_or_default(),
                declared_directly: d.direct,
            })
            .collect();
        InstallReceipt::new_build(
            formula,
            &entry.options,
            &inner.platform,
            runtime_dependencies,
            entry.requested,
        )
        .write(&ctx.paths.prefix)?;
        cellar::clear_contaminated(&ctx.paths.prefix)?;

        Ok((linked, report))
    }

    fn discard_failed(&self, name: &str, version: &str, build_dir: &Path) {
        let layout = &self.inner.layout;
        let keg = layout.keg(name, version);
        match self.inner.settings.on_failure {
            FailurePolicy::Keep => {
                warn!(
                    "Keeping contaminated keg {} and build directory {} for inspection",
                    keg.display(),
                    build_dir.display()
                );
            }
            FailurePolicy::Clean => {
                if let Err(e) = self.unlink_failed(name, version) {
                    debug!("Could not unlink {}: {}", keg.display(), e);
                }
                for path in [keg.as_path(), build_dir] {
                    if let Err(e) = fs::remove_dir_all(path) {
                        debug!("Could not remove {}: {}", path.display(), e);
                    }
                }
            }
        }
    }

    /// Drop shared links and the opt link that point into a failed keg.
    fn unlink_failed(&self, name: &str, version: &str) -> Result<()> {
        let layout = &self.inner.layout;
        let keg = layout.keg(name, version);
        symlink::unlink_keg(layout, name, version)?;
        let opt_target = fs::canonicalize(layout.opt(name)).ok();
        if opt_target.is_some() && opt_target == fs::canonicalize(&keg).ok() {
            symlink::unoptlink(layout, name)?;
        }
        Ok(())
    }

    /// An installed keg of the registry's current version of `name`, plus a
    /// context for running steps against it.
    fn installed_context(&self, name: &str) -> Result<(Formula, BuildContext)> {
        let inner = &self.inner;
        let formula = inner.registry.require(name)?.clone();
        let keg = inner.layout.keg(&formula.name, &formula.pkg_version());
        if cellar::is_contaminated(&keg) {
            return Err(KegError::NotInstalled(name.to_string()));
        }
        let receipt =
            InstallReceipt::read(&keg).map_err(|_| KegError::NotInstalled(name.to_string()))?;

        let ctx = BuildContext::new(&formula, receipt.options(), inner.platform, &inner.layout)
            .with_logs(inner.settings.logs_dir().join(&formula.name))
            .with_jobs(inner.settings.jobs)
            .with_default_timeout(&formula, inner.settings.step_timeout)
            .with_dependencies(
                &inner.layout,
                receipt.runtime_dependencies.iter().map(|d| d.full_name.as_str()),
            );
        Ok((formula, ctx))
    }

    /// Run the test commands of an installed formula.
    pub async fn test(&self, name: &str) -> Result<usize> {
        let (formula, ctx) = self.installed_context(name)?;
        let scratch = self.inner.settings.cache.join("test").join(&formula.name);
        if scratch.exists() {
            fs::remove_dir_all(&scratch)?;
        }
        fs::create_dir_all(&scratch)
            .with_context(|| format!("Failed to create {}", scratch.display()))?;

        let result = executor::run_tests(&formula, &ctx.with_source(&scratch)).await;
        if let Err(e) = fs::remove_dir_all(&scratch) {
            debug!("Could not remove {}: {}", scratch.display(), e);
        }
        result
    }

    /// Re-run the post-install steps of an installed formula.
    pub async fn post_install(&self, name: &str) -> Result<postinstall::PostInstallReport> {
        let (formula, ctx) = self.installed_context(name)?;
        let _keg_lock = self.inner.locks.acquire(&ctx.paths.prefix).await?;
        postinstall::run_post_install(&formula, &ctx).await
    }
}
