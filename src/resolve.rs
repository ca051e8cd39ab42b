//! Dependency resolution and install planning.
//!
//! Planning happens in two passes:
//!
//! 1. **Filter** - for every reachable formula, decide which declared
//!    dependencies are *active* given the platform and that formula's options.
//!    Unselected optional dependencies, disabled recommended ones, and edges
//!    whose `when` gate is false are dropped here.
//! 2. **Order** - a depth-first topological sort over the active edges only,
//!    visiting dependencies in declaration order.
//!
//! Filtering strictly precedes ordering, so a dead edge can never produce a
//! spurious cycle. Any cycle among active edges fails the whole plan with
//! [`KegError::CyclicDependency`]; no partial plan is ever returned.
//!
//! # Examples
//!
//! ```no_run
//! use kegworks::options::BuildOptions;
//! use kegworks::platform::Platform;
//! use kegworks::registry::Registry;
//! use kegworks::resolve::PlanBuilder;
//!
//! fn main() -> anyhow::Result<()> {
//!     let registry = Registry::load(&["Formula".into()])?;
//!     let platform = Platform::detect();
//!     let plan = PlanBuilder::new(&registry, &platform).build("python", BuildOptions::default())?;
//!     for entry in plan.iter() {
//!         println!("{}", entry.name);
//!     }
//!     Ok(())
//! }
//! ```

use crate::error::{KegError, Result};
use crate::formula::{Dependency, DependencyKind, Formula};
use crate::options::{self, BuildOptions};
use crate::platform::Platform;
use crate::predicate::{Scope, holds};
use crate::registry::Registry;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Probe for system requirements that are not formulae (`depends_on :java`).
pub trait SystemProbe: Send + Sync {
    fn is_available(&self, name: &str) -> bool;
}

/// Looks the requirement up as an executable on `PATH`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PathProbe;

impl SystemProbe for PathProbe {
    fn is_available(&self, name: &str) -> bool {
        which::which(name).is_ok()
    }
}

impl<F> SystemProbe for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_available(&self, name: &str) -> bool {
        self(name)
    }
}

/// An edge that survived filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveDependency {
    pub name: String,
    pub build_only: bool,
}

/// A dependency as seen by a formula's build: direct, or pulled in through
/// the runtime dependencies of another one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosureDependency {
    pub name: String,
    /// Only reachable through build-only edges
    pub build_only: bool,
    pub direct: bool,
}

/// One formula in an install plan.
#[derive(Debug, Clone)]
pub struct PlannedFormula {
    pub name: String,
    pub version: String,
    pub options: BuildOptions,
    pub dependencies: Vec<ActiveDependency>,
    /// Requested by the user rather than pulled in as a dependency.
    pub requested: bool,
}

/// Formulae in build order; every entry's dependencies appear before it.
#[derive(Debug, Clone, Default)]
pub struct InstallPlan {
    entries: Vec<PlannedFormula>,
}

impl InstallPlan {
    pub fn iter(&self) -> impl Iterator<Item = &PlannedFormula> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&PlannedFormula> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    /// Direct dependencies of `name` followed by the runtime dependencies of
    /// those, recursively, each listed once. Anything reachable through a
    /// runtime edge counts as runtime even if a build-only edge also leads
    /// to it.
    pub fn dependency_closure(&self, name: &str) -> Vec<ClosureDependency> {
        let Some(root) = self.get(name) else {
            return Vec::new();
        };
        let mut closure: Vec<ClosureDependency> = Vec::new();

        for build_only in [false, true] {
            let mut next = closure.len();
            for dep in root.dependencies.iter().filter(|d| d.build_only == build_only) {
                add_to_closure(&mut closure, &dep.name, build_only, true);
            }
            while next < closure.len() {
                let parent = closure[next].name.clone();
                next += 1;
                let Some(planned) = self.get(&parent) else {
                    continue;
                };
                for dep in planned.dependencies.iter().filter(|d| !d.build_only) {
                    add_to_closure(&mut closure, &dep.name, build_only, false);
                }
            }
        }
        closure
    }

    /// Every formula that (transitively) depends on `name`.
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        let mut blocked: HashSet<&str> = HashSet::from([name]);
        let mut result = Vec::new();
        for entry in &self.entries {
            if entry
                .dependencies
                .iter()
                .any(|d| blocked.contains(d.name.as_str()))
            {
                blocked.insert(entry.name.as_str());
                result.push(entry.name.as_str());
            }
        }
        result
    }

    /// Check the ordering invariant: no forward references, no duplicates.
    pub fn is_well_ordered(&self) -> bool {
        let mut seen = HashSet::new();
        for entry in &self.entries {
            if entry
                .dependencies
                .iter()
                .any(|d| !seen.contains(d.name.as_str()))
            {
                return false;
            }
            if !seen.insert(entry.name.as_str()) {
                return false;
            }
        }
        true
    }
}

fn add_to_closure(closure: &mut Vec<ClosureDependency>, name: &str, build_only: bool, direct: bool) {
    match closure.iter_mut().find(|c| c.name == name) {
        Some(existing) => existing.direct |= direct,
        None => closure.push(ClosureDependency {
            name: name.to_string(),
            build_only,
            direct,
        }),
    }
}

/// Dependencies of `formula` that are active under `options` on `platform`,
/// in declaration order.
pub fn active_dependencies<'a>(
    formula: &'a Formula,
    options: &BuildOptions,
    platform: &Platform,
) -> Vec<&'a Dependency> {
    let scope = Scope::new(platform, options);

    let mut added: HashSet<&str> = HashSet::new();
    let mut removed: HashSet<&str> = HashSet::new();
    for option in &formula.options {
        if options.is_on(&option.name) {
            added.extend(option.adds.iter().map(String::as_str));
            removed.extend(option.removes.iter().map(String::as_str));
        }
    }

    formula
        .dependencies
        .iter()
        .filter(|dep| {
            let name = dep.name.as_str();
            // an option can toggle an edge but never revive one its
            // platform predicate rules out
            if !holds(dep.when.as_ref(), &scope) || removed.contains(name) {
                return false;
            }
            if added.contains(name) {
                return true;
            }
            match dep.kind {
                DependencyKind::Runtime | DependencyKind::Build => true,
                DependencyKind::Recommended | DependencyKind::Optional => options.with(name),
            }
        })
        .collect()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Builds [`InstallPlan`]s against a registry for one platform.
pub struct PlanBuilder<'a> {
    registry: &'a Registry,
    platform: &'a Platform,
    probe: &'a dyn SystemProbe,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(registry: &'a Registry, platform: &'a Platform) -> Self {
        Self {
            registry,
            platform,
            probe: &PathProbe,
        }
    }

    pub fn with_probe(mut self, probe: &'a dyn SystemProbe) -> Self {
        self.probe = probe;
        self
    }

    /// Plan a single root formula built with `options`.
    pub fn build(&self, root: &str, options: BuildOptions) -> Result<InstallPlan> {
        self.build_all(&[(root.to_string(), options)])
    }

    /// Plan several roots. Dependencies use their default options; a root
    /// keeps the options it was requested with even if another root depends on it.
    pub fn build_all(&self, roots: &[(String, BuildOptions)]) -> Result<InstallPlan> {
        let mut chosen: HashMap<String, BuildOptions> = roots.iter().cloned().collect();
        let requested: HashSet<&str> = roots.iter().map(|(n, _)| n.as_str()).collect();

        // Pass 1: filter edges for every reachable formula
        let mut edges: HashMap<String, Vec<ActiveDependency>> = HashMap::new();
        let mut queue: Vec<String> = roots.iter().map(|(n, _)| n.clone()).collect();
        while let Some(name) = queue.pop() {
            if edges.contains_key(&name) {
                continue;
            }
            let formula = self.registry.require(&name)?;
            let opts = chosen
                .entry(name.clone())
                .or_insert_with(|| options::defaults(formula, self.platform))
                .clone();

            let mut active = Vec::new();
            for dep in active_dependencies(formula, &opts, self.platform) {
                if dep.system {
                    if !self.probe.is_available(&dep.name) {
                        return Err(KegError::UnsatisfiedDependency {
                            formula: formula.name.clone(),
                            dependency: dep.name.clone(),
                        });
                    }
                    continue;
                }
                if self.registry.get(&dep.name).is_none() {
                    return Err(KegError::UnsatisfiedDependency {
                        formula: formula.name.clone(),
                        dependency: dep.name.clone(),
                    });
                }
                active.push(ActiveDependency {
                    name: dep.name.clone(),
                    build_only: dep.is_build_only(),
                });
                queue.push(dep.name.clone());
            }
            edges.insert(name, active);
        }

        // Pass 2: depth-first topological order over active edges
        let mut marks: HashMap<String, Mark> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut stack: Vec<String> = Vec::new();
        for (root, _) in roots {
            visit(root, &edges, &mut marks, &mut stack, &mut order)?;
        }

        let entries = order
            .into_iter()
            .map(|name| {
                let formula = self.registry.require(&name)?;
                Ok(PlannedFormula {
                    version: formula.pkg_version(),
                    options: chosen.remove(&name).unwrap_or_default(),
                    dependencies: edges.remove(&name).unwrap_or_default(),
                    requested: requested.contains(name.as_str()),
                    name,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let plan = InstallPlan { entries };
        debug!("Planned {:?}", plan.names());
        debug_assert!(plan.is_well_ordered());
        Ok(plan)
    }
}

fn visit(
    node: &str,
    edges: &HashMap<String, Vec<ActiveDependency>>,
    marks: &mut HashMap<String, Mark>,
    stack: &mut Vec<String>,
    order: &mut Vec<String>,
) -> Result<()> {
    match marks.get(node) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            let start = stack.iter().position(|n| n == node).unwrap_or(0);
            let mut cycle: Vec<String> = stack[start..].to_vec();
            cycle.push(node.to_string());
            return Err(KegError::CyclicDependency { cycle });
        }
        None => {}
    }

    marks.insert(node.to_string(), Mark::Visiting);
    stack.push(node.to_string());

    if let Some(deps) = edges.get(node) {
        for dep in deps {
            visit(&dep.name, edges, marks, stack, order)?;
        }
    }

    stack.pop();
    marks.insert(node.to_string(), Mark::Done);
    order.push(node.to_string());
    Ok(())
}
