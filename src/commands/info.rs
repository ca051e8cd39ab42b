use super::utils::header;
use crate::cellar;
use crate::context::BuildContext;
use crate::engine::Engine;
use crate::error::Result;
use crate::formula::{Dependency, DependencyKind};
use crate::options;
use crate::postinstall;
use crate::predicate::{Scope, holds};
use colored::Colorize;

fn kind_label(dep: &Dependency) -> String {
    let mut parts = vec![match dep.kind {
        DependencyKind::Runtime => "runtime",
        DependencyKind::Build => "build",
        DependencyKind::Recommended => "recommended",
        DependencyKind::Optional => "optional",
    }];
    if dep.build && dep.kind != DependencyKind::Build {
        parts.push("build");
    }
    if dep.system {
        parts.push("system");
    }
    parts.join(", ")
}

pub fn info(engine: &Engine, formula_name: &str) -> Result<()> {
    let formula = engine.registry().require(formula_name)?;
    let platform = engine.platform();
    let defaults = options::defaults(formula, platform);
    let scope = Scope::new(platform, &defaults);

    header(&format!("{}: {}", formula.name, formula.pkg_version()));
    if let Some(desc) = &formula.desc {
        println!("{}", desc);
    }
    if let Some(homepage) = &formula.homepage {
        println!("{}: {}", "Homepage".bold(), homepage);
    }
    if formula.keg_only {
        println!("{}", "Keg-only: not linked into the prefix".dimmed());
    }
    if let Some(path) = &formula.path {
        println!("{}: {}", "From".bold(), path.display());
    }

    let layout = engine.layout();
    let versions = cellar::installed_versions(layout, &formula.name)?;
    if versions.is_empty() {
        println!("{}", "Not installed".dimmed());
    } else {
        for keg in &versions {
            let state = if keg.is_complete() {
                String::new()
            } else {
                format!(" {}", "(incomplete)".red())
            };
            let opts = keg
                .receipt
                .as_ref()
                .map(|r| r.used_options.join(" "))
                .filter(|o| !o.is_empty())
                .map(|o| format!(" [{}]", o))
                .unwrap_or_default();
            println!("{}{}{}", keg.path.display(), opts, state);
        }
    }

    let deps: Vec<&Dependency> = formula
        .dependencies
        .iter()
        .filter(|d| holds(d.when.as_ref(), &scope))
        .collect();
    if !deps.is_empty() {
        header("Dependencies");
        for dep in deps {
            let constraint = dep
                .version
                .as_deref()
                .map(|v| format!(" {}", v))
                .unwrap_or_default();
            println!(
                "{}{} {}",
                dep.name.cyan(),
                constraint,
                format!("({})", kind_label(dep)).dimmed()
            );
        }
    }

    let declared = formula.declared_options(platform);
    if !declared.is_empty() {
        header("Options");
        for option in declared {
            println!("--{}", option.name);
            if !option.description.is_empty() {
                println!("\t{}", option.description);
            }
        }
    }

    let ctx = BuildContext::new(formula, defaults.clone(), *platform, layout);
    if let Some(caveats) = postinstall::caveats(formula, &ctx) {
        header("Caveats");
        println!("{}", caveats);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_label() {
        let dep: Dependency =
            serde_json::from_str(r#"{ "name": "sphinx", "kind": "optional", "build": true }"#)
                .unwrap();
        assert_eq!(kind_label(&dep), "optional, build");
        let dep: Dependency =
            serde_json::from_str(r#"{ "name": "java", "system": true }"#).unwrap();
        assert_eq!(kind_label(&dep), "runtime, system");
    }
}
