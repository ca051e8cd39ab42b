use crate::engine::Engine;
use crate::error::Result;
use crate::resolve::InstallPlan;
use colored::Colorize;

/// Print the dependency closure of `formula` under `flags`, in build order
/// or as a tree.
pub fn deps(engine: &Engine, formula: &str, flags: &[String], tree: bool) -> Result<()> {
    let is_tty = std::io::IsTerminal::is_terminal(&std::io::stdout());
    let (plan, _) = engine.plan(formula, flags)?;

    if tree {
        println!("{}", formula.bold());
        print_tree(&plan, formula, "", is_tty);
        return Ok(());
    }

    let deps: Vec<&str> = plan.names().into_iter().filter(|n| *n != formula).collect();
    if deps.is_empty() {
        if is_tty {
            println!("{} No dependencies", "✓".green());
        }
        return Ok(());
    }
    for dep in deps {
        if is_tty {
            println!("{}", dep.cyan());
        } else {
            println!("{}", dep);
        }
    }
    Ok(())
}

fn print_tree(plan: &InstallPlan, name: &str, indent: &str, is_tty: bool) {
    let Some(entry) = plan.get(name) else {
        return;
    };
    let len = entry.dependencies.len();
    for (i, dep) in entry.dependencies.iter().enumerate() {
        let last = i == len - 1;
        let branch = if last { "└── " } else { "├── " };
        let label = if dep.build_only {
            format!("{} (build)", dep.name)
        } else {
            dep.name.clone()
        };
        if is_tty {
            println!("{}{}{}", indent, branch, label.cyan());
        } else {
            println!("{}{}{}", indent, branch, label);
        }
        let child_indent = format!("{}{}", indent, if last { "    " } else { "│   " });
        print_tree(plan, &dep.name, &child_indent, is_tty);
    }
}
