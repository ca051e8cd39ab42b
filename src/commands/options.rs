use crate::engine::Engine;
use crate::error::Result;
use colored::Colorize;

/// List the options `formula` accepts on this platform.
pub fn options(engine: &Engine, formula_name: &str) -> Result<()> {
    let formula = engine.registry().require(formula_name)?;
    let declared = formula.declared_options(engine.platform());

    if declared.is_empty() {
        println!("{} has no options", formula.name.bold());
        return Ok(());
    }

    for option in &declared {
        let flag = format!("--{}", option.name);
        if option.default {
            println!("{} {}", flag.cyan(), "(default)".dimmed());
        } else {
            println!("{}", flag.cyan());
        }
        if !option.description.is_empty() {
            println!("\t{}", option.description);
        }
    }

    if !formula.deprecated_options.is_empty() {
        println!();
        println!("{}", "Deprecated:".bold());
        for d in &formula.deprecated_options {
            println!("--{} {} --{}", d.old, "→".dimmed(), d.new);
        }
    }

    Ok(())
}
