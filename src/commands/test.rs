use crate::engine::Engine;
use crate::error::Result;
use colored::Colorize;

pub async fn test(engine: &Engine, formula: &str) -> Result<()> {
    println!("Testing {}...", formula.cyan());
    let passed = engine.test(formula).await?;
    if passed == 0 {
        println!("{} {} has no test commands", "!".yellow(), formula.bold());
    } else {
        println!(
            "{} {}: {} test {} passed",
            "✓".green(),
            formula.bold(),
            passed,
            if passed == 1 { "command" } else { "commands" }
        );
    }
    Ok(())
}
