use super::utils::print_caveats;
use crate::engine::Engine;
use crate::error::Result;
use colored::Colorize;

pub async fn postinstall(engine: &Engine, formula: &str) -> Result<()> {
    let report = engine.post_install(formula).await?;

    println!(
        "{} {}: {} post-install steps, {} changed",
        "✓".green(),
        formula.bold(),
        report.steps,
        report.changed
    );
    if let Some(caveats) = &report.caveats {
        print_caveats(formula, caveats);
    }
    Ok(())
}
