use super::utils::{header, print_caveats, print_failure};
use crate::engine::{CancelToken, Engine, Outcome, PlanObserver};
use crate::error::Result;
use crate::progress::PlanProgress;
use crate::resolve::InstallPlan;
use colored::Colorize;
use std::sync::Arc;
use std::time::Instant;

/// Flags of `keg install`
#[derive(Debug, Clone, Default)]
pub struct InstallArgs {
    pub formula: String,
    pub flags: Vec<String>,
    pub force: bool,
    pub dry_run: bool,
}

/// Plan and build `args.formula`. Returns whether every formula in the plan
/// ended up installed.
pub async fn install(engine: &Engine, args: &InstallArgs, cancel: CancelToken) -> Result<bool> {
    let (plan, deprecations) = engine.plan(&args.formula, &args.flags)?;
    for d in &deprecations {
        println!(
            "{} --{} is deprecated; using --{}",
            "Warning:".yellow().bold(),
            d.old,
            d.new
        );
    }

    print_plan(&plan);
    if args.dry_run {
        println!("{}", "Dry run: nothing was built".dimmed());
        return Ok(true);
    }

    let start = Instant::now();
    let observer: Arc<dyn PlanObserver> = Arc::new(PlanProgress::new());
    let report = engine.install(&plan, args.force, observer, cancel).await;

    for (name, outcome) in &report.outcomes {
        if let Outcome::Installed {
            caveats: Some(text),
            ..
        } = outcome
        {
            print_caveats(name, text);
        }
    }

    for (_, err) in report.failures() {
        print_failure(err);
    }

    let installed = report.count(|o| matches!(o, Outcome::Installed { .. }));
    let present = report.count(|o| matches!(o, Outcome::AlreadyInstalled { .. }));
    let failed = report.count(|o| matches!(o, Outcome::Failed(_)));
    let skipped = report.count(|o| matches!(o, Outcome::Skipped { .. }));
    let cancelled = report.count(|o| matches!(o, Outcome::Cancelled));

    let mut summary = vec![format!("{} installed", installed)];
    if present > 0 {
        summary.push(format!("{} already installed", present));
    }
    if failed > 0 {
        summary.push(format!("{} failed", failed).red().to_string());
    }
    if skipped > 0 {
        summary.push(format!("{} skipped", skipped).yellow().to_string());
    }
    if cancelled > 0 {
        summary.push(format!("{} cancelled", cancelled).yellow().to_string());
    }

    let elapsed = start.elapsed().as_secs_f64();
    let mark = if report.is_success() {
        "✓".green()
    } else {
        "✗".red()
    };
    println!("{} {} in {:.1}s", mark, summary.join(", "), elapsed);

    Ok(report.is_success())
}

fn print_plan(plan: &InstallPlan) {
    let deps: Vec<&str> = plan
        .iter()
        .filter(|e| !e.requested)
        .map(|e| e.name.as_str())
        .collect();
    let roots: Vec<String> = plan
        .iter()
        .filter(|e| e.requested)
        .map(|e| {
            let used = e.options.used();
            if used.is_empty() {
                format!("{} {}", e.name, e.version)
            } else {
                format!("{} {} ({})", e.name, e.version, used.join(" "))
            }
        })
        .collect();

    if deps.is_empty() {
        header(&format!("Installing {}", roots.join(", ")));
    } else {
        header(&format!(
            "Installing {} with {} {}: {}",
            roots.join(", "),
            deps.len(),
            if deps.len() == 1 {
                "dependency"
            } else {
                "dependencies"
            },
            deps.join(", ")
        ));
    }
}
