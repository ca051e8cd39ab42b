//! Post-install hooks and caveats.
//!
//! Post-install steps run after a keg is linked and may be re-run at any time
//! (`keg postinstall`). Load-time validation only admits actions that are
//! no-ops on an already-correct tree, so a second run changes nothing.

use crate::context::BuildContext;
use crate::error::Result;
use crate::executor::{self, Phase};
use crate::formula::Formula;
use crate::predicate::holds;
use tracing::debug;

/// What a post-install run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostInstallReport {
    /// Active steps that ran
    pub steps: usize,
    /// Steps that changed the filesystem
    pub changed: usize,
    pub caveats: Option<String>,
}

/// Run the post-install steps of `formula` and render its caveats.
pub async fn run_post_install(formula: &Formula, ctx: &BuildContext) -> Result<PostInstallReport> {
    let steps = formula.active_post_install_steps(&ctx.scope());
    let mut changed = 0;

    for (index, step) in &steps {
        if executor::run_step(ctx, Phase::PostInstall, *index, &step.action).await? {
            changed += 1;
        }
    }

    debug!(
        "{}: post-install ran {} steps, {} changed",
        ctx.name,
        steps.len(),
        changed
    );

    Ok(PostInstallReport {
        steps: steps.len(),
        changed,
        caveats: caveats(formula, ctx),
    })
}

/// Caveat sections that apply to this build, expanded and joined.
pub fn caveats(formula: &Formula, ctx: &BuildContext) -> Option<String> {
    let scope = ctx.scope();
    let sections: Vec<String> = formula
        .caveats
        .iter()
        .filter(|c| holds(c.when.as_ref(), &scope))
        .map(|c| ctx.expand(c.text.trim_end()))
        .filter(|text| !text.is_empty())
        .collect();

    if sections.is_empty() {
        None
    } else {
        Some(sections.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cellar::Layout;
    use crate::options::BuildOptions;
    use crate::platform::{Arch, Compiler, OsFamily, Platform};
    use std::fs;
    use tempfile::TempDir;

    const FORMULA: &str = r##"{
        "name": "py",
        "version": "3.6.4",
        "post_install": [
            { "action": "mkdir", "path": "{root}/lib/python3.6/site-packages" },
            { "action": "remove", "paths": ["{root}/lib/python3.6/site-packages/setuptools*"] },
            { "action": "write", "path": "{prefix}/lib/site-packages/sitecustomize.py",
              "content": "# written for {name}\n" },
            { "action": "symlink", "target": "{root}/lib/python3.6/site-packages",
              "link": "lib/site-packages/site" },
            { "action": "run", "program": "sh", "args": ["-c", "touch {prefix}/stamp"],
              "creates": "{prefix}/stamp" }
        ],
        "caveats": [
            { "text": "Packages go to {root}/lib/python3.6/site-packages\n" },
            { "text": "Tk support needs a separate install.", "when": { "os": "macos" } }
        ]
    }"##;

    #[tokio::test]
    async fn test_second_run_changes_nothing() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        let formula = Formula::from_json(FORMULA).unwrap();
        let ctx = BuildContext::new(
            &formula,
            BuildOptions::default(),
            Platform::new(OsFamily::Linux, Arch::X86_64, Compiler::Gcc),
            &layout,
        );
        fs::create_dir_all(&ctx.paths.prefix).unwrap();
        let stale = tmp.path().join("lib/python3.6/site-packages/setuptools-1.0");
        fs::create_dir_all(&stale).unwrap();

        let first = run_post_install(&formula, &ctx).await.unwrap();
        assert_eq!(first.steps, 5);
        assert_eq!(first.changed, 4);
        assert!(!stale.exists());
        assert!(ctx.paths.prefix.join("stamp").exists());

        let second = run_post_install(&formula, &ctx).await.unwrap();
        assert_eq!(second.changed, 0);
        assert_eq!(first.caveats, second.caveats);
    }

    #[test]
    fn test_caveats_follow_platform() {
        let layout = Layout::new("/p");
        let formula = Formula::from_json(FORMULA).unwrap();
        let linux = BuildContext::new(
            &formula,
            BuildOptions::default(),
            Platform::new(OsFamily::Linux, Arch::X86_64, Compiler::Gcc),
            &layout,
        );
        assert_eq!(
            caveats(&formula, &linux).as_deref(),
            Some("Packages go to /p/lib/python3.6/site-packages")
        );

        let mac = BuildContext::new(
            &formula,
            BuildOptions::default(),
            Platform::new(OsFamily::Macos, Arch::Arm64, Compiler::Clang),
            &layout,
        );
        assert!(caveats(&formula, &mac).unwrap().ends_with("separate install."));
    }

    #[tokio::test]
    async fn test_failing_hook_names_post_install_phase() {
        let tmp = TempDir::new().unwrap();
        let layout = Layout::new(tmp.path());
        let formula = Formula::from_json(
            r#"{
                "name": "hooked",
                "version": "1.0",
                "install": [{ "action": "mkdir", "path": "{prefix}/bin" }],
                "post_install": [
                    { "action": "run", "program": "false", "creates": "{prefix}/done" }
                ]
            }"#,
        )
        .unwrap();
        let ctx = BuildContext::new(
            &formula,
            BuildOptions::default(),
            Platform::new(OsFamily::Linux, Arch::X86_64, Compiler::Gcc),
            &layout,
        );
        fs::create_dir_all(&ctx.paths.prefix).unwrap();
        fs::create_dir_all(&ctx.paths.logs).unwrap();

        let err = run_post_install(&formula, &ctx).await.unwrap_err();
        assert_eq!(err.phase(), Some(Phase::PostInstall));
        assert!(
            err.to_string().starts_with("hooked: post-install step 1: `false`"),
            "{}",
            err
        );
    }
}
