//! Formula executor: runs install steps against a staged source tree.
//!
//! Steps run strictly in declared order and the first failure stops the run.
//! Nothing is rolled back; the caller owns the contaminated keg.
//!
//! Every external command gets a timeout. On expiry the whole process group
//! is killed and the step fails with [`KegError::Timeout`], carrying whatever
//! output was captured so far. Combined stdout/stderr of each command is also
//! written to `<logs>/NN.<program>.log`.

use crate::context::BuildContext;
use crate::error::{KegError, Result};
use crate::formula::{Action, Formula, TestCommand};
use crate::patch::{self, PatchFailure};
use crate::predicate::holds;
use crate::symlink::relative_path;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs;
use std::os::unix::fs as unix_fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Captured output kept in error values; full output goes to the step log.
const OUTPUT_TAIL: usize = 16 * 1024;

pub use crate::formula::Phase;

/// Relative paths in install steps resolve against the source tree,
/// in post-install steps against the keg.
fn phase_base(phase: Phase, ctx: &BuildContext) -> &Path {
    match phase {
        Phase::Install => &ctx.paths.source,
        Phase::PostInstall => &ctx.paths.prefix,
    }
}

fn log_prefix(phase: Phase) -> &'static str {
    match phase {
        Phase::Install => "",
        Phase::PostInstall => "post_install.",
    }
}

/// Run every active install step of `formula`. Returns the number of steps run.
pub async fn install(formula: &Formula, ctx: &BuildContext) -> Result<usize> {
    let steps = formula.active_install_steps(&ctx.scope());
    info!("Building {} {} ({} steps)", ctx.name, ctx.pkg_version, steps.len());

    for (index, step) in &steps {
        run_step(ctx, Phase::Install, *index, &step.action).await?;
    }

    Ok(steps.len())
}

/// Run one action. Returns whether anything was changed.
pub async fn run_step(
    ctx: &BuildContext,
    phase: Phase,
    index: usize,
    action: &Action,
) -> Result<bool> {
    debug!("{}: {} step {}: {}", ctx.name, phase, index + 1, action.describe());
    let base = phase_base(phase, ctx);

    match action {
        Action::Inreplace { file, replacements } => {
            let path = ctx.resolve_path(base, file);
            let expanded: Vec<(String, String)> = replacements
                .iter()
                .map(|r| (ctx.expand(&r.before), ctx.expand(&r.after)))
                .collect();
            let pairs: Vec<(&str, &str)> = expanded
                .iter()
                .map(|(b, a)| (b.as_str(), a.as_str()))
                .collect();
            patch::inreplace(&path, &pairs).map_err(|f| patch_error(ctx, phase, index, f))?;
            Ok(true)
        }

        Action::Patch { diff, file, strip } => {
            let text = match (diff, file) {
                (Some(text), _) => text.clone(),
                (None, Some(file)) => {
                    let dir = ctx.paths.formula_dir.as_deref().unwrap_or(base);
                    let path = ctx.resolve_path(dir, file);
                    fs::read_to_string(&path).map_err(|e| KegError::PatchApplication {
                        formula: ctx.name.clone(),
                        phase,
                        step: index,
                        file: path.clone(),
                        reason: format!("cannot read patch: {}", e),
                    })?
                }
                (None, None) => return Err(step_error(ctx, phase, index, "patch has no diff")),
            };
            let touched = patch::apply_unified_diff(base, &text, *strip)
                .map_err(|f| patch_error(ctx, phase, index, f))?;
            debug!("Patched {} files", touched.len());
            Ok(true)
        }

        Action::Run {
            program,
            args,
            env,
            cwd,
            timeout_secs,
            creates,
        } => {
            if let Some(creates) = creates {
                let guard = ctx.resolve_path(base, creates);
                if guard.symlink_metadata().is_ok() {
                    debug!("Skipping step {}: {} exists", index + 1, guard.display());
                    return Ok(false);
                }
            }

            let mut spec = CommandSpec::new(ctx, program, args, base);
            if let Some(cwd) = cwd {
                spec.cwd = ctx.resolve_path(base, cwd);
            }
            for (key, value) in env {
                spec.env.insert(key.clone(), ctx.expand(value));
            }
            if let Some(secs) = timeout_secs {
                spec.timeout = Duration::from_secs(*secs);
            }
            spec.log = Some(ctx.paths.logs.join(log_name(phase, index, &spec.program)));

            let run = spec.run().await;
            match run {
                CommandRun::Exited { code: Some(0), .. } => Ok(true),
                CommandRun::Exited { code, output } => Err(KegError::BuildCommand {
                    formula: ctx.name.clone(),
                    phase,
                    step: index,
                    command: spec.display(),
                    exit_code: code,
                    output,
                }),
                CommandRun::TimedOut { output } => Err(KegError::Timeout {
                    formula: ctx.name.clone(),
                    phase,
                    step: index,
                    command: spec.display(),
                    limit: spec.timeout,
                    output,
                }),
                CommandRun::SpawnFailed { reason } => Err(KegError::BuildCommand {
                    formula: ctx.name.clone(),
                    phase,
                    step: index,
                    command: spec.display(),
                    exit_code: None,
                    output: reason,
                }),
            }
        }

        Action::Install {
            from,
            to,
            rename,
            link,
        } => {
            let pattern = ctx.resolve_path(base, from);
            let matches = glob_paths(&pattern).map_err(|e| step_error(ctx, phase, index, e))?;
            if matches.is_empty() {
                return Err(step_error(
                    ctx,
                    phase,
                    index,
                    format!("no files match {}", pattern.display()),
                ));
            }
            if rename.is_some() && matches.len() > 1 {
                return Err(step_error(
                    ctx,
                    phase,
                    index,
                    format!("rename needs a single match, {} matched", matches.len()),
                ));
            }

            let dest_dir = ctx.resolve_path(&ctx.paths.prefix, to);
            let mut changed = false;
            for src in matches {
                let name = match rename {
                    Some(name) => PathBuf::from(ctx.expand(name)),
                    None => PathBuf::from(src.file_name().unwrap_or_default()),
                };
                let dest = dest_dir.join(name);
                let result = if *link {
                    place_symlink(&src, &dest, true)
                } else {
                    copy_into(&src, &dest)
                };
                changed |= result.map_err(|e| step_error(ctx, phase, index, e))?;
            }
            Ok(changed)
        }

        Action::Remove { paths } => {
            let mut changed = false;
            for raw in paths {
                let pattern = ctx.resolve_path(base, raw);
                for path in glob_paths(&pattern).map_err(|e| step_error(ctx, phase, index, e))? {
                    if !path.starts_with(&ctx.paths.root) && !path.starts_with(&ctx.paths.source) {
                        return Err(step_error(
                            ctx,
                            phase,
                            index,
                            format!("refusing to remove {} outside the prefix", path.display()),
                        ));
                    }
                    remove_path(&path).map_err(|e| step_error(ctx, phase, index, e))?;
                    changed = true;
                }
            }
            Ok(changed)
        }

        Action::Move { from, to } => {
            let from = ctx.resolve_path(base, from);
            let to = ctx.resolve_path(base, to);
            if from.symlink_metadata().is_err() {
                if to.symlink_metadata().is_ok() {
                    return Ok(false);
                }
                return Err(step_error(
                    ctx,
                    phase,
                    index,
                    format!("nothing to move at {}", from.display()),
                ));
            }
            ensure_parent(&to).map_err(|e| step_error(ctx, phase, index, e))?;
            fs::rename(&from, &to).map_err(|e| {
                step_error(ctx, phase, index, format!("cannot move {}: {}", from.display(), e))
            })?;
            Ok(true)
        }

        Action::Mkdir { path } => {
            let path = ctx.resolve_path(base, path);
            if path.is_dir() {
                return Ok(false);
            }
            fs::create_dir_all(&path).map_err(|e| {
                step_error(ctx, phase, index, format!("cannot create {}: {}", path.display(), e))
            })?;
            Ok(true)
        }

        Action::Write { path, content } => {
            let path = ctx.resolve_path(base, path);
            let content = ctx.expand(content);
            if fs::read(&path).is_ok_and(|existing| existing == content.as_bytes()) {
                return Ok(false);
            }
            patch::write_atomic(&path, content.as_bytes())
                .map_err(|e| step_error(ctx, phase, index, e))?;
            Ok(true)
        }

        Action::Symlink { target, link } => {
            let link = ctx.resolve_path(base, link);
            let target = PathBuf::from(ctx.expand(target));
            if link.symlink_metadata().is_ok() && fs::read_link(&link).is_err() {
                return Err(KegError::FilesystemConflict {
                    formula: ctx.name.clone(),
                    path: link,
                    owner: "an unmanaged file".to_string(),
                });
            }
            place_symlink(&target, &link, false).map_err(|e| step_error(ctx, phase, index, e))
        }
    }
}

/// Run the formula's test commands against its installed keg.
///
/// `ctx.paths.source` is used as the scratch working directory.
pub async fn run_tests(formula: &Formula, ctx: &BuildContext) -> Result<usize> {
    let scope = ctx.scope();
    let tests: Vec<&TestCommand> = formula
        .test
        .iter()
        .filter(|t| holds(t.when.as_ref(), &scope))
        .collect();

    for (index, test) in tests.iter().enumerate() {
        let mut spec = CommandSpec::new(ctx, &test.program, &test.args, &ctx.paths.source);
        spec.log = Some(ctx.paths.logs.join(format!("test.{:02}.log", index + 1)));
        let command = spec.display();

        let failed = |reason: String, output: String| KegError::TestFailed {
            formula: ctx.name.clone(),
            command: command.clone(),
            reason,
            output,
        };

        match spec.run().await {
            CommandRun::Exited { code, output } => {
                if code != Some(test.exit_code) {
                    return Err(failed(
                        format!(
                            "expected exit code {}, got {}",
                            test.exit_code,
                            code.map_or("none".to_string(), |c| c.to_string())
                        ),
                        output,
                    ));
                }
                if let Some(expected) = &test.expect_output {
                    let expected = ctx.expand(expected);
                    if !output.contains(&expected) {
                        return Err(failed(
                            format!("output does not contain {:?}", expected),
                            output,
                        ));
                    }
                }
            }
            CommandRun::TimedOut { output } => {
                return Err(failed(
                    format!("timed out after {}s", spec.timeout.as_secs()),
                    output,
                ));
            }
            CommandRun::SpawnFailed { reason } => return Err(failed(reason, String::new())),
        }
    }

    Ok(tests.len())
}

fn step_error(ctx: &BuildContext, phase: Phase, index: usize, message: impl Display) -> KegError {
    KegError::StepFailed {
        formula: ctx.name.clone(),
        phase,
        step: index,
        message: message.to_string(),
    }
}

fn patch_error(ctx: &BuildContext, phase: Phase, index: usize, failure: PatchFailure) -> KegError {
    KegError::PatchApplication {
        formula: ctx.name.clone(),
        phase,
        step: index,
        file: failure.file,
        reason: failure.reason,
    }
}

fn log_name(phase: Phase, index: usize, program: &str) -> String {
    let program = Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "cmd".to_string());
    format!("{}{:02}.{}.log", log_prefix(phase), index + 1, program)
}

/// A fully expanded external command
struct CommandSpec {
    program: String,
    args: Vec<String>,
    cwd: PathBuf,
    env: BTreeMap<String, String>,
    remove_env: Vec<String>,
    timeout: Duration,
    log: Option<PathBuf>,
}

enum CommandRun {
    Exited { code: Option<i32>, output: String },
    TimedOut { output: String },
    SpawnFailed { reason: String },
}

impl CommandSpec {
    fn new(ctx: &BuildContext, program: &str, args: &[String], cwd: &Path) -> Self {
        Self {
            program: ctx.expand(program),
            args: args.iter().map(|a| ctx.expand(a)).collect(),
            cwd: cwd.to_path_buf(),
            env: ctx.environment(),
            remove_env: ctx.removed_env().to_vec(),
            timeout: ctx.timeout,
            log: None,
        }
    }

    fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }

    async fn run(&self) -> CommandRun {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        for key in &self.remove_env {
            cmd.env_remove(key);
        }
        cmd.envs(&self.env);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return CommandRun::SpawnFailed {
                    reason: format!("failed to start {}: {}", self.program, e),
                };
            }
        };

        let captured = Arc::new(Mutex::new(Vec::new()));
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(capture(stdout, captured.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(capture(stderr, captured.clone())));
        }

        let result = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => {
                // give the pipes a moment to drain after exit
                let aborts: Vec<_> = readers.iter().map(|r| r.abort_handle()).collect();
                let drained = futures::future::join_all(readers);
                if tokio::time::timeout(Duration::from_secs(5), drained).await.is_err() {
                    aborts.iter().for_each(|a| a.abort());
                }
                Ok(status.code())
            }
            Ok(Err(e)) => Err(format!("failed to wait for {}: {}", self.program, e)),
            Err(_) => {
                warn!("{} exceeded {}s, killing", self.display(), self.timeout.as_secs());
                if let Some(pid) = child.id() {
                    kill_group(pid);
                }
                let _ = child.kill().await;
                for reader in readers {
                    reader.abort();
                }
                let output = take_output(&captured);
                self.write_log(&output, "timed out");
                return CommandRun::TimedOut {
                    output: tail(output),
                };
            }
        };

        let output = take_output(&captured);
        match result {
            Ok(code) => {
                let status = code.map_or("killed by signal".to_string(), |c| format!("exit {}", c));
                self.write_log(&output, &status);
                CommandRun::Exited {
                    code,
                    output: tail(output),
                }
            }
            Err(reason) => CommandRun::SpawnFailed { reason },
        }
    }

    fn write_log(&self, output: &str, status: &str) {
        let Some(log) = &self.log else {
            return;
        };
        let text = format!(
            "{}\ncwd: {}\n\n{}\n[{}]\n",
            self.display(),
            self.cwd.display(),
            output,
            status
        );
        let written = log
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|_| fs::write(log, text));
        if let Err(e) = written {
            warn!("Failed to write step log {}: {}", log.display(), e);
        }
    }
}

async fn capture<R: AsyncRead + Unpin>(mut reader: R, sink: Arc<Mutex<Vec<u8>>>) {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if let Ok(mut sink) = sink.lock() {
                    sink.extend_from_slice(&buf[..n]);
                }
            }
        }
    }
}

fn take_output(captured: &Arc<Mutex<Vec<u8>>>) -> String {
    captured
        .lock()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

fn tail(output: String) -> String {
    if output.len() <= OUTPUT_TAIL {
        return output;
    }
    let mut start = output.len() - OUTPUT_TAIL;
    while !output.is_char_boundary(start) {
        start += 1;
    }
    output[start..].to_string()
}

/// Kill every process in the group led by `pid`.
fn kill_group(pid: u32) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        debug!("killpg({}, SIGKILL) failed: {}", pid, e);
    }
}

fn glob_paths(pattern: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let pattern = pattern.to_string_lossy();
    let mut paths = Vec::new();
    for entry in glob::glob(&pattern)? {
        paths.push(entry?);
    }
    Ok(paths)
}

fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent),
        None => Ok(()),
    }
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    let meta = path.symlink_metadata()?;
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Create `link -> target`, replacing a different symlink. With `relative`,
/// the stored target is made relative to the link's directory.
fn place_symlink(target: &Path, link: &Path, relative: bool) -> anyhow::Result<bool> {
    let parent = link
        .parent()
        .ok_or_else(|| anyhow::anyhow!("{} has no parent", link.display()))?;
    let stored = if relative && target.is_absolute() {
        relative_path(parent, target)
    } else {
        target.to_path_buf()
    };

    match fs::read_link(link) {
        Ok(existing) if existing == stored => return Ok(false),
        Ok(_) => fs::remove_file(link)?,
        Err(_) if link.symlink_metadata().is_ok() => remove_path(link)?,
        Err(_) => {}
    }

    fs::create_dir_all(parent)?;
    unix_fs::symlink(&stored, link)?;
    Ok(true)
}

/// Copy a file, symlink or directory tree to `dest`, skipping identical files.
fn copy_into(src: &Path, dest: &Path) -> anyhow::Result<bool> {
    let mut changed = false;
    for entry in WalkDir::new(src) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(src)?;
        let target = if rel.as_os_str().is_empty() {
            dest.to_path_buf()
        } else {
            dest.join(rel)
        };
        let file_type = entry.file_type();

        if file_type.is_dir() {
            if !target.is_dir() {
                fs::create_dir_all(&target)?;
                changed = true;
            }
        } else if file_type.is_symlink() {
            changed |= place_symlink(&fs::read_link(entry.path())?, &target, false)?;
        } else {
            if fs::read(&target).is_ok_and(|existing| {
                fs::read(entry.path()).is_ok_and(|content| content == existing)
            }) {
                continue;
            }
            ensure_parent(&target)?;
            if target.symlink_metadata().is_ok() {
                remove_path(&target)?;
            }
            fs::copy(entry.path(), &target)?;
            changed = true;
        }
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cellar::Layout;
    use crate::options::BuildOptions;
    use crate::platform::Platform;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        source: PathBuf,
        layout: Layout,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("src");
        fs::create_dir_all(&source).unwrap();
        let layout = Layout::new(tmp.path().join("prefix"));
        Fixture {
            source,
            layout,
            _tmp: tmp,
        }
    }

    fn context(fx: &Fixture, formula: &Formula) -> BuildContext {
        let ctx = BuildContext::new(formula, BuildOptions::default(), Platform::detect(), &fx.layout)
            .with_source(&fx.source)
            .with_logs(fx.source.join("logs"));
        fs::create_dir_all(&ctx.paths.prefix).unwrap();
        ctx
    }

    fn formula(steps: &str) -> Formula {
        Formula::from_json(&format!(
            r#"{{ "name": "demo", "version": "1.0", "install": {} }}"#,
            steps
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let fx = fixture();
        fs::write(fx.source.join("hello.sh"), "echo @GREETING@\n").unwrap();
        let f = formula(
            r#"[
                { "action": "inreplace", "file": "hello.sh",
                  "replacements": [ { "before": "@GREETING@", "after": "hi from {name}" } ] },
                { "action": "run", "program": "sh", "args": ["-c", "sh hello.sh > out.txt"] },
                { "action": "install", "from": "out.txt", "to": "{share}", "rename": "greeting" },
                { "action": "install", "from": "hello.sh", "to": "{bin}" }
            ]"#,
        );
        let ctx = context(&fx, &f);

        assert_eq!(install(&f, &ctx).await.unwrap(), 4);
        assert_eq!(
            fs::read_to_string(ctx.paths.prefix.join("share/greeting")).unwrap(),
            "hi from demo\n"
        );
        assert!(ctx.paths.prefix.join("bin/hello.sh").exists());
        assert!(fx.source.join("logs/02.sh.log").exists());
    }

    #[tokio::test]
    async fn test_failed_command_stops_run() {
        let fx = fixture();
        let f = formula(
            r#"[
                { "action": "run", "program": "sh", "args": ["-c", "echo nope >&2; exit 3"] },
                { "action": "mkdir", "path": "{prefix}/never" }
            ]"#,
        );
        let ctx = context(&fx, &f);

        let err = install(&f, &ctx).await.unwrap_err();
        match err {
            KegError::BuildCommand {
                step,
                exit_code,
                ref output,
                ..
            } => {
                assert_eq!(step, 0);
                assert_eq!(exit_code, Some(3));
                assert!(output.contains("nope"));
            }
            other => panic!("unexpected: {other}"),
        }
        assert!(!ctx.paths.prefix.join("never").exists());
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let fx = fixture();
        let f = formula(
            r#"[ { "action": "run", "program": "sh",
                   "args": ["-c", "echo started; sleep 30"], "timeout_secs": 1 } ]"#,
        );
        let ctx = context(&fx, &f);

        let started = std::time::Instant::now();
        let err = install(&f, &ctx).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(20));
        match err {
            KegError::Timeout { limit, output, .. } => {
                assert_eq!(limit, Duration::from_secs(1));
                assert!(output.contains("started"));
            }
            other => panic!("unexpected: {other}"),
        }
    }

    /// Running and not yet a zombie awaiting its reaper.
    fn process_alive(pid: &str) -> bool {
        match fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit_once(')')
                .map(|(_, rest)| !rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_background_children() {
        let fx = fixture();
        let f = formula(
            r#"[ { "action": "run", "program": "sh",
                   "args": ["-c", "sleep 30 & echo $! > bg.pid; wait"], "timeout_secs": 1 } ]"#,
        );
        let ctx = context(&fx, &f);

        let err = install(&f, &ctx).await.unwrap_err();
        assert!(matches!(err, KegError::Timeout { .. }));

        let pid = fs::read_to_string(fx.source.join("bg.pid")).unwrap();
        let pid = pid.trim();
        let mut waited = 0;
        while process_alive(pid) && waited < 50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            waited += 1;
        }
        assert!(!process_alive(pid), "background sleep {} survived the timeout", pid);
    }

    #[tokio::test]
    async fn test_missing_program() {
        let fx = fixture();
        let f = formula(r#"[ { "action": "run", "program": "/nonexistent/tool" } ]"#);
        let ctx = context(&fx, &f);
        let err = install(&f, &ctx).await.unwrap_err();
        assert!(matches!(err, KegError::BuildCommand { exit_code: None, .. }));
    }

    #[tokio::test]
    async fn test_inreplace_failure_is_patch_error() {
        let fx = fixture();
        fs::write(fx.source.join("Makefile"), "CC=cc\n").unwrap();
        let f = formula(
            r#"[
                { "action": "mkdir", "path": "{prefix}/ok" },
                { "action": "inreplace", "file": "Makefile",
                  "replacements": [ { "before": "CC=gcc", "after": "CC=clang" } ] }
            ]"#,
        );
        let ctx = context(&fx, &f);
        let err = install(&f, &ctx).await.unwrap_err();
        assert!(matches!(err, KegError::PatchApplication { step: 1, .. }));
        assert_eq!(fs::read_to_string(fx.source.join("Makefile")).unwrap(), "CC=cc\n");
    }

    #[tokio::test]
    async fn test_creates_guard_skips() {
        let fx = fixture();
        fs::write(fx.source.join("done"), "").unwrap();
        let f = formula(r#"[ { "action": "run", "program": "false", "creates": "done" } ]"#);
        let ctx = context(&fx, &f);
        assert!(!run_step(&ctx, Phase::Install, 0, &f.install[0].action).await.unwrap());
    }

    #[tokio::test]
    async fn test_environment_reaches_commands() {
        let fx = fixture();
        let f = Formula::from_json(
            r#"{ "name": "demo", "version": "1.0",
                 "env": { "DEMO_FLAG": "{prefix}" },
                 "install": [ { "action": "run", "program": "sh",
                                "args": ["-c", "printf %s \"$DEMO_FLAG\" > flag.txt"] } ] }"#,
        )
        .unwrap();
        let ctx = context(&fx, &f);
        install(&f, &ctx).await.unwrap();
        assert_eq!(
            fs::read_to_string(fx.source.join("flag.txt")).unwrap(),
            ctx.paths.prefix.display().to_string()
        );
    }

    #[tokio::test]
    async fn test_symlink_over_real_file_conflicts() {
        let fx = fixture();
        let f = formula("[]");
        let ctx = context(&fx, &f);
        fs::write(ctx.paths.prefix.join("real"), "x").unwrap();
        let action = Action::Symlink {
            target: "elsewhere".into(),
            link: "real".into(),
        };
        let err = run_step(&ctx, Phase::PostInstall, 0, &action).await.unwrap_err();
        assert!(matches!(err, KegError::FilesystemConflict { .. }));
    }

    #[tokio::test]
    async fn test_tests_check_exit_code_and_output() {
        let fx = fixture();
        let f = Formula::from_json(
            r#"{ "name": "demo", "version": "1.0",
                 "test": [
                   { "program": "sh", "args": ["-c", "echo usage; exit 1"], "exit_code": 1,
                     "expect_output": "usage" }
                 ] }"#,
        )
        .unwrap();
        let ctx = context(&fx, &f);
        assert_eq!(run_tests(&f, &ctx).await.unwrap(), 1);

        let f = Formula::from_json(
            r#"{ "name": "demo", "version": "1.0",
                 "test": [ { "program": "sh", "args": ["-c", "echo wrong"], "expect_output": "right" } ] }"#,
        )
        .unwrap();
        let ctx = context(&fx, &f);
        assert!(matches!(
            run_tests(&f, &ctx).await,
            Err(KegError::TestFailed { .. })
        ));
    }

    #[test]
    fn test_log_name() {
        assert_eq!(log_name(Phase::Install, 0, "/usr/bin/make"), "01.make.log");
        assert_eq!(log_name(Phase::PostInstall, 9, "sh"), "post_install.10.sh.log");
    }
}
