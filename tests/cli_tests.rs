// CLI tests: drive the keg binary against an isolated prefix

mod test_helpers;

use std::process::{Command, Output};
use test_helpers::TestEnvironment;

fn keg(env: &TestEnvironment, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_keg"))
        .args(args)
        .env("KEG_PREFIX", &env.prefix)
        .env("KEG_CACHE", &env.cache)
        .env("KEG_FORMULA_PATH", &env.formulae)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to run keg")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn with_option(env: &TestEnvironment) {
    env.write_simple("lib", &[]);
    env.write_simple("extra", &[]);
    env.write_formula(
        "app",
        r#"{
            "name": "app",
            "version": "2.1",
            "desc": "Example application",
            "options": [{ "name": "with-docs", "description": "Build the manual" }],
            "dependencies": [
                { "name": "lib" },
                { "name": "extra", "kind": "optional" }
            ],
            "install": [
                { "action": "write", "path": "{bin}/app", "content": "app" },
                { "action": "write", "path": "{doc}/manual.txt", "content": "manual",
                  "when": { "with": "docs" } }
            ],
            "caveats": [{ "text": "Run app from {opt_bin}" }]
        }"#,
    );
}

#[test]
fn test_options_lists_declared_and_implicit() {
    let env = TestEnvironment::new();
    with_option(&env);
    let output = keg(&env, &["options", "app"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("--with-docs"));
    assert!(out.contains("Build the manual"));
    assert!(out.contains("--with-extra"));
}

#[test]
fn test_install_with_option() {
    let env = TestEnvironment::new();
    with_option(&env);
    let output = keg(&env, &["install", "app", "--with-docs"]);
    assert!(output.status.success(), "{}", stderr(&output));

    let out = stdout(&output);
    assert!(out.contains("Installing app 2.1 (--with-docs) with 1 dependency: lib"));
    assert!(out.contains("Caveats"));
    assert!(out.contains(&format!("Run app from {}", env.path("opt/app/bin").display())));

    assert!(env.path("bin/app").exists());
    assert!(env.keg("app", "2.1").join("share/doc/app/manual.txt").exists());
    assert!(!env.keg("extra", "1.0").exists());
}

#[test]
fn test_unknown_option_fails_without_building() {
    let env = TestEnvironment::new();
    with_option(&env);
    let output = keg(&env, &["install", "app", "--with-doc"]);
    assert!(!output.status.success());
    let err = stderr(&output);
    assert!(err.contains("Unrecognized option"));
    assert!(err.contains("--with-docs"));
    assert!(!env.prefix.join("Cellar").exists());
}

#[test]
fn test_dry_run_builds_nothing() {
    let env = TestEnvironment::new();
    with_option(&env);
    let output = keg(&env, &["install", "--dry-run", "app"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("Dry run"));
    assert!(!env.prefix.join("Cellar").exists());
}

#[test]
fn test_failed_build_exits_non_zero_with_output() {
    let env = TestEnvironment::new();
    env.write_formula(
        "broken",
        r#"{
            "name": "broken",
            "version": "0.1",
            "install": [
                { "action": "run", "program": "sh", "args": ["-c", "echo 'configure: error: no compiler'; exit 1"] }
            ]
        }"#,
    );
    let output = keg(&env, &["install", "--cleanup-failed", "broken"]);
    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(err.contains("broken: install step 1"));
    assert!(err.contains("configure: error: no compiler"));
    assert!(!env.keg("broken", "0.1").exists());
}

#[test]
fn test_deps_tree() {
    let env = TestEnvironment::new();
    with_option(&env);
    let output = keg(&env, &["deps", "--tree", "app", "--with-extra"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("├── lib"));
    assert!(out.contains("└── extra"));
}

#[test]
fn test_info_and_test_commands() {
    let env = TestEnvironment::new();
    env.write_formula(
        "hello",
        r##"{
            "name": "hello",
            "version": "2.10",
            "desc": "Program providing model for GNU coding standards",
            "install": [
                { "action": "write", "path": "{bin}/hello", "content": "#!/bin/sh\necho 'Hello, world!'\n" },
                { "action": "run", "program": "chmod", "args": ["+x", "{bin}/hello"] }
            ],
            "test": [{ "program": "{opt_bin}/hello", "expect_output": "Hello, world!" }]
        }"##,
    );

    let info = keg(&env, &["info", "hello"]);
    assert!(info.status.success());
    assert!(stdout(&info).contains("Not installed"));

    let failed = keg(&env, &["test", "hello"]);
    assert!(!failed.status.success());
    assert!(stderr(&failed).contains("hello is not installed"));

    assert!(keg(&env, &["install", "hello"]).status.success());
    let passed = keg(&env, &["test", "hello"]);
    assert!(passed.status.success(), "{}", stderr(&passed));
    assert!(stdout(&passed).contains("1 test command passed"));

    let info = keg(&env, &["info", "hello"]);
    assert!(stdout(&info).contains(&env.keg("hello", "2.10").display().to_string()));
}

#[test]
fn test_unknown_formula_suggests() {
    let env = TestEnvironment::new();
    env.write_simple("python", &[]);
    let output = keg(&env, &["info", "pyhton"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("did you mean `python`?"));
}

#[test]
fn test_completions() {
    let env = TestEnvironment::new();
    let output = keg(&env, &["completions", "bash"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("keg"));
}
