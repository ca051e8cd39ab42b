// Planning tests: option resolution and dependency ordering against formula
// documents loaded from disk

mod test_helpers;

use kegworks::engine::Engine;
use kegworks::error::KegError;
use kegworks::options::BuildOptions;
use kegworks::registry::Registry;
use kegworks::resolve::PlanBuilder;
use std::sync::Arc;
use test_helpers::{TestEnvironment, linux, macos};

fn flags(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// A requires B and optionally C behind `with-c`.
fn abc(env: &TestEnvironment) {
    env.write_simple("b", &[]);
    env.write_simple("c", &[]);
    env.write_formula(
        "a",
        r#"{
            "name": "a",
            "version": "2.0",
            "dependencies": [
                { "name": "b" },
                { "name": "c", "kind": "optional" }
            ]
        }"#,
    );
}

#[test]
fn test_required_dependency_only_by_default() {
    let env = TestEnvironment::new();
    abc(&env);
    let (plan, _) = env.engine().plan("a", &[]).unwrap();
    assert_eq!(plan.names(), vec!["b", "a"]);
    assert!(plan.get("a").unwrap().requested);
    assert!(!plan.get("b").unwrap().requested);
}

#[test]
fn test_optional_dependency_with_flag() {
    let env = TestEnvironment::new();
    abc(&env);
    let (plan, _) = env.engine().plan("a", &flags(&["--with-c"])).unwrap();
    let names = plan.names();
    assert_eq!(names.len(), 3);
    assert_eq!(names.last(), Some(&"a"));
    assert!(names.contains(&"b") && names.contains(&"c"));
    assert!(plan.is_well_ordered());
}

#[test]
fn test_unknown_flag_aborts_before_planning() {
    let env = TestEnvironment::new();
    abc(&env);
    let err = env.engine().plan("a", &flags(&["--with-d"])).unwrap_err();
    assert!(matches!(err, KegError::UnrecognizedOption { .. }));
    assert!(err.is_structural());
    assert!(!env.prefix.join("Cellar").exists());
}

#[test]
fn test_recommended_dependency_can_be_dropped() {
    let env = TestEnvironment::new();
    env.write_simple("readline", &[]);
    env.write_formula(
        "py",
        r#"{
            "name": "py",
            "version": "3.6.4",
            "dependencies": [{ "name": "readline", "kind": "recommended" }]
        }"#,
    );
    let engine = env.engine();
    assert_eq!(engine.plan("py", &[]).unwrap().0.names(), vec!["readline", "py"]);
    assert_eq!(
        engine
            .plan("py", &flags(&["--without-readline"]))
            .unwrap()
            .0
            .names(),
        vec!["py"]
    );
}

#[test]
fn test_platform_gated_dependency() {
    let env = TestEnvironment::new();
    env.write_simple("tcl-tk", &[]);
    env.write_formula(
        "py",
        r#"{
            "name": "py",
            "version": "3.6.4",
            "dependencies": [{ "name": "tcl-tk", "when": { "os": "macos" } }]
        }"#,
    );

    let on_linux = env.engine();
    assert_eq!(on_linux.plan("py", &[]).unwrap().0.names(), vec!["py"]);

    let on_mac = Engine::with_platform(env.settings(), env.registry(), macos());
    assert_eq!(on_mac.plan("py", &[]).unwrap().0.names(), vec!["tcl-tk", "py"]);
}

#[test]
fn test_deprecated_flag_reported() {
    let env = TestEnvironment::new();
    env.write_formula(
        "py",
        r#"{
            "name": "py",
            "version": "3.6.4",
            "options": [{ "name": "with-quicktest", "description": "Run a faster test suite" }],
            "deprecated_options": [{ "old": "quicktest", "new": "with-quicktest" }]
        }"#,
    );
    let (plan, deprecations) = env.engine().plan("py", &flags(&["--quicktest"])).unwrap();
    assert_eq!(deprecations.len(), 1);
    assert_eq!(deprecations[0].new, "with-quicktest");
    assert!(plan.get("py").unwrap().options.is_on("with-quicktest"));
}

#[test]
fn test_cycle_returns_no_plan() {
    let env = TestEnvironment::new();
    env.write_simple("x", &["y"]);
    env.write_simple("y", &["z"]);
    env.write_simple("z", &["x"]);
    env.write_simple("w", &["x"]);

    match env.engine().plan("w", &[]) {
        Err(KegError::CyclicDependency { cycle }) => {
            assert_eq!(cycle.first(), cycle.last());
            assert!(cycle.len() == 4);
            for name in ["x", "y", "z"] {
                assert!(cycle.iter().any(|c| c == name));
            }
        }
        other => panic!("expected a cycle, got {:?}", other.map(|(p, _)| p.names().len())),
    }
}

#[test]
fn test_missing_system_requirement() {
    let env = TestEnvironment::new();
    env.write_formula(
        "sonar",
        r#"{
            "name": "sonar",
            "version": "7.0",
            "dependencies": [{ "name": "java", "system": true, "version": "1.8+" }]
        }"#,
    );

    let engine = env.engine().with_probe(Arc::new(|_: &str| false));
    match engine.plan("sonar", &[]) {
        Err(KegError::UnsatisfiedDependency { formula, dependency }) => {
            assert_eq!(formula, "sonar");
            assert_eq!(dependency, "java");
        }
        other => panic!("unexpected: {:?}", other.map(|(p, _)| p.len())),
    }

    let engine = env.engine().with_probe(Arc::new(|name: &str| name == "java"));
    assert_eq!(engine.plan("sonar", &[]).unwrap().0.names(), vec!["sonar"]);
}

/// Layered graphs where every node depends on a spread of nodes from the
/// layers below; the plan must always respect every edge.
#[test]
fn test_layered_graphs_are_well_ordered() {
    let platform = linux();
    for (layers, width) in [(2, 3), (4, 5), (6, 8)] {
        let mut formulae = Vec::new();
        for layer in 0..layers {
            for i in 0..width {
                let deps: Vec<String> = if layer == 0 {
                    vec![]
                } else {
                    (0..width)
                        .filter(|j| (i + j + layer) % 3 != 0)
                        .map(|j| format!(r#"{{ "name": "n{}_{}" }}"#, (i + j) % layer, j))
                        .collect()
                };
                formulae.push(
                    kegworks::Formula::from_json(&format!(
                        r#"{{ "name": "n{}_{}", "version": "1", "dependencies": [{}] }}"#,
                        layer,
                        i,
                        deps.join(", ")
                    ))
                    .unwrap(),
                );
            }
        }
        let registry = Registry::from_formulae(formulae).unwrap();
        let roots: Vec<(String, BuildOptions)> = (0..width)
            .map(|i| (format!("n{}_{}", layers - 1, i), BuildOptions::default()))
            .collect();
        let plan = PlanBuilder::new(&registry, &platform)
            .build_all(&roots)
            .unwrap();
        assert!(plan.is_well_ordered(), "{} layers x {}", layers, width);

        for entry in plan.iter() {
            let pos = plan.position(&entry.name).unwrap();
            for dep in &entry.dependencies {
                assert!(plan.position(&dep.name).unwrap() < pos);
            }
        }
    }
}
