//! Run-level tests for full generate-execute-retry lifecycles.
//!
//! These drive `start_run` end to end with scripted backends to verify
//! feedback threading, budget exhaustion and the persisted artifacts of a
//! run (iteration records, install ledger, final report).

use std::fs;

use redgreen::core::state::Stage;
use redgreen::io::config::EngineConfig;
use redgreen::io::sandbox::NO_COVERAGE_INFO;
use redgreen::run::start_run;
use redgreen::test_support::{
    ScriptedGenerator, ScriptedPackageManager, ScriptedSandbox, failing_execution,
    passing_execution,
};

const TEST_RESPONSE: &str = "```python\n# test_stack.py\nimport pytest\n\ndef test_push_pop():\n    from src.stack import Stack\n    s = Stack()\n    s.push(1)\n    assert s.pop() == 1\n```";
const CODE_RESPONSE: &str = "```python\n# stack.py\nclass Stack:\n    def __init__(self):\n        self.items = []\n\n    def push(self, item):\n        self.items.append(item)\n\n    def pop(self):\n        return self.items.pop()\n```";

fn config(projects_dir: &std::path::Path, max_iterations: u32) -> EngineConfig {
    EngineConfig {
        max_iterations,
        projects_dir: projects_dir.display().to_string(),
        ..EngineConfig::default()
    }
}

fn manager() -> ScriptedPackageManager {
    ScriptedPackageManager::new().with_standard(&["pytest", "src"])
}

/// First-iteration success: design, implement, execute green, refactor.
/// Three collaborator calls, one sandbox run.
#[test]
fn first_iteration_success_runs_the_refactor_pass() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = config(temp.path(), 3);
    let generator = ScriptedGenerator::new(vec![
        TEST_RESPONSE.to_string(),
        CODE_RESPONSE.to_string(),
        // Refactoring revision for the side pass.
        CODE_RESPONSE.to_string(),
    ]);
    let sandbox = ScriptedSandbox::new(vec![passing_execution()]);

    let report = start_run("a stack", None, &cfg, &generator, &sandbox, manager()).expect("run");

    assert!(report.succeeded);
    assert_eq!(report.final_stage, Stage::Succeeded);
    assert_eq!(report.iterations.len(), 1);
    assert!(report.iterations[0].succeeded);
    assert_eq!(report.coverage, "TOTAL 20 0 100%");
    assert_eq!(generator.prompts().len(), 3);
    assert_eq!(
        report.artifact_files,
        vec!["src/stack.py".to_string(), "tests/test_stack.py".to_string()]
    );
}

/// A failing first iteration threads its analysis feedback into the second
/// iteration's prompts, and the second's pass ends the run.
#[test]
fn failure_feedback_threads_into_the_next_iteration() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = config(temp.path(), 2);
    let generator = ScriptedGenerator::new(vec![
        // Iteration 1: design, implement, analyze (fails).
        TEST_RESPONSE.to_string(),
        CODE_RESPONSE.to_string(),
        "pop returns None instead of the pushed item".to_string(),
        // Iteration 2: design, implement. Final budget, so no refactor.
        TEST_RESPONSE.to_string(),
        CODE_RESPONSE.to_string(),
    ]);
    let sandbox = ScriptedSandbox::new(vec![
        failing_execution("AssertionError: assert None == 1"),
        passing_execution(),
    ]);

    let report = start_run("a stack", None, &cfg, &generator, &sandbox, manager()).expect("run");

    assert!(report.succeeded);
    assert_eq!(report.iterations.len(), 2);
    assert!(!report.iterations[0].succeeded);
    assert!(report.iterations[1].succeeded);

    let prompts = generator.prompts();
    assert_eq!(prompts.len(), 5);
    // The analysis text from iteration 1 reaches iteration 2's prompts.
    assert!(prompts[3].contains("pop returns None instead of the pushed item"));
    assert!(prompts[4].contains("pop returns None instead of the pushed item"));
}

/// Every iteration failing exhausts the budget; the report still
/// enumerates the full history and the exit state is `Exhausted`.
#[test]
fn exhausted_budget_reports_every_iteration() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = config(temp.path(), 2);
    let generator = ScriptedGenerator::new(vec![
        TEST_RESPONSE.to_string(),
        CODE_RESPONSE.to_string(),
        "first failure analysis".to_string(),
        TEST_RESPONSE.to_string(),
        CODE_RESPONSE.to_string(),
        "second failure analysis".to_string(),
    ]);
    let sandbox = ScriptedSandbox::new(vec![
        failing_execution("AssertionError"),
        failing_execution("AssertionError"),
    ]);

    let report = start_run("a stack", None, &cfg, &generator, &sandbox, manager()).expect("run");

    assert!(!report.succeeded);
    assert_eq!(report.final_stage, Stage::Exhausted);
    assert_eq!(report.iterations.len(), 2);
    assert!(report.iterations.iter().all(|i| !i.succeeded));
    // Artifacts survive exhaustion for inspection.
    assert_eq!(report.artifact_files.len(), 2);
}

/// A response with no extractable code soft-fails the iteration without
/// touching the sandbox, then the retry succeeds.
#[test]
fn unextractable_response_soft_fails_then_recovers() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = config(temp.path(), 2);
    let generator = ScriptedGenerator::new(vec![
        "I would suggest writing some tests first.".to_string(),
        TEST_RESPONSE.to_string(),
        CODE_RESPONSE.to_string(),
    ]);
    let sandbox = ScriptedSandbox::new(vec![passing_execution()]);

    let report = start_run("a stack", None, &cfg, &generator, &sandbox, manager()).expect("run");

    assert!(report.succeeded);
    assert_eq!(report.iterations.len(), 2);
    assert!(report.iterations[0].execution.is_none());
    assert!(report.iterations[0].feedback.contains("no extractable test files"));
    // The soft failure left nothing to execute against.
    assert_eq!(sandbox.executed_in().len(), 1);
}

/// The work directory holds the run's durable artifacts: per-iteration
/// records, the install ledger and the final report.
#[test]
fn run_artifacts_are_persisted_to_the_work_dir() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = config(temp.path(), 1);
    let generator = ScriptedGenerator::new(vec![
        TEST_RESPONSE.to_string(),
        CODE_RESPONSE.to_string(),
    ]);
    let sandbox = ScriptedSandbox::new(vec![passing_execution()]);

    let report = start_run("a stack", None, &cfg, &generator, &sandbox, manager()).expect("run");

    let work_dir = std::path::Path::new(&report.work_dir);
    assert!(work_dir.join("iterations/1.json").is_file());
    assert!(work_dir.join("install_ledger.json").is_file());
    assert!(work_dir.join("report.json").is_file());

    let record = fs::read_to_string(work_dir.join("iterations/1.json")).expect("read record");
    assert!(record.contains("\"succeeded\": true"));
    let persisted = fs::read_to_string(work_dir.join("report.json")).expect("read report");
    assert!(persisted.contains("\"final_stage\": \"succeeded\""));
    assert!(persisted.ends_with('\n'));
}

/// An explicit project name overrides the one derived from the goal text;
/// the timestamp suffix still applies.
#[test]
fn explicit_project_name_overrides_the_derived_default() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = config(temp.path(), 1);
    let generator = ScriptedGenerator::new(vec![
        TEST_RESPONSE.to_string(),
        CODE_RESPONSE.to_string(),
    ]);
    let sandbox = ScriptedSandbox::new(vec![passing_execution()]);

    let report = start_run("a stack", Some("storage_layer"), &cfg, &generator, &sandbox, manager())
        .expect("run");

    let dir = std::path::Path::new(&report.work_dir)
        .file_name()
        .expect("work dir name")
        .to_string_lossy()
        .into_owned();
    assert!(dir.starts_with("storage_layer_"), "got work dir {dir}");
}

/// A name with a path separator would escape the projects directory and is
/// rejected before anything is created.
#[test]
fn project_name_with_a_separator_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = config(temp.path(), 1);
    let generator = ScriptedGenerator::new(Vec::new());
    let sandbox = ScriptedSandbox::new(Vec::new());

    let err = start_run("a stack", Some("../escape"), &cfg, &generator, &sandbox, manager())
        .unwrap_err();
    assert!(err.to_string().contains("plain directory name"));
    assert_eq!(fs::read_dir(temp.path()).expect("read dir").count(), 0);
}

/// A collaborator error is fatal: the run aborts instead of recording a
/// failed iteration.
#[test]
fn collaborator_failure_aborts_the_run() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = config(temp.path(), 3);
    // Empty script: the very first respond call fails.
    let generator = ScriptedGenerator::new(Vec::new());
    let sandbox = ScriptedSandbox::new(Vec::new());

    let err = start_run("a stack", None, &cfg, &generator, &sandbox, manager()).unwrap_err();
    assert!(err.to_string().contains("test-design collaborator failed"));
}

/// No iteration reached execution, so the report carries the coverage
/// sentinel rather than a stale line.
#[test]
fn coverage_sentinel_survives_a_run_without_execution() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cfg = config(temp.path(), 1);
    let generator = ScriptedGenerator::new(vec!["nothing usable".to_string()]);
    let sandbox = ScriptedSandbox::new(Vec::new());

    let report = start_run("a stack", None, &cfg, &generator, &sandbox, manager()).expect("run");

    assert!(!report.succeeded);
    assert_eq!(report.coverage, NO_COVERAGE_INFO);
}
