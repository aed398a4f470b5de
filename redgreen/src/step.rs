//! Orchestration of a single test-first iteration.
//!
//! [`run_iteration`] drives one Planning → Testing → Implementing →
//! Executing → Analyzing pass, performing the side effects each
//! transition of [`crate::core::state`] implies. All subprocess seams
//! (collaborator, sandbox, package manager) come in behind traits so the
//! whole pass can run scripted in tests.

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::core::extract::extract_artifacts;
use crate::core::state::{Event, Stage, advance};
use crate::core::types::{Artifact, ExecutionResult, Iteration};
use crate::io::deps::{DependencyResolver, PackageManager};
use crate::io::generator::Generator;
use crate::io::prompt::PromptEngine;
use crate::io::sandbox::Sandbox;
use crate::io::workspace::Workspace;

/// Result of one iteration: the immutable record plus the stage the
/// machine ended in (`Succeeded` or `Retrying`).
#[derive(Debug)]
pub struct IterationOutcome {
    pub iteration: Iteration,
    pub stage: Stage,
}

/// Execute one full iteration against the work directory.
///
/// `feedback` is the analysis text carried over from the previous failed
/// iteration, threaded into both generation prompts. `iterations_left`
/// decides whether a passing iteration earns the refactoring side pass.
#[instrument(skip_all, fields(index, iterations_left))]
pub fn run_iteration<G: Generator, S: Sandbox, P: PackageManager>(
    goal: &str,
    feedback: Option<&str>,
    index: u32,
    iterations_left: bool,
    generator: &G,
    sandbox: &S,
    resolver: &mut DependencyResolver<P>,
    workspace: &Workspace,
    prompts: &PromptEngine,
) -> Result<IterationOutcome> {
    let mut stage = advance(Stage::Planning, Event::Start)?;

    // Red: design the test suite first.
    let prompt = prompts.design_tests(goal, feedback)?;
    let response = generator
        .respond(&prompt)
        .context("test-design collaborator failed")?;
    let tests = extract_artifacts(&response).tests;
    stage = advance(stage, Event::TestsDesigned { count: tests.len() })?;
    if stage == Stage::Retrying {
        // Soft failure: nothing extractable, so nothing to execute.
        warn!(index, "no test artifacts extracted, skipping to retry");
        let iteration = Iteration {
            index,
            tests,
            code: Vec::new(),
            execution: None,
            succeeded: false,
            feedback: "the previous response contained no extractable test files; \
reply with fenced python blocks only"
                .to_string(),
            created_at: Utc::now(),
        };
        return Ok(IterationOutcome { iteration, stage });
    }
    workspace.write_artifacts(&tests)?;
    resolve_imports(resolver, &tests);

    // Green: implement against the persisted tests.
    let prompt = prompts.implement(goal, &join_sources(&tests), feedback)?;
    let response = generator
        .respond(&prompt)
        .context("implementation collaborator failed")?;
    let code = extract_artifacts(&response).code;
    workspace.write_artifacts(&code)?;
    resolve_imports(resolver, &code);
    stage = advance(stage, Event::CodeWritten)?;

    let mut execution = sandbox.execute(workspace.root())?;
    // A missing-module failure may be installable; if it was, the verdict
    // of this iteration is the re-run, not the import error.
    if !execution.passed && resolver.handle_failure_output(&execution.output) {
        info!(index, "re-running suite after dependency self-heal");
        execution = sandbox.execute(workspace.root())?;
    }
    stage = advance(stage, Event::Executed)?;

    let passed = execution.passed;
    let feedback = if passed {
        format!("all tests passed ({})", execution.coverage)
    } else {
        let prompt = prompts.analyze(goal, &execution.output, &execution.coverage)?;
        generator
            .respond(&prompt)
            .context("analysis collaborator failed")?
            .trim()
            .to_string()
    };
    stage = advance(
        stage,
        Event::Analyzed {
            passed,
            iterations_left,
        },
    )?;

    if stage == Stage::Refactoring {
        if let Err(err) = refactor_pass(goal, generator, workspace, prompts, &execution) {
            // The suite already passed; a failed polish pass never fails
            // the iteration.
            warn!(err = %err, index, "refactoring pass failed, keeping green state");
        }
        stage = advance(stage, Event::RefactorFinished)?;
    }

    info!(index, passed, final_stage = ?stage, "iteration finished");
    let iteration = Iteration {
        index,
        tests,
        code,
        execution: Some(execution),
        succeeded: passed,
        feedback,
        created_at: Utc::now(),
    };
    Ok(IterationOutcome { iteration, stage })
}

/// Behaviour-preserving polish on a green suite. Revised modules are
/// written over the originals; the suite is not re-run for this side pass.
fn refactor_pass<G: Generator>(
    goal: &str,
    generator: &G,
    workspace: &Workspace,
    prompts: &PromptEngine,
    execution: &ExecutionResult,
) -> Result<()> {
    let prompt = prompts.refactor(goal, &workspace.read_source()?, &execution.coverage)?;
    let response = generator
        .respond(&prompt)
        .context("refactoring collaborator failed")?;
    let revised = extract_artifacts(&response).code;
    if revised.is_empty() {
        info!("refactoring pass proposed no revisions");
        return Ok(());
    }
    workspace.write_artifacts(&revised)?;
    info!(files = revised.len(), "wrote refactored modules");
    Ok(())
}

fn resolve_imports<P: PackageManager>(resolver: &mut DependencyResolver<P>, artifacts: &[Artifact]) {
    for artifact in artifacts {
        let results = resolver.resolve_from_source(&artifact.source);
        for (module, installed) in results {
            if !installed {
                warn!(module, file = %artifact.file_name, "dependency unresolved before execution");
            }
        }
    }
}

fn join_sources(artifacts: &[Artifact]) -> String {
    artifacts
        .iter()
        .map(|a| format!("# {}\n{}", a.file_name, a.source))
        .collect::<Vec<_>>()
        .join("\n\n")
}
