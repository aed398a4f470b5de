//! Multi-iteration run loop: retry until green or the budget runs out.

use std::path::Path;

use anyhow::{Context, Result, ensure};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument};

use crate::core::state::{Event, Stage, advance};
use crate::core::types::Iteration;
use crate::io::config::EngineConfig;
use crate::io::deps::{DependencyResolver, PackageManager};
use crate::io::generator::Generator;
use crate::io::prompt::PromptEngine;
use crate::io::sandbox::{NO_COVERAGE_INFO, Sandbox};
use crate::io::workspace::{Workspace, write_json};
use crate::step::run_iteration;

/// Final summary of a run, persisted as `report.json` in the work
/// directory.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub goal: String,
    pub work_dir: String,
    pub succeeded: bool,
    pub max_iterations: u32,
    pub final_stage: Stage,
    /// Full per-iteration history, in order; never longer than the budget.
    pub iterations: Vec<Iteration>,
    /// Coverage line of the last executed suite, or the sentinel when no
    /// iteration reached execution.
    pub coverage: String,
    pub artifact_files: Vec<String>,
    pub finished_at: DateTime<Utc>,
}

/// Run the full generate-execute-analyze loop for `goal`.
///
/// `name` overrides the project name derived from the goal text; the work
/// directory is `<name>_<timestamp>` either way.
///
/// Returns `Err` only for infrastructure failure (collaborator, work
/// directory, sandbox spawn). An exhausted budget is a normal result with
/// `succeeded == false`.
#[instrument(skip_all, fields(goal_bytes = goal.len()))]
pub fn start_run<G: Generator, S: Sandbox, P: PackageManager>(
    goal: &str,
    name: Option<&str>,
    cfg: &EngineConfig,
    generator: &G,
    sandbox: &S,
    manager: P,
) -> Result<RunReport> {
    cfg.validate()?;
    let name = match name {
        Some(explicit) => {
            ensure!(
                !explicit.is_empty() && !explicit.contains(['/', '\\']),
                "project name must be a plain directory name, got {explicit:?}"
            );
            explicit.to_string()
        }
        None => project_name(goal),
    };
    let workspace = Workspace::create(Path::new(&cfg.projects_dir), &name)?;
    let mut resolver = DependencyResolver::new(
        manager,
        &cfg.safe_packages,
        cfg.auto_install,
        workspace.manifest_path(),
    );
    let prompts = PromptEngine::new();

    let mut feedback: Option<String> = None;
    let mut coverage = NO_COVERAGE_INFO.to_string();
    let mut history: Vec<Iteration> = Vec::new();
    let mut final_stage = Stage::Planning;

    for index in 1..=cfg.max_iterations {
        let iterations_left = index < cfg.max_iterations;
        info!(index, max_iterations = cfg.max_iterations, "starting iteration");

        let outcome = run_iteration(
            goal,
            feedback.as_deref(),
            index,
            iterations_left,
            generator,
            sandbox,
            &mut resolver,
            &workspace,
            &prompts,
        )?;
        if let Some(execution) = &outcome.iteration.execution {
            coverage = execution.coverage.clone();
        }
        workspace.write_iteration(&outcome.iteration)?;

        feedback = Some(outcome.iteration.feedback.clone());
        history.push(outcome.iteration);
        if outcome.stage == Stage::Succeeded {
            final_stage = outcome.stage;
            break;
        }
        final_stage = advance(outcome.stage, Event::NextIteration { iterations_left })?;
    }

    write_json(&workspace.ledger_path(), &resolver.ledger().to_vec())
        .context("persist install ledger")?;

    let report = RunReport {
        goal: goal.to_string(),
        work_dir: workspace.root().display().to_string(),
        succeeded: final_stage == Stage::Succeeded,
        max_iterations: cfg.max_iterations,
        final_stage,
        iterations: history,
        coverage,
        artifact_files: workspace.artifact_files()?,
        finished_at: Utc::now(),
    };
    write_json(&workspace.report_path(), &report).context("persist run report")?;
    info!(
        succeeded = report.succeeded,
        iterations_used = report.iterations.len(),
        work_dir = %report.work_dir,
        "run finished"
    );
    Ok(report)
}

/// Derive a filesystem-friendly project name from the goal text: the
/// first few words, lowercased, joined by underscores.
pub fn project_name(goal: &str) -> String {
    let name = goal
        .split_whitespace()
        .take(4)
        .map(|word| {
            word.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join("_");
    if name.is_empty() {
        "project".to_string()
    } else {
        name
    }
}
