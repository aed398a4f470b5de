//! Sandboxed execution of the generated test suite.
//!
//! The sandbox boundary (interpreter, deadline, output cap) is a
//! first-class [`SandboxConfig`] rather than an incidental detail. A
//! failing test suite is never an error here: only an inability to spawn
//! the test runner propagates as `Err`.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::core::types::ExecutionResult;
use crate::io::process::run_with_deadline;

/// Sentinel used when the test-runner output carries no coverage line.
pub const NO_COVERAGE_INFO: &str = "no coverage info";

/// Bounds of the sandboxed child process.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub python: String,
    pub deadline: Duration,
    pub output_cap: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            deadline: Duration::from_secs(30),
            output_cap: 100_000,
        }
    }
}

/// Test-suite execution backend. Scripted in tests so the iteration loop
/// can be driven without spawning interpreters.
pub trait Sandbox {
    /// Run the work directory's test suite. `Err` only for infrastructure
    /// failure (the runner cannot be spawned).
    fn execute(&self, work_dir: &Path) -> Result<ExecutionResult>;
}

/// Sandbox that spawns pytest scoped to the work directory.
pub struct PytestSandbox {
    config: SandboxConfig,
}

impl PytestSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }
}

impl Sandbox for PytestSandbox {
    #[instrument(skip_all, fields(work_dir = %work_dir.display()))]
    fn execute(&self, work_dir: &Path) -> Result<ExecutionResult> {
        let mut cmd = Command::new(&self.config.python);
        cmd.args([
            "-m",
            "pytest",
            "tests/",
            "-v",
            "--tb=short",
            "--cov=src",
            "--cov-report=term",
        ])
        .current_dir(work_dir);

        let output = run_with_deadline(cmd, None, self.config.deadline, self.config.output_cap)
            .context("run test suite")?;

        let combined = output.combined();
        let coverage = extract_coverage_summary(&combined);
        let passed = output.success();
        let error_detail = if output.timed_out {
            format!("timeout after {}s", self.config.deadline.as_secs())
        } else if passed {
            String::new()
        } else {
            output.stderr.clone()
        };

        info!(passed, timed_out = output.timed_out, "test suite finished");
        Ok(ExecutionResult {
            passed,
            output: combined,
            coverage,
            error_detail,
            duration_ms: output.duration.as_millis() as u64,
        })
    }
}

/// Pick the aggregate coverage line out of raw test-runner output: the
/// first line carrying both the percentage marker and the total marker,
/// verbatim. Absence yields [`NO_COVERAGE_INFO`] rather than a failure.
pub fn extract_coverage_summary(output: &str) -> String {
    output
        .lines()
        .find(|line| line.contains('%') && line.contains("TOTAL"))
        .unwrap_or(NO_COVERAGE_INFO)
        .to_string()
}
