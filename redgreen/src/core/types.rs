//! Shared record types for the iteration engine.
//!
//! These types define the stable contracts between components. Records are
//! immutable once created: an [`Iteration`] is appended to the run history
//! and never mutated, and [`InstallationRecord`]s are only ever appended to
//! the resolver's ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a generated artifact, deciding which directory it lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// A test file, written under `tests/`.
    Test,
    /// An implementation file, written under `src/`.
    Code,
}

/// A generated text block plus its target file name.
///
/// Artifacts live for the duration of a run; later iterations supersede
/// earlier files by overwriting them, never by deleting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Logical name (e.g. `test_case_1`).
    pub name: String,
    /// Target file name relative to the artifact's directory.
    pub file_name: String,
    /// Source text, verbatim as extracted from the collaborator response.
    pub source: String,
    pub description: String,
    pub kind: ArtifactKind,
}

/// Outcome of one sandboxed test execution.
///
/// Produced at most once per iteration, and only after every artifact for
/// that iteration has been written to the work directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Derived strictly from the child process exit code (zero = pass).
    pub passed: bool,
    /// Combined stdout/stderr of the test runner, bounded by the output cap.
    pub output: String,
    /// Aggregate coverage line, or the `"no coverage info"` sentinel.
    pub coverage: String,
    /// Failure detail (stderr excerpt or a timeout indicator); empty on pass.
    pub error_detail: String,
    pub duration_ms: u64,
}

/// One full pass through Testing → Implementing → Executing → Analyzing.
#[derive(Debug, Clone, Serialize)]
pub struct Iteration {
    /// 1-indexed position in the run history.
    pub index: u32,
    pub tests: Vec<Artifact>,
    pub code: Vec<Artifact>,
    /// Absent when the iteration soft-failed before execution
    /// (zero extracted test artifacts).
    pub execution: Option<ExecutionResult>,
    pub succeeded: bool,
    /// Analysis feedback carried into the next iteration's prompts.
    pub feedback: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only record of one package installation attempt.
///
/// The ledger is the source of truth for "what was installed this run",
/// independent of the mutable installed-package cache.
#[derive(Debug, Clone, Serialize)]
pub struct InstallationRecord {
    pub package: String,
    pub succeeded: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl InstallationRecord {
    pub fn new(package: impl Into<String>, succeeded: bool, message: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            succeeded,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}
