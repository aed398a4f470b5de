//! Red-Green-Refactor iteration state machine.
//!
//! The machine is expressed as a tagged [`Stage`] enumeration plus the pure
//! transition function [`advance`], so the cycle itself can be unit-tested
//! without any process or network I/O. Orchestration ([`crate::step`],
//! [`crate::run`]) drives the machine and performs the side effects each
//! transition implies.

use anyhow::{Result, bail};
use serde::Serialize;

/// Stage of the iteration cycle.
///
/// `Succeeded` and `Exhausted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Assemble the requirement and previous feedback for this cycle.
    Planning,
    /// Awaiting test artifacts from the test-generation collaborator.
    Testing,
    /// Awaiting implementation artifacts from the code-generation collaborator.
    Implementing,
    /// Running the test suite in the sandbox.
    Executing,
    /// Inspecting the execution result and producing feedback.
    Analyzing,
    /// Optional side pass on a passing iteration; failures here are non-fatal.
    Refactoring,
    /// The iteration failed; another cycle may start if budget remains.
    Retrying,
    Succeeded,
    Exhausted,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Succeeded | Stage::Exhausted)
    }
}

/// Event fed to [`advance`] to move the machine forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A new cycle begins.
    Start,
    /// The test-generation collaborator returned; `count` artifacts were
    /// extracted. Zero is a soft failure that skips straight to `Retrying`.
    TestsDesigned { count: usize },
    /// Implementation artifacts were extracted and persisted to disk.
    CodeWritten,
    /// The sandbox produced an execution result.
    Executed,
    /// Analysis finished for an iteration with the given outcome.
    Analyzed { passed: bool, iterations_left: bool },
    /// The refactoring side pass finished (successfully or not).
    RefactorFinished,
    /// The next cycle is about to start, or the budget ran out.
    NextIteration { iterations_left: bool },
}

/// Pure transition function.
///
/// Invalid (stage, event) pairs are programmer errors and yield an `Err`;
/// the orchestrators only ever feed events matching the current stage.
pub fn advance(stage: Stage, event: Event) -> Result<Stage> {
    let next = match (stage, event) {
        (Stage::Planning, Event::Start) => Stage::Testing,
        (Stage::Testing, Event::TestsDesigned { count: 0 }) => Stage::Retrying,
        (Stage::Testing, Event::TestsDesigned { .. }) => Stage::Implementing,
        (Stage::Implementing, Event::CodeWritten) => Stage::Executing,
        (Stage::Executing, Event::Executed) => Stage::Analyzing,
        (
            Stage::Analyzing,
            Event::Analyzed {
                passed: true,
                iterations_left: true,
            },
        ) => Stage::Refactoring,
        (
            Stage::Analyzing,
            Event::Analyzed {
                passed: true,
                iterations_left: false,
            },
        ) => Stage::Succeeded,
        (Stage::Analyzing, Event::Analyzed { passed: false, .. }) => Stage::Retrying,
        (Stage::Refactoring, Event::RefactorFinished) => Stage::Succeeded,
        (
            Stage::Retrying,
            Event::NextIteration {
                iterations_left: true,
            },
        ) => Stage::Planning,
        (
            Stage::Retrying,
            Event::NextIteration {
                iterations_left: false,
            },
        ) => Stage::Exhausted,
        (stage, event) => bail!("invalid transition: {stage:?} on {event:?}"),
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_reaches_succeeded_via_refactor() {
        let mut stage = Stage::Planning;
        for event in [
            Event::Start,
            Event::TestsDesigned { count: 2 },
            Event::CodeWritten,
            Event::Executed,
            Event::Analyzed {
                passed: true,
                iterations_left: true,
            },
            Event::RefactorFinished,
        ] {
            stage = advance(stage, event).expect("valid transition");
        }
        assert_eq!(stage, Stage::Succeeded);
        assert!(stage.is_terminal());
    }

    #[test]
    fn passing_on_final_iteration_skips_refactoring() {
        let stage = advance(
            Stage::Analyzing,
            Event::Analyzed {
                passed: true,
                iterations_left: false,
            },
        )
        .expect("valid transition");
        assert_eq!(stage, Stage::Succeeded);
    }

    #[test]
    fn zero_extracted_tests_is_a_soft_failure() {
        let stage = advance(Stage::Testing, Event::TestsDesigned { count: 0 }).expect("valid");
        assert_eq!(stage, Stage::Retrying);
    }

    #[test]
    fn failed_iteration_retries_then_exhausts() {
        let stage = advance(
            Stage::Analyzing,
            Event::Analyzed {
                passed: false,
                iterations_left: true,
            },
        )
        .expect("valid");
        assert_eq!(stage, Stage::Retrying);

        let next = advance(
            stage,
            Event::NextIteration {
                iterations_left: true,
            },
        )
        .expect("valid");
        assert_eq!(next, Stage::Planning);

        let done = advance(
            Stage::Retrying,
            Event::NextIteration {
                iterations_left: false,
            },
        )
        .expect("valid");
        assert_eq!(done, Stage::Exhausted);
        assert!(done.is_terminal());
    }

    #[test]
    fn invalid_pair_is_rejected() {
        let err = advance(Stage::Succeeded, Event::Start).unwrap_err();
        assert!(err.to_string().contains("invalid transition"));
    }
}
