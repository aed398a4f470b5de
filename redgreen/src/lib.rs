//! Red-Green-Refactor iteration engine for AI-generated code.
//!
//! External text-generating collaborators emit candidate test and
//! implementation code; the engine writes those artifacts into a scaffolded
//! project, runs the test suite in a sandboxed child process, and decides
//! whether to accept, retry, or refactor. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (state machine, artifact
//!   extraction, conflict detection). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (workspace scaffolding, child
//!   processes, package installation, config). Isolated to enable mocking.
//!
//! Orchestration modules ([`step`], [`run`], [`merge`]) coordinate core
//! logic with I/O to implement the iteration loop and the CLI commands.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod merge;
pub mod run;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
