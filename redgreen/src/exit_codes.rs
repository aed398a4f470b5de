//! Stable exit codes for engine CLI commands.

/// Command succeeded; for `run`, the suite passed within budget.
pub const OK: i32 = 0;
/// Command failed: invalid config/arguments or an infrastructure error.
pub const INVALID: i32 = 1;
/// `run` exhausted its iteration budget without a passing suite.
pub const EXHAUSTED: i32 = 2;
