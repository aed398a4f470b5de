//! Pure, deterministic engine logic. No I/O lives here.

pub mod conflict;
pub mod extract;
pub mod state;
pub mod types;
