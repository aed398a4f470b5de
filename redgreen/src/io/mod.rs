//! Side-effecting operations: workspace scaffolding, child processes,
//! package installation, configuration and prompt rendering.

pub mod config;
pub mod deps;
pub mod generator;
pub mod process;
pub mod prompt;
pub mod sandbox;
pub mod workspace;
