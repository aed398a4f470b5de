//! Generation-collaborator backend.
//!
//! The engine never talks to a model directly; it pipes a rendered prompt
//! to a configured external command and reads the response from its
//! stdout. Collaborator failure is fatal to the run, unlike test or
//! install failures which feed back into the loop.

use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument};

use crate::io::process::run_with_deadline;

/// Produces responses to prompts. Scripted in tests so the full iteration
/// loop can run without an external command.
pub trait Generator {
    fn respond(&self, prompt: &str) -> Result<String>;
}

/// Generator that spawns a configured command per prompt, writing the
/// prompt to its stdin and taking its stdout as the response.
pub struct CommandGenerator {
    command: Vec<String>,
    deadline: Duration,
    output_cap: usize,
}

impl CommandGenerator {
    pub fn new(command: Vec<String>, deadline: Duration, output_cap: usize) -> Result<Self> {
        if command.is_empty() {
            return Err(anyhow!("generator_command is empty, nothing to run"));
        }
        Ok(Self {
            command,
            deadline,
            output_cap,
        })
    }
}

impl Generator for CommandGenerator {
    #[instrument(skip_all, fields(command = %self.command[0], prompt_bytes = prompt.len()))]
    fn respond(&self, prompt: &str) -> Result<String> {
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]);

        let output = run_with_deadline(cmd, Some(prompt.as_bytes()), self.deadline, self.output_cap)?;
        if output.timed_out {
            return Err(anyhow!(
                "generation command timed out after {}s",
                self.deadline.as_secs()
            ));
        }
        if !output.success() {
            return Err(anyhow!(
                "generation command exited with {:?}: {}",
                output.exit_code,
                output.stderr.trim()
            ));
        }
        debug!(response_bytes = output.stdout.len(), "collaborator responded");
        Ok(output.stdout)
    }
}
