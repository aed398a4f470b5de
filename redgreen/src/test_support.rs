//! Test-only scripted backends for the engine's subprocess seams.
//!
//! Each double replays a queue of pre-arranged outcomes, so loop and
//! resolution behaviour can be tested without spawning interpreters,
//! installers or collaborator commands.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};

use crate::core::types::ExecutionResult;
use crate::io::deps::{InstallOutcome, InstalledPackage, PackageManager};
use crate::io::generator::Generator;
use crate::io::sandbox::{NO_COVERAGE_INFO, Sandbox};

/// Generator replaying scripted responses in order.
///
/// Running out of responses is an error, surfacing tests that consume
/// more collaborator calls than they arranged for.
pub struct ScriptedGenerator {
    responses: RefCell<VecDeque<String>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    /// Every prompt seen so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl Generator for ScriptedGenerator {
    fn respond(&self, prompt: &str) -> Result<String> {
        self.prompts.borrow_mut().push(prompt.to_string());
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted generator ran out of responses"))
    }
}

/// Sandbox replaying scripted execution results in order.
pub struct ScriptedSandbox {
    results: RefCell<VecDeque<ExecutionResult>>,
    executed_in: RefCell<Vec<PathBuf>>,
}

impl ScriptedSandbox {
    pub fn new(results: Vec<ExecutionResult>) -> Self {
        Self {
            results: RefCell::new(results.into()),
            executed_in: RefCell::new(Vec::new()),
        }
    }

    pub fn executed_in(&self) -> Vec<PathBuf> {
        self.executed_in.borrow().clone()
    }
}

impl Sandbox for ScriptedSandbox {
    fn execute(&self, work_dir: &Path) -> Result<ExecutionResult> {
        self.executed_in.borrow_mut().push(work_dir.to_path_buf());
        self.results
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted sandbox ran out of results"))
    }
}

/// A passing execution result with a plausible coverage line.
pub fn passing_execution() -> ExecutionResult {
    ExecutionResult {
        passed: true,
        output: "==== 3 passed ====\nTOTAL 20 0 100%\n".to_string(),
        coverage: "TOTAL 20 0 100%".to_string(),
        error_detail: String::new(),
        duration_ms: 12,
    }
}

/// A failing execution result carrying `output` verbatim.
pub fn failing_execution(output: &str) -> ExecutionResult {
    ExecutionResult {
        passed: false,
        output: output.to_string(),
        coverage: NO_COVERAGE_INFO.to_string(),
        error_detail: output.to_string(),
        duration_ms: 8,
    }
}

/// Package manager with an in-memory installed set.
///
/// `install` appends to that set (version `1.0.0`) unless constructed
/// with [`ScriptedPackageManager::failing_installs`].
#[derive(Default)]
pub struct ScriptedPackageManager {
    installed: RefCell<Vec<InstalledPackage>>,
    install_calls: RefCell<Vec<String>>,
    standard_modules: HashSet<String>,
    fail_installs: bool,
}

impl ScriptedPackageManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_installed(self, names: &[&str]) -> Self {
        {
            let mut installed = self.installed.borrow_mut();
            for name in names {
                installed.push(InstalledPackage {
                    name: name.to_string(),
                    version: "1.0.0".to_string(),
                });
            }
        }
        self
    }

    pub fn with_standard(mut self, modules: &[&str]) -> Self {
        self.standard_modules = modules.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn failing_installs(mut self) -> Self {
        self.fail_installs = true;
        self
    }

    /// Every install invocation seen so far, in call order.
    pub fn install_calls(&self) -> Vec<String> {
        self.install_calls.borrow().clone()
    }
}

impl PackageManager for ScriptedPackageManager {
    fn list_installed(&self) -> Result<Vec<InstalledPackage>> {
        Ok(self.installed.borrow().clone())
    }

    fn install(&self, spec: &str) -> InstallOutcome {
        self.install_calls.borrow_mut().push(spec.to_string());
        if self.fail_installs {
            return InstallOutcome {
                succeeded: false,
                message: format!("scripted failure installing {spec}"),
            };
        }
        let name = spec.split("==").next().unwrap_or(spec).to_string();
        self.installed.borrow_mut().push(InstalledPackage {
            name,
            version: "1.0.0".to_string(),
        });
        InstallOutcome {
            succeeded: true,
            message: format!("installed {spec}"),
        }
    }

    fn is_standard_module(&self, module: &str) -> bool {
        self.standard_modules.contains(module)
    }
}
