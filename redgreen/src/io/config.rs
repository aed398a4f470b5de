//! Engine configuration stored in `redgreen.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Engine configuration (TOML).
///
/// Intended to be edited by humans; missing fields default to sensible
/// values so a partial file stays valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Iteration budget for a run.
    pub max_iterations: u32,

    /// Wall-clock deadline for one sandboxed test execution, in seconds.
    pub test_timeout_secs: u64,

    /// Wall-clock deadline for one package installation, in seconds.
    pub install_timeout_secs: u64,

    /// Wall-clock deadline for one generation-collaborator call, in seconds.
    pub generator_timeout_secs: u64,

    /// Cap on captured stdout/stderr per child process, in bytes.
    pub output_limit_bytes: usize,

    /// Whether missing modules found in failure output may be installed
    /// automatically between retries.
    pub auto_install: bool,

    /// Interpreter used for the test runner, the package manager and the
    /// standard-module probe.
    pub python: String,

    /// Root under which timestamped work directories are created.
    pub projects_dir: String,

    /// Command line of the external generation collaborator. The prompt is
    /// piped to its stdin; its stdout is the response. Empty means no
    /// collaborator is configured (the `run` command refuses to start).
    pub generator_command: Vec<String>,

    /// Allow-list gating which third-party packages may be auto-installed.
    pub safe_packages: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            test_timeout_secs: 30,
            install_timeout_secs: 300,
            generator_timeout_secs: 600,
            output_limit_bytes: 100_000,
            auto_install: true,
            python: "python3".to_string(),
            projects_dir: "generated_projects".to_string(),
            generator_command: Vec::new(),
            safe_packages: default_safe_packages(),
        }
    }
}

fn default_safe_packages() -> Vec<String> {
    [
        "beautifulsoup4",
        "black",
        "click",
        "coverage",
        "django",
        "fastapi",
        "flake8",
        "flask",
        "httpx",
        "matplotlib",
        "mypy",
        "numpy",
        "opencv-python",
        "pandas",
        "pillow",
        "pydantic",
        "pygame",
        "pytest",
        "pytest-cov",
        "requests",
        "rich",
        "scikit-learn",
        "seaborn",
        "sqlalchemy",
        "tqdm",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be >= 1"));
        }
        if self.test_timeout_secs == 0 {
            return Err(anyhow!("test_timeout_secs must be > 0"));
        }
        if self.install_timeout_secs == 0 {
            return Err(anyhow!("install_timeout_secs must be > 0"));
        }
        if self.generator_timeout_secs == 0 {
            return Err(anyhow!("generator_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.python.trim().is_empty() {
            return Err(anyhow!("python must be a non-empty command"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');

    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, &buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
