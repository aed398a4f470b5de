//! Dependency auto-resolution for generated source.
//!
//! Scans source text for import statements, filters out standard-library
//! modules, and installs missing packages gated by a configurable
//! safe-list. Every attempt is appended to an installation ledger; the
//! ledger, not the mutable installed-package cache, is the source of truth
//! for what was installed during a run. The cache is owned by one resolver
//! instance per run and invalidated wholesale after every successful
//! install, since external tooling may also mutate the true installed set.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::core::types::InstallationRecord;
use crate::io::process::run_with_deadline;

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^import\s+([A-Za-z_][A-Za-z0-9_]*)").expect("import pattern is valid")
});
static FROM_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^from\s+([A-Za-z_][A-Za-z0-9_]*)\s+import").expect("from pattern is valid")
});
static MISSING_MODULE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"No module named '([^']+)'").expect("missing pattern is valid"));

/// Module names that are always standard library, skipping the probe.
const STANDARD_MODULES: &[&str] = &[
    "argparse", "asyncio", "collections", "configparser", "csv", "datetime", "functools",
    "http", "io", "itertools", "json", "logging", "math", "multiprocessing", "operator",
    "os", "pathlib", "random", "re", "sqlite3", "subprocess", "sys", "tempfile", "threading",
    "typing", "unittest", "urllib",
];

/// Interpreter snippet classifying a module by the origin of its spec.
const PROBE_SNIPPET: &str = "\
import importlib.util, sys
try:
    spec = importlib.util.find_spec(sys.argv[1])
except (ImportError, ValueError):
    spec = None
if spec is None:
    print('unresolved')
elif spec.origin and 'site-packages' in spec.origin:
    print('third-party')
else:
    print('standard')
";

const PROBE_DEADLINE: Duration = Duration::from_secs(10);
const LIST_DEADLINE: Duration = Duration::from_secs(30);

/// One entry from the package manager's list command.
#[derive(Debug, Clone, Deserialize)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
}

/// Outcome of one install invocation. Subprocess timeouts and nonzero
/// exits fold into a failed outcome; they never raise.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub succeeded: bool,
    pub message: String,
}

/// Package-manager backend. Scripted in tests so resolution never shells
/// out.
pub trait PackageManager {
    fn list_installed(&self) -> Result<Vec<InstalledPackage>>;
    fn install(&self, spec: &str) -> InstallOutcome;
    /// Whether `module` belongs to the language's standard distribution.
    /// Unresolvable names are conservatively treated as standard.
    fn is_standard_module(&self, module: &str) -> bool;
}

/// Package manager invoking pip through the configured interpreter.
pub struct PipManager {
    python: String,
    install_deadline: Duration,
    output_cap: usize,
}

impl PipManager {
    pub fn new(python: impl Into<String>, install_deadline: Duration, output_cap: usize) -> Self {
        Self {
            python: python.into(),
            install_deadline,
            output_cap,
        }
    }

    fn pip(&self) -> Command {
        let mut cmd = Command::new(&self.python);
        cmd.args(["-m", "pip"]);
        cmd
    }
}

impl PackageManager for PipManager {
    fn list_installed(&self) -> Result<Vec<InstalledPackage>> {
        let mut cmd = self.pip();
        cmd.args(["list", "--format=json"]);
        let output =
            run_with_deadline(cmd, None, LIST_DEADLINE, self.output_cap).context("run pip list")?;
        if !output.success() {
            warn!(exit_code = ?output.exit_code, timed_out = output.timed_out, "pip list failed");
            return Ok(Vec::new());
        }
        serde_json::from_str(output.stdout.trim()).context("parse pip list output")
    }

    #[instrument(skip(self))]
    fn install(&self, spec: &str) -> InstallOutcome {
        let mut cmd = self.pip();
        cmd.args(["install", spec]);
        match run_with_deadline(cmd, None, self.install_deadline, self.output_cap) {
            Ok(output) if output.timed_out => InstallOutcome {
                succeeded: false,
                message: format!(
                    "installation timed out after {}s",
                    self.install_deadline.as_secs()
                ),
            },
            Ok(output) if output.success() => InstallOutcome {
                succeeded: true,
                message: format!("installed {spec}"),
            },
            Ok(output) => InstallOutcome {
                succeeded: false,
                message: format!(
                    "install exited with {:?}: {}",
                    output.exit_code,
                    excerpt(&output.stderr, 300)
                ),
            },
            Err(err) => InstallOutcome {
                succeeded: false,
                message: format!("could not run installer: {err:#}"),
            },
        }
    }

    fn is_standard_module(&self, module: &str) -> bool {
        if STANDARD_MODULES.contains(&module) {
            return true;
        }
        let mut cmd = Command::new(&self.python);
        cmd.args(["-c", PROBE_SNIPPET, module]);
        match run_with_deadline(cmd, None, PROBE_DEADLINE, 4096) {
            Ok(output) if output.success() => !output.stdout.contains("third-party"),
            // Probe failures are conservative: treat the module as standard
            // rather than install something we cannot classify.
            Ok(_) | Err(_) => true,
        }
    }
}

/// Memoized view of the installed-package set.
///
/// Populated lazily from one list invocation; [`InstalledCache::invalidate`]
/// drops the whole view instead of patching it incrementally.
#[derive(Debug, Default)]
pub struct InstalledCache {
    entries: Option<BTreeMap<String, String>>,
}

impl InstalledCache {
    pub fn invalidate(&mut self) {
        self.entries = None;
    }

    fn entries<P: PackageManager>(&mut self, manager: &P) -> &BTreeMap<String, String> {
        if self.entries.is_none() {
            let listed = manager.list_installed().unwrap_or_else(|err| {
                warn!(err = %err, "could not list installed packages");
                Vec::new()
            });
            self.entries = Some(
                listed
                    .into_iter()
                    .map(|p| (p.name.to_lowercase(), p.version))
                    .collect(),
            );
        }
        self.entries.as_ref().expect("populated above")
    }

    fn contains<P: PackageManager>(&mut self, manager: &P, name: &str) -> bool {
        self.entries(manager).contains_key(name)
    }

    fn version_of<P: PackageManager>(&mut self, manager: &P, name: &str) -> Option<String> {
        self.entries(manager).get(name).cloned()
    }
}

/// Safe-list-gated dependency resolver with an append-only ledger.
pub struct DependencyResolver<P: PackageManager> {
    manager: P,
    safe_packages: BTreeSet<String>,
    auto_install: bool,
    manifest_path: PathBuf,
    cache: InstalledCache,
    ledger: Vec<InstallationRecord>,
}

impl<P: PackageManager> DependencyResolver<P> {
    pub fn new(
        manager: P,
        safe_packages: &[String],
        auto_install: bool,
        manifest_path: PathBuf,
    ) -> Self {
        Self {
            manager,
            safe_packages: safe_packages.iter().map(|p| p.to_lowercase()).collect(),
            auto_install,
            manifest_path,
            cache: InstalledCache::default(),
            ledger: Vec::new(),
        }
    }

    /// The append-only record of every installation attempt this run.
    pub fn ledger(&self) -> &[InstallationRecord] {
        &self.ledger
    }

    /// Scan `source` for unmet imports and install the missing ones.
    ///
    /// Returns the final installed state per third-party candidate.
    /// Rejections and failures are recorded in the ledger, never raised.
    pub fn resolve_from_source(&mut self, source: &str) -> BTreeMap<String, bool> {
        let mut results = BTreeMap::new();
        for module in extract_imports(source) {
            if self.manager.is_standard_module(&module) {
                debug!(module, "skipping standard module");
                continue;
            }
            let installed = self.ensure_installed(&module);
            results.insert(module, installed);
        }
        results
    }

    /// Scan execution output for a missing-module failure and, when
    /// automatic installation is enabled, install that single module.
    /// Returns whether an installation was attempted and succeeded.
    pub fn handle_failure_output(&mut self, output: &str) -> bool {
        let mentions_import_failure = output.contains("ModuleNotFoundError")
            || output.contains("ImportError")
            || output.contains("No module named");
        if !mentions_import_failure {
            return false;
        }
        let Some(caps) = MISSING_MODULE_RE.captures(output) else {
            return false;
        };
        let full = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let module = full.split('.').next().unwrap_or(full);
        if !self.auto_install {
            info!(module, "automatic installation disabled, leaving missing module");
            return false;
        }
        info!(module, "attempting to self-heal missing module");
        self.ensure_installed(module)
    }

    fn ensure_installed(&mut self, package: &str) -> bool {
        let key = package.to_lowercase();
        if self.cache.contains(&self.manager, &key) {
            debug!(package, "already installed");
            return true;
        }
        if !self.safe_packages.contains(&key) {
            warn!(package, "not on the safe-list, refusing to install");
            self.ledger.push(InstallationRecord::new(
                package,
                false,
                format!("package '{package}' is not on the safe-list"),
            ));
            return false;
        }

        let outcome = self.manager.install(package);
        if outcome.succeeded {
            // The true installed set changed under us; drop the whole view.
            self.cache.invalidate();
            let version = self.cache.version_of(&self.manager, &key);
            info!(package, version = version.as_deref(), "installed package");
            self.ledger
                .push(InstallationRecord::new(package, true, outcome.message));
            if let Err(err) = self.update_manifest(package, version.as_deref()) {
                warn!(err = %err, package, "could not update manifest");
            }
            true
        } else {
            warn!(package, message = %outcome.message, "installation failed");
            self.ledger
                .push(InstallationRecord::new(package, false, outcome.message));
            false
        }
    }

    /// Merge a requirement specifier into the manifest, keeping it sorted
    /// and de-duplicated.
    fn update_manifest(&self, package: &str, version: Option<&str>) -> Result<()> {
        let mut specs: BTreeSet<String> = match fs::read_to_string(&self.manifest_path) {
            Ok(contents) => contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string)
                .collect(),
            Err(_) => BTreeSet::new(),
        };

        let spec = match version {
            Some(version) => format!("{package}=={version}"),
            None => package.to_string(),
        };
        specs.insert(spec);

        let mut buf = specs.into_iter().collect::<Vec<_>>().join("\n");
        buf.push('\n');
        fs::write(&self.manifest_path, buf)
            .with_context(|| format!("write manifest {}", self.manifest_path.display()))
    }
}

/// Extract top-level imported module names from source text.
///
/// Only the two plain shapes (`import X`, `from X import ...`) match;
/// commented lines are ignored. Names are returned sorted and de-duplicated.
pub fn extract_imports(source: &str) -> Vec<String> {
    let mut modules = BTreeSet::new();
    for line in source.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        let matched = IMPORT_RE
            .captures(line)
            .or_else(|| FROM_IMPORT_RE.captures(line));
        if let Some(caps) = matched
            && let Some(name) = caps.get(1)
        {
            modules.insert(name.as_str().to_string());
        }
    }
    modules.into_iter().collect()
}

fn excerpt(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedPackageManager;

    fn resolver(
        manager: ScriptedPackageManager,
    ) -> (DependencyResolver<ScriptedPackageManager>, tempfile::TempDir) {
        let temp = tempfile::tempdir().expect("tempdir");
        let resolver = DependencyResolver::new(
            manager,
            &["requests".to_string(), "flask".to_string()],
            true,
            temp.path().join("requirements.txt"),
        );
        (resolver, temp)
    }

    #[test]
    fn extract_imports_matches_both_shapes_and_skips_comments() {
        let source = "\
import requests
from flask import Flask
# import commented_out
import requests
x = 1
    import indented_is_trimmed
";
        assert_eq!(
            extract_imports(source),
            vec!["flask", "indented_is_trimmed", "requests"]
        );
    }

    #[test]
    fn standard_modules_are_never_candidates() {
        let manager = ScriptedPackageManager::new().with_standard(&["os", "json"]);
        let (mut resolver, _temp) = resolver(manager);

        let results = resolver.resolve_from_source("import os\nimport json\n");
        assert!(results.is_empty());
        assert!(resolver.manager.install_calls().is_empty());
    }

    /// A package off the safe-list is rejected with a failed ledger record
    /// and the installer is never invoked.
    #[test]
    fn safe_list_gate_rejects_without_installing() {
        let (mut resolver, _temp) = resolver(ScriptedPackageManager::new());

        let results = resolver.resolve_from_source("import leftpad\n");
        assert_eq!(results.get("leftpad"), Some(&false));
        assert!(resolver.manager.install_calls().is_empty());

        let ledger = resolver.ledger();
        assert_eq!(ledger.len(), 1);
        assert!(!ledger[0].succeeded);
        assert!(ledger[0].message.contains("safe-list"));
    }

    /// Resolving the same source twice performs the install subprocess call
    /// at most once per package; the second pass is satisfied by the cache.
    #[test]
    fn repeated_resolution_is_idempotent() {
        let (mut resolver, _temp) = resolver(ScriptedPackageManager::new());

        let first = resolver.resolve_from_source("import requests\n");
        let second = resolver.resolve_from_source("import requests\n");

        assert_eq!(first.get("requests"), Some(&true));
        assert_eq!(second.get("requests"), Some(&true));
        assert_eq!(resolver.manager.install_calls(), vec!["requests"]);
    }

    #[test]
    fn failed_install_is_recorded_not_raised() {
        let (mut resolver, _temp) = resolver(ScriptedPackageManager::new().failing_installs());

        let results = resolver.resolve_from_source("import requests\n");
        assert_eq!(results.get("requests"), Some(&false));

        let ledger = resolver.ledger();
        assert_eq!(ledger.len(), 1);
        assert!(!ledger[0].succeeded);
    }

    #[test]
    fn successful_install_pins_the_manifest_entry() {
        let (mut resolver, _temp) = resolver(ScriptedPackageManager::new());
        resolver.resolve_from_source("import requests\nimport flask\n");

        let manifest = fs::read_to_string(&resolver.manifest_path).expect("manifest");
        assert_eq!(manifest, "flask==1.0.0\nrequests==1.0.0\n");

        // Re-resolving must not duplicate lines.
        resolver.resolve_from_source("import flask\n");
        let manifest = fs::read_to_string(&resolver.manifest_path).expect("manifest");
        assert_eq!(manifest, "flask==1.0.0\nrequests==1.0.0\n");
    }

    #[test]
    fn failure_output_self_heals_a_missing_module() {
        let (mut resolver, _temp) = resolver(ScriptedPackageManager::new());

        let attempted = resolver
            .handle_failure_output("ModuleNotFoundError: No module named 'requests.adapters'");
        assert!(attempted);
        assert_eq!(resolver.manager.install_calls(), vec!["requests"]);
    }

    #[test]
    fn failure_output_respects_the_auto_install_switch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut resolver = DependencyResolver::new(
            ScriptedPackageManager::new(),
            &["requests".to_string()],
            false,
            temp.path().join("requirements.txt"),
        );

        let attempted =
            resolver.handle_failure_output("ModuleNotFoundError: No module named 'requests'");
        assert!(!attempted);
        assert!(resolver.manager.install_calls().is_empty());
    }

    #[test]
    fn unrelated_failure_output_is_ignored() {
        let (mut resolver, _temp) = resolver(ScriptedPackageManager::new());
        assert!(!resolver.handle_failure_output("AssertionError: 1 != 2"));
        assert!(resolver.ledger().is_empty());
    }
}
