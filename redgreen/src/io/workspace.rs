//! Versioned work-directory scaffolding and artifact persistence.
//!
//! A [`Workspace`] is the sole owner of all artifact files for one run.
//! Each run receives a freshly timestamped directory; no two runs ever
//! share one. Teardown is left to external cleanup.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::core::types::{Artifact, ArtifactKind, Iteration};

/// A timestamped project root owning `src/`, `tests/` and `docs/`.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Create the canonical project skeleton under
    /// `<projects_dir>/<name>_<timestamp>`.
    ///
    /// Failure here is fatal to the run: there is no safe fallback when the
    /// work directory cannot be created.
    pub fn create(projects_dir: &Path, project_name: &str) -> Result<Self> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let root = projects_dir.join(format!("{project_name}_{stamp}"));
        fs::create_dir_all(&root)
            .with_context(|| format!("create work directory {}", root.display()))?;

        for sub in ["src", "tests", "docs"] {
            fs::create_dir_all(root.join(sub))
                .with_context(|| format!("create {sub}/ in {}", root.display()))?;
        }
        // Package-init markers so the generated tree imports as packages.
        for marker in ["src/__init__.py", "tests/__init__.py"] {
            fs::write(root.join(marker), "")
                .with_context(|| format!("write {marker} in {}", root.display()))?;
        }

        info!(work_dir = %root.display(), "created work directory");
        Ok(Self { root })
    }

    /// Open an existing work directory without scaffolding it.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn src_dir(&self) -> PathBuf {
        self.root.join("src")
    }

    pub fn tests_dir(&self) -> PathBuf {
        self.root.join("tests")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("requirements.txt")
    }

    pub fn iterations_dir(&self) -> PathBuf {
        self.root.join("iterations")
    }

    pub fn report_path(&self) -> PathBuf {
        self.root.join("report.json")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join("install_ledger.json")
    }

    /// Persist one artifact under its kind's directory, overwriting any
    /// earlier revision of the same file.
    pub fn write_artifact(&self, artifact: &Artifact) -> Result<PathBuf> {
        if artifact.file_name.contains(['/', '\\']) || artifact.file_name.starts_with('.') {
            return Err(anyhow!(
                "artifact file name '{}' must be a plain file name",
                artifact.file_name
            ));
        }
        let dir = match artifact.kind {
            ArtifactKind::Test => self.tests_dir(),
            ArtifactKind::Code => self.src_dir(),
        };
        let path = dir.join(&artifact.file_name);
        fs::write(&path, &artifact.source)
            .with_context(|| format!("write artifact {}", path.display()))?;
        debug!(path = %path.display(), kind = ?artifact.kind, "wrote artifact");
        Ok(path)
    }

    pub fn write_artifacts(&self, artifacts: &[Artifact]) -> Result<Vec<PathBuf>> {
        artifacts.iter().map(|a| self.write_artifact(a)).collect()
    }

    /// Concatenate the current implementation sources, skipping the package
    /// marker. Used as context for the refactoring pass.
    pub fn read_source(&self) -> Result<String> {
        let mut files = python_files(&self.src_dir())?;
        files.sort();

        let mut sections = Vec::new();
        for path in files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read source {}", path.display()))?;
            sections.push(format!("# {name}\n{contents}"));
        }
        Ok(sections.join("\n\n"))
    }

    /// Relative paths of every artifact file currently in the workspace,
    /// sorted for a stable report.
    pub fn artifact_files(&self) -> Result<Vec<String>> {
        let mut listed = Vec::new();
        for dir in [self.src_dir(), self.tests_dir()] {
            for path in python_files(&dir)? {
                if let Ok(rel) = path.strip_prefix(&self.root) {
                    listed.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }
        listed.sort();
        Ok(listed)
    }

    /// Persist one iteration record under `iterations/<index>.json`.
    pub fn write_iteration(&self, iteration: &Iteration) -> Result<PathBuf> {
        let dir = self.iterations_dir();
        fs::create_dir_all(&dir)
            .with_context(|| format!("create iterations dir {}", dir.display()))?;
        let path = dir.join(format!("{}.json", iteration.index));
        write_json(&path, iteration)?;
        Ok(path)
    }
}

/// Serialize `value` as pretty JSON with a trailing newline.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value).context("serialize json")?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

fn python_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !dir.exists() {
        return Ok(files);
    }
    for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let path = entry.context("read dir entry")?.path();
        let is_python = path.extension().is_some_and(|e| e == "py");
        let is_marker = path.file_name().is_some_and(|n| n == "__init__.py");
        if path.is_file() && is_python && !is_marker {
            files.push(path);
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(kind: ArtifactKind, file_name: &str, source: &str) -> Artifact {
        Artifact {
            name: "a".to_string(),
            file_name: file_name.to_string(),
            source: source.to_string(),
            description: String::new(),
            kind,
        }
    }

    #[test]
    fn create_scaffolds_the_project_skeleton() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::create(temp.path(), "demo").expect("create");

        assert!(ws.src_dir().is_dir());
        assert!(ws.tests_dir().is_dir());
        assert!(ws.root().join("docs").is_dir());
        assert!(ws.src_dir().join("__init__.py").is_file());
        assert!(ws.tests_dir().join("__init__.py").is_file());

        let dir_name = ws.root().file_name().unwrap().to_string_lossy().into_owned();
        assert!(dir_name.starts_with("demo_"), "timestamped name: {dir_name}");
    }

    #[test]
    fn artifacts_land_in_their_kind_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::create(temp.path(), "demo").expect("create");

        ws.write_artifact(&artifact(ArtifactKind::Code, "calc.py", "x = 1\n"))
            .expect("write code");
        ws.write_artifact(&artifact(ArtifactKind::Test, "test_calc.py", "y = 2\n"))
            .expect("write test");

        assert_eq!(
            fs::read_to_string(ws.src_dir().join("calc.py")).expect("read"),
            "x = 1\n"
        );
        assert!(ws.tests_dir().join("test_calc.py").is_file());
        assert_eq!(
            ws.artifact_files().expect("list"),
            vec!["src/calc.py".to_string(), "tests/test_calc.py".to_string()]
        );
    }

    #[test]
    fn path_escaping_file_names_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::create(temp.path(), "demo").expect("create");

        let err = ws
            .write_artifact(&artifact(ArtifactKind::Code, "../evil.py", ""))
            .unwrap_err();
        assert!(err.to_string().contains("plain file name"));
    }

    #[test]
    fn read_source_skips_the_package_marker() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::create(temp.path(), "demo").expect("create");
        ws.write_artifact(&artifact(ArtifactKind::Code, "calc.py", "x = 1\n"))
            .expect("write");

        let source = ws.read_source().expect("read");
        assert!(source.contains("# calc.py"));
        assert!(source.contains("x = 1"));
        assert!(!source.contains("__init__"));
    }
}
