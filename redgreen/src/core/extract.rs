//! Artifact extraction from free-form collaborator responses.
//!
//! Collaborators return plain text that may contain any number of fenced
//! code blocks. Extraction keeps only blocks tagged for the target language
//! and classifies each as a test or code artifact by heuristic. The policy
//! is deliberately isolated behind [`extract_artifacts`] so a
//! structured-output path can replace it later without touching the
//! controller.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{Artifact, ArtifactKind};

static CODE_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```python[ \t]*\n(.*?)\n```").expect("code block pattern is valid")
});

static TEST_FILE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#\s*(test_\w+\.py)").expect("test file pattern is valid"));

static CODE_FILE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#\s*(\w+\.py)").expect("code file pattern is valid"));

/// Token marking a block as following the test naming convention.
const TEST_NAME_TOKEN: &str = "test_";
/// Token marking a block as importing the test framework.
const TEST_IMPORT_TOKEN: &str = "import pytest";

/// Artifacts extracted from one collaborator response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub tests: Vec<Artifact>,
    pub code: Vec<Artifact>,
}

/// Extract test and code artifacts from a free-form response.
///
/// A block is a **test artifact** when it contains both the test-naming
/// token and the test-framework import; otherwise it is a **code artifact**
/// when it defines a class or function and carries no test-naming token.
/// Blocks matching neither are discarded silently. This is best-effort:
/// a code block that imports pytest for illustration will be misclassified,
/// and the controller does not second-guess the result.
pub fn extract_artifacts(text: &str) -> Extracted {
    let mut extracted = Extracted::default();

    for caps in CODE_BLOCK_RE.captures_iter(text) {
        let source = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        if source.trim().is_empty() {
            continue;
        }

        let has_test_name = source.contains(TEST_NAME_TOKEN);
        let has_test_import = source.contains(TEST_IMPORT_TOKEN);
        let has_definition = source.contains("class ") || source.contains("def ");

        if has_test_name && has_test_import {
            let n = extracted.tests.len() + 1;
            extracted.tests.push(Artifact {
                name: format!("test_case_{n}"),
                file_name: file_name_for(source, &TEST_FILE_NAME_RE)
                    .unwrap_or_else(|| format!("test_module_{n}.py")),
                source: source.to_string(),
                description: format!("Generated test case {n}"),
                kind: ArtifactKind::Test,
            });
        } else if has_definition && !has_test_name {
            let n = extracted.code.len() + 1;
            extracted.code.push(Artifact {
                name: format!("module_{n}"),
                file_name: file_name_for(source, &CODE_FILE_NAME_RE)
                    .unwrap_or_else(|| format!("module_{n}.py")),
                source: source.to_string(),
                description: format!("Generated code module {n}"),
                kind: ArtifactKind::Code,
            });
        }
    }

    extracted
}

/// Derive a target file name from an in-block leading comment, if present.
fn file_name_for(source: &str, pattern: &Regex) -> Option<String> {
    pattern
        .captures(source)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
