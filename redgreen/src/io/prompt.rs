//! Prompt rendering for the generation collaborator.

use anyhow::Result;
use minijinja::{Environment, context};

const DESIGN_TESTS_TEMPLATE: &str = include_str!("prompts/design_tests.md");
const IMPLEMENT_TEMPLATE: &str = include_str!("prompts/implement.md");
const ANALYZE_TEMPLATE: &str = include_str!("prompts/analyze.md");
const REFACTOR_TEMPLATE: &str = include_str!("prompts/refactor.md");

/// Template engine wrapper around minijinja.
///
/// One prompt per loop stage: test design, implementation, failure
/// analysis and the post-success refactoring pass.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("design_tests", DESIGN_TESTS_TEMPLATE)
            .expect("design_tests template should be valid");
        env.add_template("implement", IMPLEMENT_TEMPLATE)
            .expect("implement template should be valid");
        env.add_template("analyze", ANALYZE_TEMPLATE)
            .expect("analyze template should be valid");
        env.add_template("refactor", REFACTOR_TEMPLATE)
            .expect("refactor template should be valid");
        Self { env }
    }

    pub fn design_tests(&self, goal: &str, feedback: Option<&str>) -> Result<String> {
        let template = self.env.get_template("design_tests")?;
        let rendered = template.render(context! {
            goal => goal.trim(),
            feedback => feedback.map(str::trim).filter(|s| !s.is_empty()),
        })?;
        Ok(rendered)
    }

    pub fn implement(&self, goal: &str, tests: &str, feedback: Option<&str>) -> Result<String> {
        let template = self.env.get_template("implement")?;
        let rendered = template.render(context! {
            goal => goal.trim(),
            tests => tests.trim(),
            feedback => feedback.map(str::trim).filter(|s| !s.is_empty()),
        })?;
        Ok(rendered)
    }

    pub fn analyze(&self, goal: &str, execution_output: &str, coverage: &str) -> Result<String> {
        let template = self.env.get_template("analyze")?;
        let rendered = template.render(context! {
            goal => goal.trim(),
            execution_output => execution_output.trim(),
            coverage => coverage.trim(),
        })?;
        Ok(rendered)
    }

    pub fn refactor(&self, goal: &str, source: &str, coverage: &str) -> Result<String> {
        let template = self.env.get_template("refactor")?;
        let rendered = template.render(context! {
            goal => goal.trim(),
            source => source.trim(),
            coverage => coverage.trim(),
        })?;
        Ok(rendered)
    }
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}
