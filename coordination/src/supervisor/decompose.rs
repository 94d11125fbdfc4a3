//! Task decomposition
//!
//! Decomposition is a pluggable capability: callers with real planning logic
//! implement [`Decomposer`]; everyone else gets the table-driven
//! [`DefaultDecomposer`].

use std::collections::HashMap;

use crate::task::{Capability, Subtask, Task};

/// Splits a task into an ordered list of subtasks.
///
/// Implementations must tag every subtask with the parent's id and priority.
pub trait Decomposer: Send + Sync {
    fn decompose(&self, task: &Task) -> Vec<Subtask>;
}

impl<F> Decomposer for F
where
    F: Fn(&Task) -> Vec<Subtask> + Send + Sync,
{
    fn decompose(&self, task: &Task) -> Vec<Subtask> {
        self(task)
    }
}

/// One row of a decomposition template: required capability and description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateStep {
    pub capability: Capability,
    pub description: String,
}

impl TemplateStep {
    pub fn new(capability: impl Into<Capability>, description: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            description: description.into(),
        }
    }
}

/// Capability used for task types without a template
pub const PASS_THROUGH_CAPABILITY: &str = "execute";

/// Table-driven decomposition keyed by task type.
///
/// Built-in templates:
///
/// | task type  | subtasks                          |
/// |------------|-----------------------------------|
/// | `research` | search → analyze → synthesize     |
/// | `create`   | plan → draft → review             |
/// | other      | execute (carries the description) |
#[derive(Debug, Clone)]
pub struct DefaultDecomposer {
    templates: HashMap<String, Vec<TemplateStep>>,
}

impl DefaultDecomposer {
    pub fn new() -> Self {
        let mut templates = HashMap::new();
        templates.insert(
            "research".to_string(),
            vec![
                TemplateStep::new("search", "Gather information"),
                TemplateStep::new("analyze", "Analyze findings"),
                TemplateStep::new("synthesize", "Synthesize results"),
            ],
        );
        templates.insert(
            "create".to_string(),
            vec![
                TemplateStep::new("plan", "Create plan"),
                TemplateStep::new("draft", "Draft content"),
                TemplateStep::new("review", "Review and refine"),
            ],
        );
        Self { templates }
    }

    /// Add or replace the template for `task_type`
    pub fn with_template(mut self, task_type: impl Into<String>, steps: Vec<TemplateStep>) -> Self {
        self.templates.insert(task_type.into(), steps);
        self
    }

    pub fn template(&self, task_type: &str) -> Option<&[TemplateStep]> {
        self.templates.get(task_type).map(Vec::as_slice)
    }
}

impl Default for DefaultDecomposer {
    fn default() -> Self {
        Self::new()
    }
}

impl Decomposer for DefaultDecomposer {
    fn decompose(&self, task: &Task) -> Vec<Subtask> {
        match self.templates.get(&task.task_type) {
            Some(steps) if !steps.is_empty() => steps
                .iter()
                .enumerate()
                .map(|(i, step)| {
                    Subtask::child_of(task, i, step.capability.clone(), step.description.clone())
                })
                .collect(),
            _ => {
                let description = if task.description.is_empty() {
                    "Execute task".to_string()
                } else {
                    task.description.clone()
                };
                vec![Subtask::child_of(
                    task,
                    0,
                    PASS_THROUGH_CAPABILITY,
                    description,
                )]
            }
        }
    }
}
