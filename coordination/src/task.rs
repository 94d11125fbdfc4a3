//! Work items exchanged between the supervisor and its workers.
//!
//! A [`Task`] is what a caller submits; the supervisor decomposes it into an
//! ordered list of [`Subtask`]s, each naming exactly one required capability.

use serde::{Deserialize, Serialize};

/// Unique identifier for tasks and subtasks
pub type TaskId = String;

/// Capability tag a worker advertises and a subtask requires
pub type Capability = String;

/// A unit of work submitted to the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier
    pub id: TaskId,
    /// Task type, used to pick a decomposition template
    #[serde(rename = "type")]
    pub task_type: String,
    /// Free-form description of the work
    #[serde(default)]
    pub description: String,
    /// 0 = normal, higher = more urgent
    #[serde(default)]
    pub priority: i32,
}

impl Task {
    /// Create a task with normal priority and an empty description.
    pub fn new(id: impl Into<TaskId>, task_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            description: String::new(),
            priority: 0,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// One step of a decomposed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    /// Unique subtask identifier (`{parent}-{n}` for the default decomposer)
    pub id: TaskId,
    /// Required capability
    #[serde(rename = "type")]
    pub capability: Capability,
    pub description: String,
    /// Task this subtask was decomposed from
    pub parent_task: Option<TaskId>,
    /// Inherited from the parent task
    pub priority: i32,
}

impl Subtask {
    /// Create a subtask of `parent`, inheriting its id and priority.
    pub fn child_of(
        parent: &Task,
        index: usize,
        capability: impl Into<Capability>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("{}-{}", parent.id, index + 1),
            capability: capability.into(),
            description: description.into(),
            parent_task: Some(parent.id.clone()),
            priority: parent.priority,
        }
    }
}
