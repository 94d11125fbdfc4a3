//! Worker registry owned by the supervisor
//!
//! Records are created on registration and never removed; a misbehaving
//! worker is taken out of rotation by its circuit breaker instead.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::message::AgentId;
use crate::task::{Capability, Subtask, TaskId};

/// Whether a worker can take new work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Available,
    Busy,
}

/// Completion statistics for one worker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerMetrics {
    pub tasks_completed: u64,
    /// Running mean over completed tasks, in milliseconds
    pub avg_response_time_ms: f64,
}

impl WorkerMetrics {
    fn record(&mut self, elapsed: Duration) {
        let n = self.tasks_completed as f64;
        let sample = elapsed.as_secs_f64() * 1_000.0;
        self.avg_response_time_ms = (self.avg_response_time_ms * n + sample) / (n + 1.0);
        self.tasks_completed += 1;
    }
}

/// Supervisor's view of one worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub capabilities: BTreeSet<Capability>,
    pub status: WorkerStatus,
    pub current_task: Option<TaskId>,
    pub metrics: WorkerMetrics,
}

impl WorkerRecord {
    pub fn new(capabilities: BTreeSet<Capability>) -> Self {
        Self {
            capabilities,
            status: WorkerStatus::Available,
            current_task: None,
            metrics: WorkerMetrics::default(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == WorkerStatus::Available
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

/// Worker table keyed (and therefore ordered) by worker id
#[derive(Debug, Clone, Default)]
pub struct WorkerRegistry {
    workers: BTreeMap<AgentId, WorkerRecord>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a worker as AVAILABLE with fresh metrics.
    pub fn register(&mut self, id: AgentId, capabilities: BTreeSet<Capability>) {
        self.workers.insert(id, WorkerRecord::new(capabilities));
    }

    pub fn get(&self, id: &str) -> Option<&WorkerRecord> {
        self.workers.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AgentId, &WorkerRecord)> {
        self.workers.iter()
    }

    /// Pick a worker for `subtask`.
    ///
    /// Candidates are AVAILABLE workers accepted by `selectable` that carry
    /// the required capability; if there are none, any AVAILABLE selectable
    /// worker. Among candidates the one with the fewest completed tasks
    /// wins, ties going to the smallest id.
    pub fn select<F>(&self, subtask: &Subtask, selectable: F) -> Option<AgentId>
    where
        F: Fn(&str) -> bool,
    {
        let open: Vec<(&AgentId, &WorkerRecord)> = self
            .workers
            .iter()
            .filter(|(id, record)| record.is_available() && selectable(id))
            .collect();

        let capable: Vec<(&AgentId, &WorkerRecord)> = open
            .iter()
            .copied()
            .filter(|(_, record)| record.has_capability(&subtask.capability))
            .collect();

        let candidates = if capable.is_empty() { open } else { capable };

        candidates
            .into_iter()
            .min_by_key(|(id, record)| (record.metrics.tasks_completed, *id))
            .map(|(id, _)| id.clone())
    }

    /// Mark `id` BUSY on `task`. Returns false for unknown workers.
    pub fn mark_busy(&mut self, id: &str, task: &TaskId) -> bool {
        match self.workers.get_mut(id) {
            Some(record) => {
                record.status = WorkerStatus::Busy;
                record.current_task = Some(task.clone());
                true
            }
            None => false,
        }
    }

    /// Return `id` to AVAILABLE without counting a completion.
    pub fn release(&mut self, id: &str) {
        if let Some(record) = self.workers.get_mut(id) {
            record.status = WorkerStatus::Available;
            record.current_task = None;
        }
    }

    /// Return `id` to AVAILABLE and record a completed task.
    pub fn complete(&mut self, id: &str, elapsed: Duration) {
        if let Some(record) = self.workers.get_mut(id) {
            record.status = WorkerStatus::Available;
            record.current_task = None;
            record.metrics.record(elapsed);
        }
    }
}
