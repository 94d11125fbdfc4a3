//! Supervisor: decomposition, worker selection, dispatch and aggregation

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::decompose::{Decomposer, DefaultDecomposer};
use super::registry::{WorkerRecord, WorkerRegistry};
use crate::config::SupervisorConfig;
use crate::events::bus::emit;
use crate::events::{CoordinationEvent, SharedEventBus};
use crate::failure::{FailureAction, FailureHandler};
use crate::message::{AgentId, Message, MessageId, MessageKind, Payload, RequestBody, SharedMessageBus};
use crate::task::{Capability, Subtask, Task, TaskId};
use crate::worker::SubtaskOutcome;

/// Supervisor failures surfaced to callers
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SupervisorError {
    #[error("unknown worker: {0}")]
    UnknownWorker(AgentId),

    #[error("no available worker for capability '{capability}'")]
    NoAvailableWorker { capability: Capability },

    #[error("subtask {subtask_id} timed out on worker {worker_id} after {timeout_ms}ms")]
    SubtaskTimeout {
        subtask_id: TaskId,
        worker_id: AgentId,
        timeout_ms: u64,
    },
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Combined view over a set of subtask outcomes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub results: Vec<SubtaskOutcome>,
    /// Successful summaries joined with the configured separator
    pub summary: String,
    /// Fraction of successful outcomes; 0 for an empty set
    pub quality_score: f64,
}

/// Outcome of [`Supervisor::run_workflow`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub task: Task,
    pub subtasks: Vec<Subtask>,
    pub subtask_results: Vec<SubtaskOutcome>,
    pub final_result: AggregateResult,
    pub success: bool,
}

/// Central coordinator owning the worker table.
///
/// Responses to its requests arrive in the mailbox named by
/// [`SupervisorConfig::name`]. Workflows are run one at a time since they
/// share that mailbox.
pub struct Supervisor {
    config: SupervisorConfig,
    bus: SharedMessageBus,
    failures: Arc<FailureHandler>,
    decomposer: Box<dyn Decomposer>,
    workers: Mutex<WorkerRegistry>,
    events: Option<SharedEventBus>,
    workflow_lock: tokio::sync::Mutex<()>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, bus: SharedMessageBus, failures: Arc<FailureHandler>) -> Self {
        Self {
            config,
            bus,
            failures,
            decomposer: Box::new(DefaultDecomposer::new()),
            workers: Mutex::new(WorkerRegistry::new()),
            events: None,
            workflow_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Replace the default table-driven decomposition
    pub fn with_decomposer(mut self, decomposer: impl Decomposer + 'static) -> Self {
        self.decomposer = Box::new(decomposer);
        self
    }

    pub fn with_events(mut self, events: SharedEventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn failures(&self) -> &Arc<FailureHandler> {
        &self.failures
    }

    fn lock_workers(&self) -> MutexGuard<'_, WorkerRegistry> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register (or re-register) a worker as AVAILABLE.
    pub fn register_worker<I, C>(&self, worker_id: impl Into<AgentId>, capabilities: I)
    where
        I: IntoIterator<Item = C>,
        C: Into<Capability>,
    {
        let worker_id = worker_id.into();
        let capabilities: BTreeSet<Capability> = capabilities.into_iter().map(Into::into).collect();
        info!(worker = %worker_id, capabilities = ?capabilities, "Registering worker");

        let listed = capabilities.iter().cloned().collect();
        self.lock_workers().register(worker_id.clone(), capabilities);
        emit(
            &self.events,
            CoordinationEvent::WorkerRegistered {
                worker_id,
                capabilities: listed,
                timestamp: chrono::Utc::now(),
            },
        );
    }

    /// Snapshot of every registered worker
    pub fn workers(&self) -> BTreeMap<AgentId, WorkerRecord> {
        self.lock_workers()
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect()
    }

    pub fn worker(&self, worker_id: &str) -> Option<WorkerRecord> {
        self.lock_workers().get(worker_id).cloned()
    }

    pub fn decompose_task(&self, task: &Task) -> Vec<Subtask> {
        self.decomposer.decompose(task)
    }

    /// Choose a worker for `subtask`, skipping busy workers and open circuits.
    pub fn select_worker(&self, subtask: &Subtask) -> SupervisorResult<AgentId> {
        let workers = self.lock_workers();
        workers
            .select(subtask, |id| self.failures.is_available(id))
            .ok_or_else(|| SupervisorError::NoAvailableWorker {
                capability: subtask.capability.clone(),
            })
    }

    /// [`select_worker`](Self::select_worker) restricted to workers accepted by `allowed`.
    fn select_worker_where<F>(&self, subtask: &Subtask, allowed: F) -> Option<AgentId>
    where
        F: Fn(&str) -> bool,
    {
        let workers = self.lock_workers();
        workers.select(subtask, |id| allowed(id) && self.failures.is_available(id))
    }

    fn is_selectable(&self, worker_id: &str) -> bool {
        let workers = self.lock_workers();
        workers.get(worker_id).is_some_and(|record| record.is_available())
            && self.failures.is_available(worker_id)
    }

    /// Mark `worker_id` BUSY and send it the subtask request.
    pub fn assign_task(&self, subtask: &Subtask, worker_id: &str) -> SupervisorResult<MessageId> {
        self.dispatch(subtask, worker_id, 1)
    }

    fn dispatch(&self, subtask: &Subtask, worker_id: &str, attempt: u32) -> SupervisorResult<MessageId> {
        if !self.lock_workers().mark_busy(worker_id, &subtask.id) {
            return Err(SupervisorError::UnknownWorker(worker_id.to_string()));
        }

        let request = Message::new(
            self.config.name.clone(),
            worker_id,
            Payload::Request(RequestBody::ExecuteTask {
                task: subtask.clone(),
            }),
        )
        .requiring_response()
        .with_priority(subtask.priority);
        let message_id = request.id.clone();
        self.bus.send(request);

        debug!(task_id = %subtask.id, worker = %worker_id, attempt, "Assigned subtask");
        emit(
            &self.events,
            CoordinationEvent::TaskAssigned {
                task_id: subtask.id.clone(),
                worker_id: worker_id.to_string(),
                message_id: message_id.clone(),
                attempt,
                timestamp: chrono::Utc::now(),
            },
        );
        Ok(message_id)
    }

    /// Join successful summaries and score the share of successes.
    pub fn aggregate_results(&self, results: &[SubtaskOutcome]) -> AggregateResult {
        let successful: Vec<&str> = results
            .iter()
            .filter(|r| r.success)
            .map(|r| r.summary.as_str())
            .collect();
        let quality_score = if results.is_empty() {
            0.0
        } else {
            successful.len() as f64 / results.len() as f64
        };

        AggregateResult {
            results: results.to_vec(),
            summary: successful.join(&self.config.summary_separator),
            quality_score,
        }
    }

    /// Decompose `task`, run each subtask on a worker in order and aggregate.
    ///
    /// Fails if some subtask finds no selectable worker or exhausts its
    /// attempts without a response.
    pub async fn run_workflow(&self, task: &Task) -> SupervisorResult<WorkflowResult> {
        let _running = self.workflow_lock.lock().await;

        let subtasks = self.decompose_task(task);
        info!(task_id = %task.id, task_type = %task.task_type, subtasks = subtasks.len(), "Starting workflow");

        let mut subtask_results = Vec::with_capacity(subtasks.len());
        for subtask in &subtasks {
            subtask_results.push(self.run_subtask(subtask).await?);
        }

        let final_result = self.aggregate_results(&subtask_results);
        let success = final_result.quality_score >= self.config.success_threshold;
        info!(
            task_id = %task.id,
            quality_score = final_result.quality_score,
            success,
            "Workflow finished"
        );
        emit(
            &self.events,
            CoordinationEvent::WorkflowCompleted {
                task_id: task.id.clone(),
                subtasks: subtasks.len(),
                quality_score: final_result.quality_score,
                success,
                timestamp: chrono::Utc::now(),
            },
        );

        Ok(WorkflowResult {
            task: task.clone(),
            subtasks,
            subtask_results,
            final_result,
            success,
        })
    }

    /// Run one subtask until some worker answers.
    ///
    /// Each worker gets at most `max_attempts` tries at the subtask. When a
    /// worker's tries are spent, or its breaker opens, the subtask moves to
    /// the reroute alternative or to the next selectable worker that still
    /// has tries left. The last timeout is returned once no such worker
    /// remains.
    async fn run_subtask(&self, subtask: &Subtask) -> SupervisorResult<SubtaskOutcome> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut tries: HashMap<AgentId, u32> = HashMap::new();
        let mut worker_id = self.select_worker(subtask)?;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let request_id = self.dispatch(subtask, &worker_id, attempt)?;
            let started = Instant::now();

            if let Some(outcome) = self.await_response(&request_id, &worker_id).await {
                let elapsed = started.elapsed();
                self.lock_workers().complete(&worker_id, elapsed);
                emit(
                    &self.events,
                    CoordinationEvent::SubtaskCompleted {
                        task_id: subtask.id.clone(),
                        worker_id: worker_id.clone(),
                        success: outcome.success,
                        latency_ms: elapsed.as_millis() as u64,
                        timestamp: chrono::Utc::now(),
                    },
                );
                if outcome.success {
                    self.failures.record_success(&worker_id);
                } else {
                    // The subtask has its answer; the action only matters for later selection.
                    let action = self
                        .failures
                        .handle_failure(&worker_id, &subtask.id, &outcome.summary);
                    debug!(task_id = %subtask.id, worker = %worker_id, ?action, "Worker reported failure");
                }
                return Ok(outcome);
            }

            self.lock_workers().release(&worker_id);
            let error = SupervisorError::SubtaskTimeout {
                subtask_id: subtask.id.clone(),
                worker_id: worker_id.clone(),
                timeout_ms: self.config.response_timeout_ms,
            };
            warn!(task_id = %subtask.id, worker = %worker_id, attempt, "No response from worker");
            emit(
                &self.events,
                CoordinationEvent::SubtaskFailed {
                    task_id: subtask.id.clone(),
                    worker_id: worker_id.clone(),
                    error: error.to_string(),
                    timestamp: chrono::Utc::now(),
                },
            );

            let used = tries.entry(worker_id.clone()).or_insert(0);
            *used += 1;
            let spent = *used >= max_attempts;

            let action = self
                .failures
                .handle_failure(&worker_id, &subtask.id, &error.to_string());
            let preferred = match action {
                FailureAction::Retry { delay, .. } if !spent => {
                    tokio::time::sleep(delay).await;
                    Some(worker_id.clone())
                }
                FailureAction::Retry { .. } => None,
                FailureAction::Reroute { alternative, .. } => alternative,
            };

            let has_tries = |id: &str| tries.get(id).map_or(true, |n| *n < max_attempts);
            let next = preferred
                .filter(|id| has_tries(id) && self.is_selectable(id))
                .or_else(|| self.select_worker_where(subtask, has_tries));
            match next {
                Some(next) => {
                    if next != worker_id {
                        info!(task_id = %subtask.id, from = %worker_id, to = %next, "Rerouting subtask");
                    }
                    worker_id = next;
                }
                None => return Err(error),
            }
        }
    }

    /// Wait for the response to `request_id`, discarding anything else
    /// that reaches the supervisor's mailbox meanwhile.
    async fn await_response(&self, request_id: &str, worker_id: &str) -> Option<SubtaskOutcome> {
        let deadline = Instant::now() + self.config.response_timeout();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let batch = self.bus.recv_timeout(&self.config.name, remaining).await;

            let mut matched = None;
            for message in batch {
                if matched.is_none() && is_response_to(&message, request_id, worker_id) {
                    matched = message.content().map(SubtaskOutcome::from_content);
                } else {
                    debug!(
                        sender = %message.sender,
                        kind = %message.kind(),
                        correlation_id = ?message.correlation_id,
                        "Discarding stale message"
                    );
                }
            }

            if matched.is_some() {
                return matched;
            }
            if Instant::now() >= deadline {
                return None;
            }
        }
    }
}

/// Correlated responses always match; uncorrelated ones only from the worker itself.
fn is_response_to(message: &Message, request_id: &str, worker_id: &str) -> bool {
    if message.kind() != MessageKind::Response {
        return false;
    }
    match &message.correlation_id {
        Some(id) => id == request_id,
        None => message.sender == worker_id,
    }
}
