//! Status events emitted by the coordination components
//!
//! These are the outward-facing view of coordination: collaborators that do
//! not take part in message passing can still follow task outcomes, breaker
//! transitions, handoffs and votes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{AgentId, MessageId};
use crate::task::TaskId;

/// All coordination status events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinationEvent {
    /// A worker was registered (or re-registered) with the supervisor
    WorkerRegistered {
        worker_id: AgentId,
        capabilities: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// A subtask request was sent to a worker
    TaskAssigned {
        task_id: TaskId,
        worker_id: AgentId,
        message_id: MessageId,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },

    /// A worker answered a subtask request
    SubtaskCompleted {
        task_id: TaskId,
        worker_id: AgentId,
        success: bool,
        latency_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A subtask attempt failed without a usable response
    SubtaskFailed {
        task_id: TaskId,
        worker_id: AgentId,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// An agent's circuit breaker opened
    BreakerOpened {
        agent_id: AgentId,
        failure_count: u32,
        cooldown_secs: u64,
        timestamp: DateTime<Utc>,
    },

    /// An agent's circuit breaker closed again
    BreakerClosed {
        agent_id: AgentId,
        timestamp: DateTime<Utc>,
    },

    /// A handoff was sent
    HandoffSent {
        from: AgentId,
        to: AgentId,
        message_id: MessageId,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The target of a handoff acknowledged it
    HandoffAcknowledged {
        from: AgentId,
        to: AgentId,
        timestamp: DateTime<Utc>,
    },

    /// No acknowledgment arrived within the wait window
    HandoffTimedOut {
        from: AgentId,
        to: AgentId,
        timestamp: DateTime<Utc>,
    },

    /// A voting round was opened
    VoteInitiated {
        topic: String,
        agents: Vec<AgentId>,
        options: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// An invited agent cast (or overwrote) its vote
    VoteCast {
        topic: String,
        agent_id: AgentId,
        selection: String,
        confidence: f64,
        timestamp: DateTime<Utc>,
    },

    /// A weighted tally produced a winner
    ConsensusReached {
        topic: String,
        winner: String,
        consensus_strength: f64,
        cast_votes: usize,
        timestamp: DateTime<Utc>,
    },

    /// A supervised workflow finished
    WorkflowCompleted {
        task_id: TaskId,
        subtasks: usize,
        quality_score: f64,
        success: bool,
        timestamp: DateTime<Utc>,
    },
}

impl CoordinationEvent {
    /// Get the timestamp of this event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            CoordinationEvent::WorkerRegistered { timestamp, .. } => *timestamp,
            CoordinationEvent::TaskAssigned { timestamp, .. } => *timestamp,
            CoordinationEvent::SubtaskCompleted { timestamp, .. } => *timestamp,
            CoordinationEvent::SubtaskFailed { timestamp, .. } => *timestamp,
            CoordinationEvent::BreakerOpened { timestamp, .. } => *timestamp,
            CoordinationEvent::BreakerClosed { timestamp, .. } => *timestamp,
            CoordinationEvent::HandoffSent { timestamp, .. } => *timestamp,
            CoordinationEvent::HandoffAcknowledged { timestamp, .. } => *timestamp,
            CoordinationEvent::HandoffTimedOut { timestamp, .. } => *timestamp,
            CoordinationEvent::VoteInitiated { timestamp, .. } => *timestamp,
            CoordinationEvent::VoteCast { timestamp, .. } => *timestamp,
            CoordinationEvent::ConsensusReached { timestamp, .. } => *timestamp,
            CoordinationEvent::WorkflowCompleted { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            CoordinationEvent::WorkerRegistered { .. } => "worker_registered",
            CoordinationEvent::TaskAssigned { .. } => "task_assigned",
            CoordinationEvent::SubtaskCompleted { .. } => "subtask_completed",
            CoordinationEvent::SubtaskFailed { .. } => "subtask_failed",
            CoordinationEvent::BreakerOpened { .. } => "breaker_opened",
            CoordinationEvent::BreakerClosed { .. } => "breaker_closed",
            CoordinationEvent::HandoffSent { .. } => "handoff_sent",
            CoordinationEvent::HandoffAcknowledged { .. } => "handoff_acknowledged",
            CoordinationEvent::HandoffTimedOut { .. } => "handoff_timed_out",
            CoordinationEvent::VoteInitiated { .. } => "vote_initiated",
            CoordinationEvent::VoteCast { .. } => "vote_cast",
            CoordinationEvent::ConsensusReached { .. } => "consensus_reached",
            CoordinationEvent::WorkflowCompleted { .. } => "workflow_completed",
        }
    }

    /// Get the primary agent ID if this event is agent-scoped
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            CoordinationEvent::WorkerRegistered { worker_id, .. } => Some(worker_id),
            CoordinationEvent::TaskAssigned { worker_id, .. } => Some(worker_id),
            CoordinationEvent::SubtaskCompleted { worker_id, .. } => Some(worker_id),
            CoordinationEvent::SubtaskFailed { worker_id, .. } => Some(worker_id),
            CoordinationEvent::BreakerOpened { agent_id, .. } => Some(agent_id),
            CoordinationEvent::BreakerClosed { agent_id, .. } => Some(agent_id),
            CoordinationEvent::HandoffSent { from, .. } => Some(from),
            CoordinationEvent::HandoffAcknowledged { from, .. } => Some(from),
            CoordinationEvent::HandoffTimedOut { from, .. } => Some(from),
            CoordinationEvent::VoteCast { agent_id, .. } => Some(agent_id),
            _ => None,
        }
    }

    /// Get the task ID if this event is task-scoped
    pub fn task_id(&self) -> Option<&str> {
        match self {
            CoordinationEvent::TaskAssigned { task_id, .. } => Some(task_id),
            CoordinationEvent::SubtaskCompleted { task_id, .. } => Some(task_id),
            CoordinationEvent::SubtaskFailed { task_id, .. } => Some(task_id),
            CoordinationEvent::WorkflowCompleted { task_id, .. } => Some(task_id),
            _ => None,
        }
    }

    /// Get the topic if this event belongs to a voting round
    pub fn topic(&self) -> Option<&str> {
        match self {
            CoordinationEvent::VoteInitiated { topic, .. } => Some(topic),
            CoordinationEvent::VoteCast { topic, .. } => Some(topic),
            CoordinationEvent::ConsensusReached { topic, .. } => Some(topic),
            _ => None,
        }
    }
}
