//! Swarm Coordination Library
//!
//! In-process coordination core for a swarm of cooperating agents:
//! - Message bus with per-agent mailboxes, broadcast and retained history
//! - Supervisor that decomposes tasks and dispatches subtasks to workers
//! - Handoff protocol for moving in-flight task state between agents
//! - Weighted-confidence consensus voting
//! - Failure handler with exponential backoff and per-agent circuit breakers
//!
//! # Architecture
//!
//! ```text
//!   caller ──► Supervisor ──────────────┐
//!                 │   ▲                 │ is_available / handle_failure
//!                 ▼   │                 ▼
//!              MessageBus ◄──────── FailureHandler
//!              ▲   ▲   ▲
//!    ┌─────────┘   │   └──────────┐
//!  WorkerAgent  HandoffProtocol  ConsensusManager
//! ```
//!
//! Agents only talk through the [`MessageBus`](message::MessageBus). Each
//! component owns its own table (workers, votes, failure state) behind its
//! public operations. Status changes are published as
//! [`CoordinationEvent`](events::CoordinationEvent)s on an optional
//! [`EventBus`](events::EventBus).
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use swarm_coordination::{
//!     CoordinationConfig, FailureHandler, FnExecutor, MessageBus, SubtaskOutcome,
//!     Supervisor, Task, WorkerAgent,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! let config = CoordinationConfig::from_env();
//! let bus = MessageBus::with_config(&config.bus).shared();
//! let failures = Arc::new(FailureHandler::new(config.failure.clone()));
//! let supervisor = Supervisor::new(config.supervisor.clone(), bus.clone(), failures);
//!
//! let cancel = CancellationToken::new();
//! let executor = Arc::new(FnExecutor(|s: &swarm_coordination::Subtask| {
//!     SubtaskOutcome::success(format!("done: {}", s.description))
//! }));
//! WorkerAgent::new("worker-1", bus.clone(), executor).spawn(cancel.clone());
//! supervisor.register_worker("worker-1", ["search", "analyze", "synthesize"]);
//!
//! let result = supervisor.run_workflow(&Task::new("t-1", "research")).await?;
//! assert!(result.success);
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod consensus;
pub mod events;
pub mod failure;
pub mod handoff;
pub mod message;
pub mod supervisor;
pub mod task;
pub mod worker;

pub use config::{
    BusConfig, ConfigError, ConfigResult, CoordinationConfig, FailureConfig, HandoffConfig,
    SupervisorConfig,
};
pub use consensus::{
    ConsensusError, ConsensusManager, ConsensusResult, OptionTally, Vote, VoteBallot,
    VoteResult, VoteStatus,
};
pub use events::{CoordinationEvent, EventBus, EventBusExt, EventFilter, SharedEventBus};
pub use failure::{CircuitState, FailureAction, FailureHandler};
pub use handoff::{HandoffBatch, HandoffProtocol, HANDOFF_RECEIVED};
pub use message::{
    AgentId, Content, HandoffContext, HistoryStats, Message, MessageBus, MessageHistory,
    MessageId, MessageKind, Payload, RequestBody, SharedMessageBus,
};
pub use supervisor::{
    AggregateResult, Decomposer, DefaultDecomposer, Supervisor, SupervisorError,
    SupervisorResult, TemplateStep, WorkerRecord, WorkerStatus, WorkflowResult,
};
pub use task::{Capability, Subtask, Task, TaskId};
pub use worker::{Executor, FnExecutor, SubtaskOutcome, WorkerAgent};
