//! Supervisor pattern: one coordinator, many workers
//!
//! ```text
//!            run_workflow(task)
//!                   │
//!            ┌──────▼──────┐   decompose   ┌────────────┐
//!            │ Supervisor  │──────────────►│ Decomposer │
//!            └──┬───────▲──┘               └────────────┘
//!   ExecuteTask │       │ RESPONSE (correlated)
//!            ┌──▼───────┴──┐
//!            │ MessageBus  │
//!            └──┬───────▲──┘
//!            ┌──▼───────┴──┐
//!            │ WorkerAgent │ ──► Executor
//!            └─────────────┘
//! ```
//!
//! Worker selection prefers capable, idle workers with the fewest completed
//! tasks, and never picks a worker whose circuit breaker is open. A worker
//! that does not answer within the response timeout is reported to the
//! [`FailureHandler`](crate::failure::FailureHandler), whose decision drives
//! the retry or reroute of the subtask.

pub mod coordinator;
pub mod decompose;
pub mod registry;

pub use coordinator::{
    AggregateResult, Supervisor, SupervisorError, SupervisorResult, WorkflowResult,
};
pub use decompose::{Decomposer, DefaultDecomposer, TemplateStep, PASS_THROUGH_CAPABILITY};
pub use registry::{WorkerMetrics, WorkerRecord, WorkerRegistry, WorkerStatus};
