//! Worker side of the request/response envelope
//!
//! The coordination core does not execute work itself. A [`WorkerAgent`]
//! owns a mailbox, hands each `ExecuteTask` request to a pluggable
//! [`Executor`], and answers with a correlated RESPONSE carrying a
//! [`SubtaskOutcome`]. HANDOVER messages are acknowledged through the
//! handoff protocol when the executor accepts them, and `CastVote` requests
//! are answered with a [`VoteBallot`] unless the executor abstains.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::consensus::VoteBallot;
use crate::handoff::HandoffProtocol;
use crate::message::{
    AgentId, Content, HandoffContext, Message, Payload, RequestBody, SharedMessageBus,
};
use crate::task::Subtask;

/// How long an idle worker waits on its mailbox before re-checking cancellation
const IDLE_WAIT: Duration = Duration::from_secs(1);

/// Result of executing one subtask, carried in RESPONSE content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubtaskOutcome {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub summary: String,
    /// Executor-defined fields
    #[serde(flatten)]
    pub extra: Content,
}

impl SubtaskOutcome {
    pub fn success(summary: impl Into<String>) -> Self {
        Self {
            success: true,
            summary: summary.into(),
            extra: Content::new(),
        }
    }

    pub fn failure(summary: impl Into<String>) -> Self {
        Self {
            success: false,
            summary: summary.into(),
            extra: Content::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn into_content(self) -> Content {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Content::new(),
        }
    }

    /// Read an outcome from response content.
    ///
    /// Missing fields default to an unsuccessful, empty outcome; content
    /// with mistyped fields is kept whole in `extra`.
    pub fn from_content(content: &Content) -> Self {
        serde_json::from_value(Value::Object(content.clone())).unwrap_or_else(|_| Self {
            success: false,
            summary: String::new(),
            extra: content.clone(),
        })
    }
}

/// Executes subtasks on behalf of a worker agent.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, subtask: &Subtask) -> SubtaskOutcome;

    /// Decide whether to take over the work described by a handoff.
    /// Accepted handoffs are acknowledged to their sender.
    async fn accept_handoff(&self, _handoff: &HandoffContext) -> bool {
        true
    }

    /// Answer a `CastVote` request; `None` abstains.
    async fn cast_vote(&self, _topic: &str, _options: &[String]) -> Option<(String, f64)> {
        None
    }
}

/// Adapts a plain function into an [`Executor`]
pub struct FnExecutor<F>(pub F);

#[async_trait]
impl<F> Executor for FnExecutor<F>
where
    F: Fn(&Subtask) -> SubtaskOutcome + Send + Sync,
{
    async fn execute(&self, subtask: &Subtask) -> SubtaskOutcome {
        (self.0)(subtask)
    }
}

/// Mailbox loop for one worker
pub struct WorkerAgent {
    id: AgentId,
    bus: SharedMessageBus,
    executor: Arc<dyn Executor>,
    handoff: HandoffProtocol,
}

impl WorkerAgent {
    pub fn new(id: impl Into<AgentId>, bus: SharedMessageBus, executor: Arc<dyn Executor>) -> Self {
        let handoff = HandoffProtocol::new(bus.clone());
        Self {
            id: id.into(),
            bus,
            executor,
            handoff,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run on a new tokio task until `cancel` fires
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(worker = %self.id, "Worker started");
        loop {
            let batch = tokio::select! {
                _ = cancel.cancelled() => break,
                batch = self.bus.recv_timeout(&self.id, IDLE_WAIT) => batch,
            };
            for message in batch {
                self.handle(message).await;
            }
        }
        info!(worker = %self.id, "Worker stopped");
    }

    /// Process one message from the mailbox
    pub async fn handle(&self, message: Message) {
        match &message.payload {
            Payload::Request(RequestBody::ExecuteTask { task }) => {
                debug!(worker = %self.id, task_id = %task.id, "Executing subtask");
                let outcome = self.executor.execute(task).await;
                if !outcome.success {
                    warn!(worker = %self.id, task_id = %task.id, summary = %outcome.summary, "Subtask failed");
                }
                self.bus.send(Message::reply_to(
                    &message,
                    Payload::Response(outcome.into_content()),
                ));
            }
            Payload::Request(RequestBody::CastVote { topic, options }) => {
                match self.executor.cast_vote(topic, options).await {
                    Some((selection, confidence)) => {
                        debug!(worker = %self.id, topic = %topic, selection = %selection, "Casting vote");
                        let ballot = VoteBallot::new(topic.clone(), selection, confidence);
                        self.bus.send(Message::reply_to(
                            &message,
                            Payload::Response(ballot.into_content()),
                        ));
                    }
                    None => debug!(worker = %self.id, topic = %topic, "Abstaining"),
                }
            }
            Payload::Handover(context) => {
                if self.executor.accept_handoff(context).await {
                    self.handoff.acknowledge(&message);
                } else {
                    warn!(worker = %self.id, from = %message.sender, "Handoff declined");
                }
            }
            _ => {
                debug!(
                    worker = %self.id,
                    sender = %message.sender,
                    kind = %message.kind(),
                    "Ignoring message"
                );
            }
        }
    }
}
