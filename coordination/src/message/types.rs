//! Message envelope and typed payloads
//!
//! Every message carries exactly one [`Payload`]; its variant determines the
//! [`MessageKind`]. Kind-specific data (task requests, handoff context) is
//! strongly typed, while responses, feedback and alerts keep an open
//! key-value [`Content`] map for agent-defined fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::Subtask;

/// Identifier an agent is addressed by
pub type AgentId = String;

/// Unique identifier for messages
pub type MessageId = String;

/// Open key-value payload
pub type Content = serde_json::Map<String, Value>;

/// Coarse message category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
    Handover,
    Feedback,
    Alert,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Handover => "handover",
            Self::Feedback => "feedback",
            Self::Alert => "alert",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a REQUEST asks its receiver to do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RequestBody {
    /// Execute one subtask and reply with a [`SubtaskOutcome`](crate::worker::SubtaskOutcome)
    ExecuteTask { task: Subtask },
    /// Cast a vote on a consensus topic
    CastVote { topic: String, options: Vec<String> },
    /// Anything else agents agree on between themselves
    Custom(Content),
}

/// Context carried by a HANDOVER message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffContext {
    pub handoff_reason: String,
    pub transferred_context: Value,
    pub handoff_timestamp: DateTime<Utc>,
}

/// Typed message body, one variant per [`MessageKind`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "content", rename_all = "snake_case")]
pub enum Payload {
    Request(RequestBody),
    Response(Content),
    Handover(HandoffContext),
    Feedback(Content),
    Alert(Content),
}

impl Payload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::Request(_) => MessageKind::Request,
            Payload::Response(_) => MessageKind::Response,
            Payload::Handover(_) => MessageKind::Handover,
            Payload::Feedback(_) => MessageKind::Feedback,
            Payload::Alert(_) => MessageKind::Alert,
        }
    }
}

/// Message exchanged between agents. Immutable once sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: AgentId,
    pub receiver: AgentId,
    pub payload: Payload,
    pub timestamp: DateTime<Utc>,
    pub requires_response: bool,
    /// 0 = normal, higher = more urgent
    pub priority: i32,
    /// Id of the message this one answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<MessageId>,
}

impl Message {
    /// Create a message with a fresh id and normal priority.
    pub fn new(sender: impl Into<AgentId>, receiver: impl Into<AgentId>, payload: Payload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender: sender.into(),
            receiver: receiver.into(),
            payload,
            timestamp: Utc::now(),
            requires_response: false,
            priority: 0,
            correlation_id: None,
        }
    }

    /// Build a RESPONSE-style reply addressed back to the sender of `request`.
    pub fn reply_to(request: &Message, payload: Payload) -> Self {
        let mut reply = Self::new(request.receiver.clone(), request.sender.clone(), payload);
        reply.correlation_id = Some(request.id.clone());
        reply
    }

    pub fn requiring_response(mut self) -> Self {
        self.requires_response = true;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// Open content of a response, feedback or alert message.
    pub fn content(&self) -> Option<&Content> {
        match &self.payload {
            Payload::Response(c) | Payload::Feedback(c) | Payload::Alert(c) => Some(c),
            Payload::Request(RequestBody::Custom(c)) => Some(c),
            _ => None,
        }
    }

    /// String field from the open content, if present.
    pub fn content_str(&self, key: &str) -> Option<&str> {
        self.content()?.get(key)?.as_str()
    }

    pub fn handoff(&self) -> Option<&HandoffContext> {
        match &self.payload {
            Payload::Handover(ctx) => Some(ctx),
            _ => None,
        }
    }

    /// Whether this message answers the message with id `request_id`.
    pub fn answers(&self, request_id: &str) -> bool {
        self.correlation_id.as_deref() == Some(request_id)
    }
}
