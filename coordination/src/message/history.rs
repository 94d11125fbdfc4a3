//! Message history queries
//!
//! A [`MessageHistory`] is a point-in-time snapshot of the bus history log,
//! with helpers for debugging conversations after the fact.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{AgentId, Message, MessageKind};

/// Snapshot of sent messages, oldest first
#[derive(Debug, Clone, Default)]
pub struct MessageHistory {
    messages: Vec<Message>,
}

impl MessageHistory {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn from_sender(&self, sender: &str) -> Vec<&Message> {
        self.messages.iter().filter(|m| m.sender == sender).collect()
    }

    pub fn to_receiver(&self, receiver: &str) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|m| m.receiver == receiver)
            .collect()
    }

    pub fn of_kind(&self, kind: MessageKind) -> Vec<&Message> {
        self.messages.iter().filter(|m| m.kind() == kind).collect()
    }

    /// Messages sent at or after `since`
    pub fn since(&self, since: DateTime<Utc>) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|m| m.timestamp >= since)
            .collect()
    }

    /// The message with id `root` followed by every message correlated to it.
    pub fn thread(&self, root: &str) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|m| m.id == root || m.answers(root))
            .collect()
    }

    /// Requests that asked for a response and never got one
    pub fn unanswered(&self) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|m| m.requires_response)
            .filter(|req| !self.messages.iter().any(|m| m.answers(&req.id)))
            .collect()
    }

    pub fn stats(&self) -> HistoryStats {
        let mut stats = HistoryStats::default();
        for message in &self.messages {
            stats.record(message);
        }
        stats
    }
}

/// Counts over a history snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total: usize,
    pub by_kind: HashMap<MessageKind, usize>,
    pub by_sender: HashMap<AgentId, usize>,
    pub by_receiver: HashMap<AgentId, usize>,
    pub requiring_response: usize,
}

impl HistoryStats {
    fn record(&mut self, message: &Message) {
        self.total += 1;
        *self.by_kind.entry(message.kind()).or_insert(0) += 1;
        *self.by_sender.entry(message.sender.clone()).or_insert(0) += 1;
        *self.by_receiver.entry(message.receiver.clone()).or_insert(0) += 1;
        if message.requires_response {
            self.requiring_response += 1;
        }
    }
}
