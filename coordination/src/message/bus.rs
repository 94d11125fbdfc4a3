//! In-process message bus
//!
//! Per-agent mailboxes with drain-on-receive semantics, a global outbox for a
//! future network binding, and a history log of every message sent.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::history::MessageHistory;
use super::types::{AgentId, Message, MessageId, Payload};
use crate::config::BusConfig;

/// Shared reference to MessageBus
pub type SharedMessageBus = Arc<MessageBus>;

#[derive(Default)]
struct Mailbox {
    queue: Vec<Message>,
    notify: Arc<Notify>,
}

#[derive(Default)]
struct BusState {
    mailboxes: HashMap<AgentId, Mailbox>,
    outbox: Vec<Message>,
    history: VecDeque<Message>,
}

/// Mailbox-per-agent message bus.
///
/// `send` may be called concurrently from any number of producers. Each
/// mailbox has a single consumer, its owning agent, which drains it
/// atomically with [`receive`](Self::receive) or
/// [`recv_timeout`](Self::recv_timeout).
pub struct MessageBus {
    state: Mutex<BusState>,
    history_limit: Option<usize>,
}

impl MessageBus {
    /// Create a bus with unbounded history
    pub fn new() -> Self {
        Self::with_config(&BusConfig::default())
    }

    pub fn with_config(config: &BusConfig) -> Self {
        Self {
            state: Mutex::new(BusState::default()),
            history_limit: config.history_limit,
        }
    }

    /// Create a shared reference to this bus
    pub fn shared(self) -> SharedMessageBus {
        Arc::new(self)
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        // Every mutation leaves the state consistent, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver a message to its receiver's mailbox.
    ///
    /// Never fails. The receiver is not validated; addressing an unknown
    /// agent simply creates its mailbox.
    pub fn send(&self, message: Message) {
        let mut state = self.lock();

        debug!(
            id = %message.id,
            sender = %message.sender,
            receiver = %message.receiver,
            kind = %message.kind(),
            priority = message.priority,
            "Message sent"
        );

        state.outbox.push(message.clone());
        state.history.push_back(message.clone());
        if let Some(limit) = self.history_limit {
            while state.history.len() > limit {
                state.history.pop_front();
            }
        }

        let mailbox = state.mailboxes.entry(message.receiver.clone()).or_default();
        mailbox.queue.push(message);
        mailbox.notify.notify_one();
    }

    /// Drain and return every message currently queued for `agent`, in send order.
    pub fn receive(&self, agent: &str) -> Vec<Message> {
        let mut state = self.lock();
        let drained = state
            .mailboxes
            .get_mut(agent)
            .map(|mailbox| std::mem::take(&mut mailbox.queue))
            .unwrap_or_default();

        if !drained.is_empty() {
            trace!(agent, count = drained.len(), "Mailbox drained");
        }
        drained
    }

    /// Wait until `agent` has mail, then drain it.
    ///
    /// Returns an empty batch if nothing arrives within `timeout`.
    pub async fn recv_timeout(&self, agent: &str, timeout: Duration) -> Vec<Message> {
        let deadline = Instant::now() + timeout;
        let notify = self.notify_handle(agent);

        loop {
            let batch = self.receive(agent);
            if !batch.is_empty() {
                return batch;
            }
            if tokio::time::timeout_at(deadline, notify.notified())
                .await
                .is_err()
            {
                return self.receive(agent);
            }
        }
    }

    fn notify_handle(&self, agent: &str) -> Arc<Notify> {
        let mut state = self.lock();
        state
            .mailboxes
            .entry(agent.to_string())
            .or_default()
            .notify
            .clone()
    }

    /// Send one independent copy of `payload` to each receiver.
    ///
    /// Each copy gets a fresh id. Returns the ids in receiver order.
    pub fn broadcast(
        &self,
        sender: &str,
        payload: Payload,
        receivers: &[AgentId],
    ) -> Vec<MessageId> {
        receivers
            .iter()
            .map(|receiver| {
                let message = Message::new(sender, receiver.clone(), payload.clone());
                let id = message.id.clone();
                self.send(message);
                id
            })
            .collect()
    }

    /// Number of messages waiting for `agent`, without draining.
    pub fn pending(&self, agent: &str) -> usize {
        self.lock()
            .mailboxes
            .get(agent)
            .map(|mailbox| mailbox.queue.len())
            .unwrap_or(0)
    }

    /// Snapshot of every message sent since the outbox was last drained
    pub fn outbox(&self) -> Vec<Message> {
        self.lock().outbox.clone()
    }

    /// Take the outbox, e.g. to forward it over a network transport
    pub fn drain_outbox(&self) -> Vec<Message> {
        std::mem::take(&mut self.lock().outbox)
    }

    /// Snapshot of the message history, oldest first
    pub fn history(&self) -> MessageHistory {
        MessageHistory::new(self.lock().history.iter().cloned().collect())
    }

    pub fn history_len(&self) -> usize {
        self.lock().history.len()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
