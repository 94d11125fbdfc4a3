//! Agent-to-agent handoffs with acknowledgment
//!
//! A handoff moves in-flight task context from one agent to another as a
//! priority-1 HANDOVER message. The target confirms with a RESPONSE whose
//! content carries `status = "handoff_received"`. The exchange is best
//! effort: a lost acknowledgment reads as a failed transfer and the
//! protocol never resends on its own.

use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::HandoffConfig;
use crate::events::bus::emit;
use crate::events::{CoordinationEvent, SharedEventBus};
use crate::message::{
    Content, HandoffContext, Message, MessageId, MessageKind, Payload, SharedMessageBus,
};

/// Acknowledgment status sent back by the handoff target
pub const HANDOFF_RECEIVED: &str = "handoff_received";

/// Reason used by [`HandoffProtocol::transfer_with_state`]
pub const TASK_TRANSFER_REASON: &str = "task_transfer";

const HANDOFF_PRIORITY: i32 = 1;

/// Everything drained from a mailbox while looking for a handoff
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandoffBatch {
    /// First HANDOVER message in the drained batch
    pub handoff: Option<Message>,
    /// All other drained messages, in delivery order
    pub others: Vec<Message>,
}

#[derive(Clone)]
pub struct HandoffProtocol {
    bus: SharedMessageBus,
    config: HandoffConfig,
    events: Option<SharedEventBus>,
}

impl HandoffProtocol {
    pub fn new(bus: SharedMessageBus) -> Self {
        Self {
            bus,
            config: HandoffConfig::default(),
            events: None,
        }
    }

    pub fn with_config(mut self, config: HandoffConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_events(mut self, events: SharedEventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Build (without sending) a HANDOVER message from `from` to `to`.
    pub fn create_handoff(&self, from: &str, to: &str, context: Value, reason: &str) -> Message {
        Message::new(
            from,
            to,
            Payload::Handover(HandoffContext {
                handoff_reason: reason.to_string(),
                transferred_context: context,
                handoff_timestamp: chrono::Utc::now(),
            }),
        )
        .with_priority(HANDOFF_PRIORITY)
    }

    /// Create and send a handoff, returning its message id.
    pub fn send_handoff(&self, from: &str, to: &str, context: Value, reason: &str) -> MessageId {
        let handoff = self.create_handoff(from, to, context, reason);
        let message_id = handoff.id.clone();
        self.bus.send(handoff);

        info!(from, to, reason, "Handoff sent");
        emit(
            &self.events,
            CoordinationEvent::HandoffSent {
                from: from.to_string(),
                to: to.to_string(),
                message_id: message_id.clone(),
                reason: reason.to_string(),
                timestamp: chrono::Utc::now(),
            },
        );
        message_id
    }

    /// Drain `agent`'s mailbox and split out the first HANDOVER message.
    pub fn accept_handoff_batch(&self, agent: &str) -> HandoffBatch {
        let mut batch = HandoffBatch::default();
        for message in self.bus.receive(agent) {
            if batch.handoff.is_none() && message.kind() == MessageKind::Handover {
                batch.handoff = Some(message);
            } else {
                batch.others.push(message);
            }
        }
        batch
    }

    /// Drain `agent`'s mailbox and return the first HANDOVER message.
    ///
    /// Every other drained message is dropped. Callers that may have other
    /// traffic pending should use [`accept_handoff_batch`](Self::accept_handoff_batch).
    pub fn accept_handoff(&self, agent: &str) -> Option<Message> {
        let batch = self.accept_handoff_batch(agent);
        if !batch.others.is_empty() {
            debug!(agent, dropped = batch.others.len(), "Dropping non-handoff messages");
        }
        batch.handoff
    }

    /// Confirm receipt of `handoff` to its sender.
    pub fn acknowledge(&self, handoff: &Message) {
        let mut content = Content::new();
        content.insert("status".into(), Value::from(HANDOFF_RECEIVED));
        content.insert("handoff_id".into(), Value::from(handoff.id.clone()));
        self.bus
            .send(Message::reply_to(handoff, Payload::Response(content)));
        debug!(from = %handoff.sender, to = %handoff.receiver, "Handoff acknowledged");
    }

    /// Hand `task` and its working `state` from `from` to `to`, then wait up
    /// to the acknowledgment timeout for `to` to confirm.
    ///
    /// Messages for `from` that arrive during the wait and are not the
    /// acknowledgment are consumed and dropped.
    pub async fn transfer_with_state(&self, from: &str, to: &str, state: Content, task: Value) -> bool {
        let progress = state.get("progress").cloned().unwrap_or_else(|| json!(0));
        let context = json!({
            "task_state": state,
            "task_details": task,
            "progress": progress,
        });
        let handoff_id = self.send_handoff(from, to, context, TASK_TRANSFER_REASON);

        let deadline = Instant::now() + self.config.ack_timeout();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let batch = self.bus.recv_timeout(from, remaining).await;

            let mut acknowledged = false;
            for message in batch {
                if is_acknowledgment(&message, to, &handoff_id) {
                    acknowledged = true;
                } else {
                    debug!(agent = from, sender = %message.sender, kind = %message.kind(), "Dropping message while awaiting handoff ack");
                }
            }

            if acknowledged {
                emit(
                    &self.events,
                    CoordinationEvent::HandoffAcknowledged {
                        from: from.to_string(),
                        to: to.to_string(),
                        timestamp: chrono::Utc::now(),
                    },
                );
                return true;
            }
            if Instant::now() >= deadline {
                warn!(from, to, timeout_ms = self.config.ack_timeout_ms, "Handoff not acknowledged");
                emit(
                    &self.events,
                    CoordinationEvent::HandoffTimedOut {
                        from: from.to_string(),
                        to: to.to_string(),
                        timestamp: chrono::Utc::now(),
                    },
                );
                return false;
            }
        }
    }
}

fn is_acknowledgment(message: &Message, target: &str, handoff_id: &str) -> bool {
    message.kind() == MessageKind::Response
        && message.sender == target
        && message.content_str("status") == Some(HANDOFF_RECEIVED)
        && message
            .correlation_id
            .as_deref()
            .map_or(true, |id| id == handoff_id)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::events::EventBus;
    use crate::message::MessageBus;

    fn state(progress: f64) -> Content {
        let mut state = Content::new();
        state.insert("progress".into(), json!(progress));
        state.insert("notes".into(), json!("halfway"));
        state
    }

    #[test]
    fn test_create_handoff_shape() {
        let protocol = HandoffProtocol::new(MessageBus::new().shared());
        let msg = protocol.create_handoff("a", "b", json!({"k": 1}), "overloaded");

        assert_eq!(msg.kind(), MessageKind::Handover);
        assert_eq!(msg.priority, 1);
        let ctx = msg.handoff().unwrap();
        assert_eq!(ctx.handoff_reason, "overloaded");
        assert_eq!(ctx.transferred_context, json!({"k": 1}));
    }

    #[test]
    fn test_accept_handoff_batch_keeps_others() {
        let bus = MessageBus::new().shared();
        let protocol = HandoffProtocol::new(bus.clone());
        bus.send(Message::new("x", "b", Payload::Alert(Content::new())));
        protocol.send_handoff("a", "b", json!({}), "shift change");
        bus.send(Message::new("y", "b", Payload::Feedback(Content::new())));

        let batch = protocol.accept_handoff_batch("b");
        assert_eq!(batch.handoff.unwrap().sender, "a");
        assert_eq!(batch.others.len(), 2);
        assert_eq!(bus.pending("b"), 0);
    }

    #[test]
    fn test_accept_handoff_none_pending() {
        let bus = MessageBus::new().shared();
        let protocol = HandoffProtocol::new(bus.clone());
        bus.send(Message::new("x", "b", Payload::Alert(Content::new())));

        assert!(protocol.accept_handoff("b").is_none());
        assert_eq!(bus.pending("b"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transfer_without_reply_returns_false() {
        let bus = MessageBus::new().shared();
        let events = EventBus::new().shared();
        let mut rx = events.subscribe();
        let protocol = HandoffProtocol::new(bus.clone()).with_events(events);

        let started = Instant::now();
        let ok = protocol
            .transfer_with_state("a", "b", state(0.5), json!({"id": "t-1"}))
            .await;
        assert!(!ok);
        assert!(started.elapsed() >= Duration::from_millis(100));

        // the handoff itself still reached the target
        let handoff = protocol.accept_handoff("b").unwrap();
        let ctx = handoff.handoff().unwrap();
        assert_eq!(ctx.handoff_reason, TASK_TRANSFER_REASON);
        assert_eq!(ctx.transferred_context["progress"], json!(0.5));
        assert_eq!(ctx.transferred_context["task_details"]["id"], json!("t-1"));

        assert_eq!(rx.recv().await.unwrap().event_type(), "handoff_sent");
        assert_eq!(rx.recv().await.unwrap().event_type(), "handoff_timed_out");
    }

    #[tokio::test]
    async fn test_transfer_acknowledged() {
        let bus = MessageBus::new().shared();
        let protocol = HandoffProtocol::new(bus.clone()).with_config(HandoffConfig {
            ack_timeout_ms: 2_000,
        });

        let responder = {
            let protocol = protocol.clone();
            let bus = bus.clone();
            tokio::spawn(async move {
                let batch = bus.recv_timeout("b", Duration::from_secs(2)).await;
                for message in &batch {
                    if message.kind() == MessageKind::Handover {
                        protocol.acknowledge(message);
                    }
                }
            })
        };

        let ok = protocol
            .transfer_with_state("a", "b", Content::new(), json!({}))
            .await;
        assert!(ok);
        responder.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_from_wrong_agent_ignored() {
        let bus = MessageBus::new().shared();
        let protocol = HandoffProtocol::new(bus.clone());

        let mut content = Content::new();
        content.insert("status".into(), json!(HANDOFF_RECEIVED));
        bus.send(Message::new("c", "a", Payload::Response(content)));

        assert!(!protocol.transfer_with_state("a", "b", Content::new(), json!({})).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_progress_defaults_to_zero() {
        let bus = MessageBus::new().shared();
        let protocol = HandoffProtocol::new(bus.clone());
        protocol
            .transfer_with_state("a", "b", Content::new(), json!(null))
            .await;

        let handoff = protocol.accept_handoff("b").unwrap();
        assert_eq!(handoff.handoff().unwrap().transferred_context["progress"], json!(0));
    }
}
