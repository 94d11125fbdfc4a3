//! Agent-to-agent messaging
//!
//! The message bus is the only resource agents share. Each agent owns a
//! mailbox; other agents write to it through [`MessageBus::send`] and the
//! owner drains it with [`MessageBus::receive`].
//!
//! # Delivery
//!
//! ```text
//!   send ──▶ ┌──────────────┐ ──▶ receive (drain all, FIFO)
//!            │   mailbox    │
//!            └──────────────┘
//!      └───▶ outbox  (forwarding hook for a network transport)
//!      └───▶ history (queryable log)
//! ```
//!
//! Ordering is guaranteed within one mailbox only.

pub mod bus;
pub mod history;
pub mod types;

pub use bus::{MessageBus, SharedMessageBus};
pub use history::{HistoryStats, MessageHistory};
pub use types::{
    AgentId, Content, HandoffContext, Message, MessageId, MessageKind, Payload, RequestBody,
};
