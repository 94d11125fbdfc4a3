//! Event bus for coordination status events
//!
//! Provides pub/sub messaging using Tokio broadcast channels. Publishing
//! never blocks and never fails for lack of subscribers.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::CoordinationEvent;
use crate::message::AgentId;
use crate::task::TaskId;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Event bus with broadcast channels
pub struct EventBus {
    /// Broadcast sender for publishing events
    sender: broadcast::Sender<CoordinationEvent>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: CoordinationEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => debug!(event_type, receivers = count, "Event published"),
            Err(_) => debug!(event_type, "Event published (no receivers)"),
        }
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinationEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if the bus has any subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Publish to an optional bus; components run fine without one.
pub(crate) fn emit(bus: &Option<SharedEventBus>, event: CoordinationEvent) {
    if let Some(bus) = bus {
        bus.publish(event);
    }
}

/// Selects events by agent, task, voting topic or type.
///
/// Each dimension is optional. An event that carries no value for a
/// dimension (e.g. a breaker event has no task) is not excluded by it.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub agent_id: Option<AgentId>,
    pub task_id: Option<TaskId>,
    pub topic: Option<String>,
    pub event_types: Option<Vec<String>>,
}

fn scope_matches(wanted: &Option<String>, actual: Option<&str>) -> bool {
    match (wanted, actual) {
        (Some(wanted), Some(actual)) => wanted == actual,
        _ => true,
    }
}

impl EventFilter {
    /// Matches every event
    pub fn new() -> Self {
        Self::default()
    }

    pub fn agent(mut self, agent_id: &str) -> Self {
        self.agent_id = Some(agent_id.to_string());
        self
    }

    pub fn task(mut self, task_id: &str) -> Self {
        self.task_id = Some(task_id.to_string());
        self
    }

    pub fn topic(mut self, topic: &str) -> Self {
        self.topic = Some(topic.to_string());
        self
    }

    /// Only pass events whose [`event_type`](CoordinationEvent::event_type) is listed
    pub fn types(mut self, event_types: Vec<&str>) -> Self {
        self.event_types = Some(event_types.into_iter().map(String::from).collect());
        self
    }

    pub fn matches(&self, event: &CoordinationEvent) -> bool {
        let type_ok = self
            .event_types
            .as_ref()
            .map_or(true, |types| types.iter().any(|t| t == event.event_type()));

        type_ok
            && scope_matches(&self.agent_id, event.agent_id())
            && scope_matches(&self.task_id, event.task_id())
            && scope_matches(&self.topic, event.topic())
    }
}

/// Filtered event receiver that only yields matching events
pub struct FilteredReceiver {
    receiver: broadcast::Receiver<CoordinationEvent>,
    filter: EventFilter,
}

impl FilteredReceiver {
    /// Create a new filtered receiver
    pub fn new(receiver: broadcast::Receiver<CoordinationEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next matching event
    pub async fn recv(&mut self) -> Result<CoordinationEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

/// Extension trait for subscribing with filters
pub trait EventBusExt {
    /// Subscribe with a filter
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver;
}

impl EventBusExt for EventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

impl EventBusExt for SharedEventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}
