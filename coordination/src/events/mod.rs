//! Status events for outside observers
//!
//! Coordination components publish [`CoordinationEvent`]s to an optional
//! shared [`EventBus`]. Subscribers (dashboards, loggers, test harnesses)
//! follow workflow progress without touching the message bus.
//!
//! # Usage
//!
//! ```ignore
//! use swarm_coordination::events::{EventBus, EventBusExt, EventFilter};
//!
//! let events = EventBus::new().shared();
//! let mut breakers = events.subscribe_filtered(
//!     EventFilter::new().types(vec!["breaker_opened", "breaker_closed"]),
//! );
//!
//! let failures = FailureHandler::new(config.failure).with_events(events.clone());
//! // ...
//! let event = breakers.recv().await?;
//! ```

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventBusExt, EventFilter, FilteredReceiver, SharedEventBus};
pub use types::CoordinationEvent;
