//! Per-agent failure tracking, exponential backoff and circuit breaking.
//!
//! Each agent moves through three states:
//!
//! ```text
//!            failure (count < threshold)
//! Healthy ───────────────────────────────▶ Degrading
//!    ▲  ▲                                     │
//!    │  │ success                             │ failure (count == threshold)
//!    │  └─────────────────────────────────────┤
//!    │                                        ▼
//!    └──────── availability check ─────────  Open
//!              after cooldown expired
//! ```
//!
//! Below the threshold a failure yields [`FailureAction::Retry`] with
//! `min(2^count, max_backoff_units)` units of delay. Reaching the threshold
//! opens the breaker and yields [`FailureAction::Reroute`]. Breaker expiry is
//! applied lazily, on the next [`FailureHandler::is_available`] check.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::FailureConfig;
use crate::events::bus::emit;
use crate::events::{CoordinationEvent, SharedEventBus};
use crate::message::AgentId;

/// Logical breaker state for a single agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// No recent failures.
    Healthy,
    /// Some failures, still below the threshold.
    Degrading,
    /// Breaker active; the agent is skipped until cooldown expires.
    Open,
}

/// What the caller should do after a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FailureAction {
    /// Try the same agent again after `delay`.
    Retry {
        reason: String,
        retry_count: u32,
        delay: Duration,
    },
    /// The agent's breaker opened; move the work elsewhere.
    Reroute {
        reason: String,
        alternative: Option<AgentId>,
    },
}

impl FailureAction {
    pub fn is_retry(&self) -> bool {
        matches!(self, FailureAction::Retry { .. })
    }

    pub fn is_reroute(&self) -> bool {
        matches!(self, FailureAction::Reroute { .. })
    }
}

#[derive(Debug, Clone, Default)]
struct FailureState {
    failure_count: u32,
    breaker_until: Option<Instant>,
}

impl FailureState {
    fn breaker_active(&self, now: Instant) -> bool {
        self.breaker_until.is_some_and(|until| now < until)
    }

    fn breaker_expired(&self, now: Instant) -> bool {
        self.breaker_until.is_some_and(|until| now >= until)
    }
}

/// Failure bookkeeping for every agent that ever failed.
///
/// Agents that were never seen are healthy and available.
pub struct FailureHandler {
    states: Mutex<HashMap<AgentId, FailureState>>,
    config: FailureConfig,
    events: Option<SharedEventBus>,
}

impl FailureHandler {
    pub fn new(config: FailureConfig) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            config,
            events: None,
        }
    }

    /// Publish breaker transitions to `events`
    pub fn with_events(mut self, events: SharedEventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &FailureConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AgentId, FailureState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a failure of `agent` while working on `task_id`.
    pub fn handle_failure(&self, agent: &str, task_id: &str, error: &str) -> FailureAction {
        let now = Instant::now();
        let mut states = self.lock();

        let state = states.entry(agent.to_string()).or_default();
        if state.breaker_expired(now) {
            *state = FailureState::default();
        }
        state.failure_count += 1;
        let count = state.failure_count;

        if count >= self.config.threshold {
            state.breaker_until = Some(now + self.config.cooldown());
            let alternative = self.find_alternative(&states, agent, now);
            drop(states);

            warn!(
                agent,
                task_id,
                failures = count,
                cooldown_secs = self.config.cooldown_secs,
                alternative = ?alternative,
                "Circuit breaker opened"
            );
            emit(
                &self.events,
                CoordinationEvent::BreakerOpened {
                    agent_id: agent.to_string(),
                    failure_count: count,
                    cooldown_secs: self.config.cooldown_secs,
                    timestamp: Utc::now(),
                },
            );

            return FailureAction::Reroute {
                reason: "circuit_breaker_activated".to_string(),
                alternative,
            };
        }
        drop(states);

        let delay = self.backoff_delay(count);
        info!(agent, task_id, failures = count, ?delay, error, "Agent failure, retrying");

        FailureAction::Retry {
            reason: error.to_string(),
            retry_count: count,
            delay,
        }
    }

    /// `backoff_unit * min(2^failures, max_backoff_units)`
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        let units = 1u64
            .checked_shl(failures)
            .unwrap_or(u64::MAX)
            .min(self.config.max_backoff_units);
        let units = u32::try_from(units).unwrap_or(u32::MAX);
        self.config.backoff_unit().saturating_mul(units)
    }

    fn find_alternative(
        &self,
        states: &HashMap<AgentId, FailureState>,
        failed: &str,
        now: Instant,
    ) -> Option<AgentId> {
        self.config
            .backup_agents
            .iter()
            .filter(|a| a.as_str() != failed)
            .find(|a| !states.get(*a).is_some_and(|s| s.breaker_active(now)))
            .cloned()
    }

    /// Whether `agent` may be given work.
    ///
    /// False only while the breaker is open. An expired breaker is cleared
    /// here and the failure count reset.
    pub fn is_available(&self, agent: &str) -> bool {
        let now = Instant::now();
        let mut states = self.lock();
        let Some(state) = states.get_mut(agent) else {
            return true;
        };

        if state.breaker_active(now) {
            return false;
        }
        if state.breaker_expired(now) {
            *state = FailureState::default();
            drop(states);
            info!(agent, "Circuit breaker closed after cooldown");
            emit(
                &self.events,
                CoordinationEvent::BreakerClosed {
                    agent_id: agent.to_string(),
                    timestamp: Utc::now(),
                },
            );
        }
        true
    }

    /// Record a success, fully resetting the agent regardless of breaker state.
    pub fn record_success(&self, agent: &str) {
        let mut states = self.lock();
        let had_breaker = states
            .get(agent)
            .is_some_and(|s| s.breaker_until.is_some());
        states.insert(agent.to_string(), FailureState::default());
        drop(states);

        if had_breaker {
            info!(agent, "Circuit breaker closed by success");
            emit(
                &self.events,
                CoordinationEvent::BreakerClosed {
                    agent_id: agent.to_string(),
                    timestamp: Utc::now(),
                },
            );
        }
    }

    /// Current logical state, without applying lazy expiry.
    pub fn state(&self, agent: &str) -> CircuitState {
        let now = Instant::now();
        match self.lock().get(agent) {
            Some(s) if s.breaker_active(now) => CircuitState::Open,
            Some(s) if s.breaker_expired(now) => CircuitState::Healthy,
            Some(s) if s.failure_count > 0 => CircuitState::Degrading,
            _ => CircuitState::Healthy,
        }
    }

    /// Consecutive failures recorded for `agent`.
    pub fn failure_count(&self, agent: &str) -> u32 {
        let now = Instant::now();
        match self.lock().get(agent) {
            Some(s) if s.breaker_expired(now) => 0,
            Some(s) => s.failure_count,
            None => 0,
        }
    }
}

impl Default for FailureHandler {
    fn default() -> Self {
        Self::new(FailureConfig::default())
    }
}
