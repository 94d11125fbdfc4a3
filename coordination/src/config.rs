//! Coordination configuration
//!
//! Defaults match the policy constants of the coordination core (retry
//! threshold 3, 60s breaker cooldown, 0.8 workflow success threshold).
//! Every section can be overridden from a TOML file or from `COORD_*`
//! environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::message::AgentId;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    pub bus: BusConfig,
    pub supervisor: SupervisorConfig,
    pub failure: FailureConfig,
    pub handoff: HandoffConfig,
}

/// Message bus settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Maximum retained history entries (None = unbounded)
    pub history_limit: Option<usize>,
}

/// Supervisor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Agent id the supervisor receives responses under
    pub name: AgentId,
    /// How long to wait for a worker's response to one request
    pub response_timeout_ms: u64,
    /// Minimum quality score for a workflow to count as successful
    pub success_threshold: f64,
    /// Attempts per subtask before the workflow fails
    pub max_attempts: u32,
    /// Joins successful subtask summaries
    pub summary_separator: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            name: "supervisor".to_string(),
            response_timeout_ms: 5_000,
            success_threshold: 0.8,
            max_attempts: 3,
            summary_separator: " | ".to_string(),
        }
    }
}

impl SupervisorConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

/// Failure handler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureConfig {
    /// Consecutive failures before the breaker opens
    pub threshold: u32,
    /// Breaker lockout duration
    pub cooldown_secs: u64,
    /// Length of one backoff time unit
    pub backoff_unit_ms: u64,
    /// Cap on the exponential backoff, in units
    pub max_backoff_units: u64,
    /// Ordered roster of agents offered as reroute targets
    pub backup_agents: Vec<AgentId>,
}

impl Default for FailureConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            cooldown_secs: 60,
            backoff_unit_ms: 1_000,
            max_backoff_units: 60,
            backup_agents: Vec::new(),
        }
    }
}

impl FailureConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }
}

/// Handoff protocol settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    /// How long `transfer_with_state` waits for an acknowledgment
    pub ack_timeout_ms: u64,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self { ack_timeout_ms: 100 }
    }
}

impl HandoffConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|v| v.trim().parse().ok())
}

impl CoordinationConfig {
    /// Load configuration from environment variables over the defaults.
    ///
    /// - `COORD_HISTORY_LIMIT`: bus history cap
    /// - `COORD_SUPERVISOR_NAME`, `COORD_RESPONSE_TIMEOUT_MS`,
    ///   `COORD_SUCCESS_THRESHOLD`, `COORD_MAX_ATTEMPTS`
    /// - `COORD_FAILURE_THRESHOLD`, `COORD_COOLDOWN_SECS`,
    ///   `COORD_BACKOFF_UNIT_MS`, `COORD_MAX_BACKOFF_UNITS`,
    ///   `COORD_BACKUP_AGENTS` (comma separated)
    /// - `COORD_HANDOFF_ACK_TIMEOUT_MS`
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(limit) = env_parse("COORD_HISTORY_LIMIT") {
            config.bus.history_limit = Some(limit);
        }

        if let Ok(name) = std::env::var("COORD_SUPERVISOR_NAME") {
            if !name.trim().is_empty() {
                config.supervisor.name = name.trim().to_string();
            }
        }
        if let Some(ms) = env_parse("COORD_RESPONSE_TIMEOUT_MS") {
            config.supervisor.response_timeout_ms = ms;
        }
        if let Some(threshold) = env_parse::<f64>("COORD_SUCCESS_THRESHOLD") {
            config.supervisor.success_threshold = threshold.clamp(0.0, 1.0);
        }
        if let Some(attempts) = env_parse::<u32>("COORD_MAX_ATTEMPTS") {
            config.supervisor.max_attempts = attempts.max(1);
        }

        if let Some(threshold) = env_parse::<u32>("COORD_FAILURE_THRESHOLD") {
            config.failure.threshold = threshold.max(1);
        }
        if let Some(secs) = env_parse("COORD_COOLDOWN_SECS") {
            config.failure.cooldown_secs = secs;
        }
        if let Some(ms) = env_parse("COORD_BACKOFF_UNIT_MS") {
            config.failure.backoff_unit_ms = ms;
        }
        if let Some(units) = env_parse("COORD_MAX_BACKOFF_UNITS") {
            config.failure.max_backoff_units = units;
        }
        if let Ok(agents) = std::env::var("COORD_BACKUP_AGENTS") {
            config.failure.backup_agents = agents
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(ms) = env_parse("COORD_HANDOFF_ACK_TIMEOUT_MS") {
            config.handoff.ack_timeout_ms = ms;
        }

        config
    }

    /// Parse a TOML document; missing sections and fields keep their defaults.
    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Load a TOML config file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}
