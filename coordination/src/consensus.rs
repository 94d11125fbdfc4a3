//! Topic-scoped weighted voting
//!
//! Each topic pre-allocates one PENDING slot per invited agent. Votes are
//! weighted by the voter's confidence; the option with the largest summed
//! confidence wins. Ties go to the option listed first when the vote was
//! opened, then to unlisted selections in the order they were first cast.
//!
//! With a bus attached ([`ConsensusManager::with_bus`]) opening a vote also
//! asks each invited agent for a ballot, and [`ConsensusManager::collect_ballots`]
//! applies the [`VoteBallot`] responses.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::events::bus::emit;
use crate::events::{CoordinationEvent, SharedEventBus};
use crate::message::{AgentId, Content, Message, Payload, RequestBody, SharedMessageBus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("topic already exists: {0}")]
    DuplicateTopic(String),
}

pub type VoteResult<T> = Result<T, ConsensusError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteStatus {
    Pending,
    Cast,
}

/// One invited agent's slot on a topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub agent: AgentId,
    pub topic: String,
    pub selection: Option<String>,
    /// In [0, 1]
    pub confidence: f64,
    pub status: VoteStatus,
    pub cast_at: Option<DateTime<Utc>>,
}

/// Tally for one option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionTally {
    pub option: String,
    pub weighted_score: f64,
    pub avg_confidence: f64,
    pub vote_count: usize,
}

/// Result of [`ConsensusManager::calculate_weighted_consensus`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConsensusResult {
    /// Nothing was cast yet
    NoVotes,
    Complete {
        winner: String,
        /// Per-option tallies in tie-break order
        details: Vec<OptionTally>,
        /// Winner's weighted score over the number of cast votes
        consensus_strength: f64,
        cast_votes: usize,
    },
}

impl ConsensusResult {
    pub fn status(&self) -> &'static str {
        match self {
            ConsensusResult::NoVotes => "no_votes",
            ConsensusResult::Complete { .. } => "complete",
        }
    }

    pub fn winner(&self) -> Option<&str> {
        match self {
            ConsensusResult::NoVotes => None,
            ConsensusResult::Complete { winner, .. } => Some(winner),
        }
    }
}

/// RESPONSE content an agent sends back for a `CastVote` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteBallot {
    pub topic: String,
    pub selection: String,
    pub confidence: f64,
}

impl VoteBallot {
    pub fn new(topic: impl Into<String>, selection: impl Into<String>, confidence: f64) -> Self {
        Self {
            topic: topic.into(),
            selection: selection.into(),
            confidence,
        }
    }

    pub fn into_content(self) -> Content {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Content::new(),
        }
    }

    pub fn from_content(content: &Content) -> Option<Self> {
        serde_json::from_value(Value::Object(content.clone())).ok()
    }
}

#[derive(Debug, Default)]
struct Topic {
    options: Vec<String>,
    /// Selections outside `options`, in first-cast order
    unlisted: Vec<String>,
    votes: Vec<Vote>,
}

impl Topic {
    fn rank_order(&self) -> impl Iterator<Item = &String> {
        self.options.iter().chain(self.unlisted.iter())
    }
}

struct BusLink {
    bus: SharedMessageBus,
    name: AgentId,
}

pub struct ConsensusManager {
    topics: Mutex<HashMap<String, Topic>>,
    link: Option<BusLink>,
    events: Option<SharedEventBus>,
}

impl ConsensusManager {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            link: None,
            events: None,
        }
    }

    /// Request ballots over `bus`, receiving them under the agent id `name`
    pub fn with_bus(mut self, bus: SharedMessageBus, name: impl Into<AgentId>) -> Self {
        self.link = Some(BusLink {
            bus,
            name: name.into(),
        });
        self
    }

    pub fn with_events(mut self, events: SharedEventBus) -> Self {
        self.events = Some(events);
        self
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Topic>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a voting round with one PENDING slot per invited agent.
    ///
    /// Repeated agents and options are kept once, at their first position.
    pub fn initiate_vote(&self, topic: &str, agents: &[AgentId], options: &[String]) -> VoteResult<()> {
        let agents = first_occurrences(agents);
        let options = first_occurrences(options);
        {
            let mut topics = self.lock();
            if topics.contains_key(topic) {
                return Err(ConsensusError::DuplicateTopic(topic.to_string()));
            }
            let votes = agents
                .iter()
                .map(|agent| Vote {
                    agent: agent.clone(),
                    topic: topic.to_string(),
                    selection: None,
                    confidence: 0.0,
                    status: VoteStatus::Pending,
                    cast_at: None,
                })
                .collect();
            topics.insert(
                topic.to_string(),
                Topic {
                    options: options.clone(),
                    unlisted: Vec::new(),
                    votes,
                },
            );
        }

        info!(topic, agents = agents.len(), options = options.len(), "Vote initiated");
        emit(
            &self.events,
            CoordinationEvent::VoteInitiated {
                topic: topic.to_string(),
                agents: agents.clone(),
                options: options.clone(),
                timestamp: Utc::now(),
            },
        );

        if let Some(link) = &self.link {
            for agent in &agents {
                let request = Message::new(
                    link.name.clone(),
                    agent.clone(),
                    Payload::Request(RequestBody::CastVote {
                        topic: topic.to_string(),
                        options: options.clone(),
                    }),
                )
                .requiring_response();
                link.bus.send(request);
            }
        }
        Ok(())
    }

    /// Record `agent`'s vote, overwriting any earlier one.
    ///
    /// Votes from agents not invited to `topic` are ignored. Confidence is
    /// clamped into [0, 1], NaN counting as 0. Returns whether a slot was
    /// updated.
    pub fn submit_vote(&self, topic: &str, agent: &str, selection: &str, confidence: f64) -> VoteResult<bool> {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };

        {
            let mut topics = self.lock();
            let entry = topics
                .get_mut(topic)
                .ok_or_else(|| ConsensusError::UnknownTopic(topic.to_string()))?;

            let Some(slot) = entry.votes.iter_mut().find(|v| v.agent == agent) else {
                debug!(topic, agent, "Ignoring vote from uninvited agent");
                return Ok(false);
            };
            slot.selection = Some(selection.to_string());
            slot.confidence = confidence;
            slot.status = VoteStatus::Cast;
            slot.cast_at = Some(Utc::now());

            if !entry.options.iter().any(|o| o == selection)
                && !entry.unlisted.iter().any(|o| o == selection)
            {
                entry.unlisted.push(selection.to_string());
            }
        }

        debug!(topic, agent, selection, confidence, "Vote cast");
        emit(
            &self.events,
            CoordinationEvent::VoteCast {
                topic: topic.to_string(),
                agent_id: agent.to_string(),
                selection: selection.to_string(),
                confidence,
                timestamp: Utc::now(),
            },
        );
        Ok(true)
    }

    /// Tally the cast votes on `topic`.
    pub fn calculate_weighted_consensus(&self, topic: &str) -> VoteResult<ConsensusResult> {
        let topics = self.lock();
        let entry = topics
            .get(topic)
            .ok_or_else(|| ConsensusError::UnknownTopic(topic.to_string()))?;

        let cast: Vec<&Vote> = entry
            .votes
            .iter()
            .filter(|v| v.status == VoteStatus::Cast)
            .collect();
        if cast.is_empty() {
            return Ok(ConsensusResult::NoVotes);
        }

        let details: Vec<OptionTally> = entry
            .rank_order()
            .filter_map(|option| {
                let votes: Vec<f64> = cast
                    .iter()
                    .filter(|v| v.selection.as_deref() == Some(option.as_str()))
                    .map(|v| v.confidence)
                    .collect();
                if votes.is_empty() {
                    return None;
                }
                let weighted_score: f64 = votes.iter().sum();
                Some(OptionTally {
                    option: option.clone(),
                    weighted_score,
                    avg_confidence: weighted_score / votes.len() as f64,
                    vote_count: votes.len(),
                })
            })
            .collect();

        // strict comparison keeps the earliest option on ties
        let Some(best) = details.iter().reduce(|best, tally| {
            if tally.weighted_score > best.weighted_score {
                tally
            } else {
                best
            }
        }) else {
            return Ok(ConsensusResult::NoVotes);
        };
        let winner = best.option.clone();
        let consensus_strength = best.weighted_score / cast.len() as f64;
        let cast_votes = cast.len();
        drop(topics);

        info!(topic, winner = %winner, consensus_strength, cast_votes, "Consensus reached");
        emit(
            &self.events,
            CoordinationEvent::ConsensusReached {
                topic: topic.to_string(),
                winner: winner.clone(),
                consensus_strength,
                cast_votes,
                timestamp: Utc::now(),
            },
        );

        Ok(ConsensusResult::Complete {
            winner,
            details,
            consensus_strength,
            cast_votes,
        })
    }

    /// Invited agents that have not cast a vote yet
    pub fn pending_agents(&self, topic: &str) -> VoteResult<Vec<AgentId>> {
        let topics = self.lock();
        let entry = topics
            .get(topic)
            .ok_or_else(|| ConsensusError::UnknownTopic(topic.to_string()))?;
        Ok(entry
            .votes
            .iter()
            .filter(|v| v.status == VoteStatus::Pending)
            .map(|v| v.agent.clone())
            .collect())
    }

    pub fn votes(&self, topic: &str) -> VoteResult<Vec<Vote>> {
        let topics = self.lock();
        topics
            .get(topic)
            .map(|entry| entry.votes.clone())
            .ok_or_else(|| ConsensusError::UnknownTopic(topic.to_string()))
    }

    /// Apply every ballot waiting in the manager's mailbox.
    ///
    /// Returns the number of ballots applied. Other messages, and ballots
    /// for unknown topics or from uninvited agents, are dropped. Without a
    /// bus this is a no-op.
    pub fn collect_ballots(&self) -> usize {
        let Some(link) = &self.link else {
            return 0;
        };
        self.apply_ballots(link.bus.receive(&link.name))
    }

    /// Collect ballots until every invited agent on `topic` has voted or
    /// `timeout` elapses. Returns the number of ballots applied.
    pub async fn await_ballots(&self, topic: &str, timeout: Duration) -> VoteResult<usize> {
        let Some(link) = &self.link else {
            return Ok(0);
        };
        let deadline = Instant::now() + timeout;
        let mut applied = 0;

        while !self.pending_agents(topic)?.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let batch = link.bus.recv_timeout(&link.name, remaining).await;
            applied += self.apply_ballots(batch);
            if Instant::now() >= deadline {
                break;
            }
        }
        Ok(applied)
    }

    fn apply_ballots(&self, messages: Vec<Message>) -> usize {
        let mut applied = 0;
        for message in messages {
            let Some(ballot) = message.content().and_then(VoteBallot::from_content) else {
                debug!(sender = %message.sender, kind = %message.kind(), "Ignoring non-ballot message");
                continue;
            };
            match self.submit_vote(&ballot.topic, &message.sender, &ballot.selection, ballot.confidence) {
                Ok(true) => applied += 1,
                Ok(false) => {}
                Err(e) => debug!(sender = %message.sender, error = %e, "Dropping ballot"),
            }
        }
        applied
    }
}

fn first_occurrences(items: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter(|item| seen.insert(item.as_str()))
        .cloned()
        .collect()
}

impl Default for ConsensusManager {
    fn default() -> Self {
        Self::new()
    }
}
