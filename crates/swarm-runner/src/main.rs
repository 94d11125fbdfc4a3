//! Swarm coordination runner
//!
//! Drives the coordination core end to end with in-process agents and
//! prints the outcome as JSON.
//!
//! # Usage
//!
//! ```bash
//! # Supervised research workflow on three workers, one of them failing
//! swarm-runner workflow --task-type research --workers 3 --flaky
//!
//! # Weighted vote with ballots cast over the bus
//! swarm-runner vote --option A --option B --ballot a1=A:0.9 --ballot a2=A:0.5 --ballot a3=B:0.8
//!
//! # Handoff to an agent that never acknowledges
//! swarm-runner handoff --from coder --to reviewer --progress 0.4 --no-ack
//!
//! # Settings from a file instead of COORD_* variables
//! swarm-runner --config coordination.toml workflow
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use swarm_coordination::{
    ConsensusManager, Content, CoordinationConfig, EventBus, Executor, FailureHandler,
    HandoffContext, HandoffProtocol, MessageBus, SharedEventBus, SharedMessageBus, Subtask,
    SubtaskOutcome, Supervisor, Task, WorkerAgent,
};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML settings file (defaults plus COORD_* environment variables otherwise)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decompose a task and run it across worker agents
    Workflow {
        #[arg(long, default_value = "research")]
        task_type: String,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long, default_value_t = 0)]
        priority: i32,

        /// Number of worker agents
        #[arg(long, default_value_t = 3)]
        workers: usize,

        /// Make the first worker fail every subtask
        #[arg(long, default_value_t = false)]
        flaky: bool,
    },

    /// Run a weighted vote with one agent per ballot
    Vote {
        #[arg(long, default_value = "decision")]
        topic: String,

        /// Option offered to voters (repeatable, order breaks ties)
        #[arg(long = "option", required = true)]
        options: Vec<String>,

        /// Ballot as `agent=option:confidence` (repeatable)
        #[arg(long = "ballot", value_parser = parse_ballot)]
        ballots: Vec<Ballot>,
    },

    /// Transfer task state between two agents
    Handoff {
        #[arg(long, default_value = "coder")]
        from: String,

        #[arg(long, default_value = "reviewer")]
        to: String,

        #[arg(long, default_value_t = 0.0)]
        progress: f64,

        /// Leave the target without an agent, so nothing acknowledges
        #[arg(long, default_value_t = false)]
        no_ack: bool,
    },
}

#[derive(Debug, Clone)]
struct Ballot {
    agent: String,
    selection: String,
    confidence: f64,
}

fn parse_ballot(raw: &str) -> Result<Ballot, String> {
    let (agent, vote) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected agent=option:confidence, got '{raw}'"))?;
    let (selection, confidence) = vote
        .rsplit_once(':')
        .ok_or_else(|| format!("missing confidence in '{raw}'"))?;
    let confidence: f64 = confidence
        .parse()
        .map_err(|e| format!("bad confidence in '{raw}': {e}"))?;
    if agent.is_empty() || selection.is_empty() {
        return Err(format!("empty agent or option in '{raw}'"));
    }
    Ok(Ballot {
        agent: agent.to_string(),
        selection: selection.to_string(),
        confidence,
    })
}

/// Worker executor that echoes subtask descriptions, votes a fixed ballot
/// and accepts every handoff.
struct DemoAgent {
    failing: bool,
    ballot: Option<(String, f64)>,
}

#[async_trait]
impl Executor for DemoAgent {
    async fn execute(&self, subtask: &Subtask) -> SubtaskOutcome {
        if self.failing {
            SubtaskOutcome::failure(format!("{} failed", subtask.id))
        } else {
            SubtaskOutcome::success(format!("{} done", subtask.description))
                .with_field("capability", subtask.capability.clone())
        }
    }

    async fn accept_handoff(&self, handoff: &HandoffContext) -> bool {
        info!(reason = %handoff.handoff_reason, "Accepting handoff");
        true
    }

    async fn cast_vote(&self, _topic: &str, _options: &[String]) -> Option<(String, f64)> {
        self.ballot.clone()
    }
}

/// Shared plumbing for one runner invocation
struct Swarm {
    config: CoordinationConfig,
    bus: SharedMessageBus,
    events: SharedEventBus,
    cancel: CancellationToken,
}

impl Swarm {
    fn new(config: CoordinationConfig) -> Self {
        let bus = MessageBus::with_config(&config.bus).shared();
        Self {
            config,
            bus,
            events: EventBus::new().shared(),
            cancel: CancellationToken::new(),
        }
    }

    fn spawn_agent(&self, id: &str, agent: DemoAgent) {
        WorkerAgent::new(id, self.bus.clone(), Arc::new(agent)).spawn(self.cancel.clone());
    }

    /// Log every status event at debug level
    fn log_events(&self) {
        let mut rx = self.events.subscribe();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = rx.recv() => match event {
                        Ok(event) => debug!(
                            event = event.event_type(),
                            agent = ?event.agent_id(),
                            task = ?event.task_id(),
                            "Status event"
                        ),
                        Err(RecvError::Lagged(n)) => debug!(skipped = n, "Event log lagged"),
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });
    }

    async fn workflow(&self, task: Task, workers: usize, flaky: bool) -> Result<Value> {
        if workers == 0 {
            bail!("at least one worker is required");
        }

        let failures = Arc::new(
            FailureHandler::new(self.config.failure.clone()).with_events(self.events.clone()),
        );
        let supervisor = Supervisor::new(self.config.supervisor.clone(), self.bus.clone(), failures)
            .with_events(self.events.clone());

        let capabilities: Vec<String> = supervisor
            .decompose_task(&task)
            .into_iter()
            .map(|s| s.capability)
            .collect();
        for i in 1..=workers {
            let id = format!("worker-{i}");
            self.spawn_agent(
                &id,
                DemoAgent {
                    failing: flaky && i == 1,
                    ballot: None,
                },
            );
            supervisor.register_worker(id, capabilities.iter().cloned());
        }

        let result = supervisor
            .run_workflow(&task)
            .await
            .context("workflow failed")?;
        Ok(json!({
            "workflow": result,
            "workers": supervisor.workers(),
        }))
    }

    async fn vote(&self, topic: &str, options: &[String], ballots: &[Ballot]) -> Result<Value> {
        for ballot in ballots {
            self.spawn_agent(
                &ballot.agent,
                DemoAgent {
                    failing: false,
                    ballot: Some((ballot.selection.clone(), ballot.confidence)),
                },
            );
        }

        let manager = ConsensusManager::new()
            .with_bus(self.bus.clone(), "moderator")
            .with_events(self.events.clone());
        let agents: Vec<String> = ballots.iter().map(|b| b.agent.clone()).collect();
        manager.initiate_vote(topic, &agents, options)?;

        let applied = manager
            .await_ballots(topic, self.config.supervisor.response_timeout())
            .await?;
        info!(topic, applied, "Ballots collected");

        let result = manager.calculate_weighted_consensus(topic)?;
        Ok(json!({
            "topic": topic,
            "result": result,
            "votes": manager.votes(topic)?,
        }))
    }

    async fn handoff(&self, from: &str, to: &str, progress: f64, no_ack: bool) -> Result<Value> {
        if !no_ack {
            self.spawn_agent(
                to,
                DemoAgent {
                    failing: false,
                    ballot: None,
                },
            );
        }

        let protocol = HandoffProtocol::new(self.bus.clone())
            .with_config(self.config.handoff.clone())
            .with_events(self.events.clone());

        let mut state = Content::new();
        state.insert("progress".into(), json!(progress));
        let acknowledged = protocol
            .transfer_with_state(from, to, state, json!({ "handed_off_by": from }))
            .await;

        Ok(json!({
            "from": from,
            "to": to,
            "acknowledged": acknowledged,
        }))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => CoordinationConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CoordinationConfig::from_env(),
    };
    info!(supervisor = %config.supervisor.name, "Swarm runner starting");

    let swarm = Swarm::new(config);
    swarm.log_events();

    let output = match &args.command {
        Command::Workflow {
            task_type,
            description,
            priority,
            workers,
            flaky,
        } => {
            let task = Task::new(format!("{task_type}-1"), task_type.clone())
                .with_description(description.clone())
                .with_priority(*priority);
            swarm.workflow(task, *workers, *flaky).await
        }
        Command::Vote {
            topic,
            options,
            ballots,
        } => swarm.vote(topic, options, ballots).await,
        Command::Handoff {
            from,
            to,
            progress,
            no_ack,
        } => swarm.handoff(from, to, *progress, *no_ack).await,
    };
    swarm.cancel.cancel();

    let output = output?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    info!(messages = swarm.bus.history_len(), "Swarm runner finished");
    Ok(())
}
