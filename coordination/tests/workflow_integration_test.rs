//! Supervisor workflow integration tests. The supervisor, message bus,
//! failure handler and worker agents run together on one runtime.
//!
//! Workers are either `WorkerAgent`s driving deterministic executors or
//! hand-written mailbox loops that drop or delay replies. All tests run on
//! a paused clock so timeouts and backoff are instantaneous.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use swarm_coordination::{
    CoordinationEvent, EventBus, EventBusExt, EventFilter, FailureConfig, FailureHandler,
    FnExecutor, Message, MessageBus, Payload, RequestBody, SharedMessageBus, Subtask,
    SubtaskOutcome, Supervisor, SupervisorConfig, SupervisorError, Task, WorkerAgent,
};
use tokio_util::sync::CancellationToken;

fn fast_supervisor_config() -> SupervisorConfig {
    SupervisorConfig {
        response_timeout_ms: 100,
        ..SupervisorConfig::default()
    }
}

fn fast_failure_config() -> FailureConfig {
    FailureConfig {
        backoff_unit_ms: 10,
        ..FailureConfig::default()
    }
}

fn echo_worker(id: &str, bus: &SharedMessageBus, cancel: &CancellationToken) {
    let executor = Arc::new(FnExecutor(|s: &Subtask| {
        SubtaskOutcome::success(format!("{}: {}", s.capability, s.description))
    }));
    WorkerAgent::new(id, bus.clone(), executor).spawn(cancel.clone());
}

/// Answers every ExecuteTask request after `delay_first` for the first one
/// and immediately afterwards; drops requests listed in `drop_attempts`.
fn scripted_worker(
    id: &'static str,
    bus: SharedMessageBus,
    drop_attempts: &'static [u32],
    delay_first: Duration,
    cancel: CancellationToken,
) -> Arc<AtomicU32> {
    let seen = Arc::new(AtomicU32::new(0));
    let counter = seen.clone();
    tokio::spawn(async move {
        loop {
            let batch = tokio::select! {
                _ = cancel.cancelled() => break,
                batch = bus.recv_timeout(id, Duration::from_secs(1)) => batch,
            };
            for message in batch {
                let Payload::Request(RequestBody::ExecuteTask { task }) = &message.payload else {
                    continue;
                };
                let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if drop_attempts.contains(&attempt) {
                    continue;
                }
                if attempt == 1 {
                    tokio::time::sleep(delay_first).await;
                }
                let outcome = SubtaskOutcome::success(format!("{} attempt {}", task.id, attempt));
                bus.send(Message::reply_to(
                    &message,
                    Payload::Response(outcome.into_content()),
                ));
            }
        }
    });
    seen
}

// ── Happy path ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_research_workflow_end_to_end() {
    let bus = MessageBus::new().shared();
    let cancel = CancellationToken::new();
    let supervisor = Supervisor::new(
        fast_supervisor_config(),
        bus.clone(),
        Arc::new(FailureHandler::new(fast_failure_config())),
    );

    for (id, capability) in [("searcher", "search"), ("analyst", "analyze"), ("writer", "synthesize")] {
        echo_worker(id, &bus, &cancel);
        supervisor.register_worker(id, [capability]);
    }

    let task = Task::new("r-1", "research")
        .with_description("Survey async runtimes")
        .with_priority(2);
    let result = supervisor.run_workflow(&task).await.unwrap();

    let capabilities: Vec<&str> = result.subtasks.iter().map(|s| s.capability.as_str()).collect();
    assert_eq!(capabilities, vec!["search", "analyze", "synthesize"]);
    for subtask in &result.subtasks {
        assert_eq!(subtask.parent_task.as_deref(), Some("r-1"));
        assert_eq!(subtask.priority, 2);
    }

    assert!(result.success);
    assert_eq!(result.final_result.quality_score, 1.0);
    assert_eq!(
        result.final_result.summary,
        "search: Gather information | analyze: Analyze findings | synthesize: Synthesize results"
    );

    for (id, record) in supervisor.workers() {
        assert!(record.is_available(), "{id} left busy");
        assert_eq!(record.metrics.tasks_completed, 1);
        assert_eq!(record.current_task, None);
    }

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_single_generalist_runs_every_subtask() {
    let bus = MessageBus::new().shared();
    let cancel = CancellationToken::new();
    let supervisor = Supervisor::new(
        fast_supervisor_config(),
        bus.clone(),
        Arc::new(FailureHandler::new(fast_failure_config())),
    );
    echo_worker("generalist", &bus, &cancel);
    supervisor.register_worker("generalist", ["execute"]);

    let result = supervisor
        .run_workflow(&Task::new("c-1", "create"))
        .await
        .unwrap();
    assert_eq!(result.subtask_results.len(), 3);
    assert_eq!(
        supervisor.worker("generalist").unwrap().metrics.tasks_completed,
        3
    );

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_failed_outcome_lowers_quality() {
    let bus = MessageBus::new().shared();
    let cancel = CancellationToken::new();
    let failures = Arc::new(FailureHandler::new(fast_failure_config()));
    let supervisor = Supervisor::new(fast_supervisor_config(), bus.clone(), failures.clone());

    let executor = Arc::new(FnExecutor(|s: &Subtask| {
        if s.capability == "analyze" {
            SubtaskOutcome::failure("model unavailable")
        } else {
            SubtaskOutcome::success(s.description.clone())
        }
    }));
    WorkerAgent::new("w", bus.clone(), executor).spawn(cancel.clone());
    supervisor.register_worker("w", ["search", "analyze", "synthesize"]);

    let result = supervisor
        .run_workflow(&Task::new("r-2", "research"))
        .await
        .unwrap();

    assert!(!result.success);
    assert!((result.final_result.quality_score - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(
        result.final_result.summary,
        "Gather information | Synthesize results"
    );
    // the failure was counted, then cleared by the next success
    assert_eq!(failures.failure_count("w"), 0);

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_custom_decomposer() {
    let bus = MessageBus::new().shared();
    let cancel = CancellationToken::new();
    let supervisor = Supervisor::new(
        fast_supervisor_config(),
        bus.clone(),
        Arc::new(FailureHandler::new(fast_failure_config())),
    )
    .with_decomposer(|task: &Task| -> Vec<Subtask> {
        (0..5)
            .map(|i| Subtask::child_of(task, i, "lint", format!("crate {i}")))
            .collect()
    });
    echo_worker("linter", &bus, &cancel);
    supervisor.register_worker("linter", ["lint"]);

    let result = supervisor
        .run_workflow(&Task::new("l-1", "audit"))
        .await
        .unwrap();
    assert_eq!(result.subtasks.len(), 5);
    assert_eq!(result.subtasks[4].id, "l-1-5");
    assert!(result.success);

    cancel.cancel();
}

// ── Failure paths ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_no_available_worker_is_workflow_error() {
    let supervisor = Supervisor::new(
        fast_supervisor_config(),
        MessageBus::new().shared(),
        Arc::new(FailureHandler::new(fast_failure_config())),
    );

    let err = supervisor
        .run_workflow(&Task::new("r-3", "research"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SupervisorError::NoAvailableWorker {
            capability: "search".into()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_dropped_request_is_retried_on_same_worker() {
    let bus = MessageBus::new().shared();
    let cancel = CancellationToken::new();
    let failures = Arc::new(FailureHandler::new(fast_failure_config()));
    let events = EventBus::new().shared();
    let mut assigned = events.subscribe_filtered(EventFilter::new().types(vec!["task_assigned"]));
    let supervisor = Supervisor::new(fast_supervisor_config(), bus.clone(), failures.clone())
        .with_events(events.clone());

    let seen = scripted_worker("flaky", bus.clone(), &[1], Duration::ZERO, cancel.clone());
    supervisor.register_worker("flaky", ["execute"]);

    let result = supervisor
        .run_workflow(&Task::new("x-1", "misc"))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.subtask_results[0].summary, "x-1-1 attempt 2");
    assert_eq!(seen.load(Ordering::SeqCst), 2);
    assert_eq!(failures.failure_count("flaky"), 0);

    let mut attempts = Vec::new();
    while attempts.len() < 2 {
        match assigned.recv().await.unwrap() {
            CoordinationEvent::TaskAssigned { worker_id, attempt, .. } => {
                attempts.push((worker_id, attempt));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(
        attempts,
        vec![("flaky".to_string(), 1), ("flaky".to_string(), 2)]
    );

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_late_reply_is_discarded_as_stale() {
    let bus = MessageBus::new().shared();
    let cancel = CancellationToken::new();
    let supervisor = Supervisor::new(
        fast_supervisor_config(),
        bus.clone(),
        Arc::new(FailureHandler::new(fast_failure_config())),
    );

    // first reply lands after the 100ms response timeout
    scripted_worker("slow", bus.clone(), &[], Duration::from_millis(150), cancel.clone());
    supervisor.register_worker("slow", ["execute"]);

    let result = supervisor
        .run_workflow(&Task::new("s-1", "misc"))
        .await
        .unwrap();
    assert_eq!(result.subtask_results[0].summary, "s-1-1 attempt 2");
    assert_eq!(bus.pending("supervisor"), 0);

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_breaker_reroutes_to_backup() {
    let bus = MessageBus::new().shared();
    let cancel = CancellationToken::new();
    let events = EventBus::new().shared();
    let mut breakers = events.subscribe_filtered(EventFilter::new().types(vec!["breaker_opened"]));
    let failures = Arc::new(
        FailureHandler::new(FailureConfig {
            threshold: 1,
            backup_agents: vec!["backup".to_string()],
            ..fast_failure_config()
        })
        .with_events(events.clone()),
    );
    let supervisor = Supervisor::new(fast_supervisor_config(), bus.clone(), failures.clone());

    // "primary" is registered but nothing serves its mailbox
    supervisor.register_worker("primary", ["execute"]);
    echo_worker("backup", &bus, &cancel);
    supervisor.register_worker("backup", ["review"]);

    let result = supervisor
        .run_workflow(&Task::new("b-1", "misc").with_description("ship it"))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.subtask_results[0].summary, "execute: ship it");
    assert!(!failures.is_available("primary"));
    assert_eq!(supervisor.worker("backup").unwrap().metrics.tasks_completed, 1);
    assert_eq!(supervisor.worker("primary").unwrap().metrics.tasks_completed, 0);

    match breakers.recv().await.unwrap() {
        CoordinationEvent::BreakerOpened { agent_id, failure_count, .. } => {
            assert_eq!(agent_id, "primary");
            assert_eq!(failure_count, 1);
        }
        other => panic!("unexpected event {other:?}"),
    }

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_default_policy_moves_on_after_silent_worker() {
    let bus = MessageBus::new().shared();
    let cancel = CancellationToken::new();
    let events = EventBus::new().shared();
    let mut assigned = events.subscribe_filtered(EventFilter::new().types(vec!["task_assigned"]));
    let failures = Arc::new(FailureHandler::new(fast_failure_config()));
    let supervisor = Supervisor::new(fast_supervisor_config(), bus.clone(), failures.clone())
        .with_events(events.clone());

    // "a" is the only capable worker and never answers; "b" can only be a fallback
    supervisor.register_worker("a", ["execute"]);
    echo_worker("b", &bus, &cancel);
    supervisor.register_worker("b", ["review"]);

    let result = supervisor
        .run_workflow(&Task::new("t", "misc").with_description("deploy"))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.subtask_results[0].summary, "execute: deploy");
    assert_eq!(supervisor.worker("b").unwrap().metrics.tasks_completed, 1);
    assert_eq!(failures.failure_count("a"), 3);
    assert!(!failures.is_available("a"));

    let mut workers = Vec::new();
    while workers.len() < 4 {
        match assigned.recv().await.unwrap() {
            CoordinationEvent::TaskAssigned { worker_id, .. } => workers.push(worker_id),
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(workers, vec!["a", "a", "a", "b"]);

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_attempts_exhausted_surfaces_timeout() {
    let bus = MessageBus::new().shared();
    let failures = Arc::new(FailureHandler::new(fast_failure_config()));
    let supervisor = Supervisor::new(fast_supervisor_config(), bus, failures.clone());
    supervisor.register_worker("ghost", ["execute"]);

    let err = supervisor
        .run_workflow(&Task::new("g-1", "misc"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::SubtaskTimeout { ref worker_id, timeout_ms: 100, .. } if worker_id == "ghost"
    ));
    // three timeouts reach the default threshold
    assert!(!failures.is_available("ghost"));
    assert!(supervisor.worker("ghost").unwrap().is_available());
}

#[tokio::test(start_paused = true)]
async fn test_workflow_completed_event() {
    let bus = MessageBus::new().shared();
    let cancel = CancellationToken::new();
    let events = EventBus::new().shared();
    let mut done = events.subscribe_filtered(
        EventFilter::new()
            .task("w-1")
            .types(vec!["workflow_completed"]),
    );
    let supervisor = Supervisor::new(
        fast_supervisor_config(),
        bus.clone(),
        Arc::new(FailureHandler::new(fast_failure_config())),
    )
    .with_events(events.clone());
    echo_worker("w", &bus, &cancel);
    supervisor.register_worker("w", ["execute"]);

    supervisor.run_workflow(&Task::new("w-1", "misc")).await.unwrap();

    match done.recv().await.unwrap() {
        CoordinationEvent::WorkflowCompleted {
            subtasks,
            quality_score,
            success,
            ..
        } => {
            assert_eq!(subtasks, 1);
            assert_eq!(quality_score, 1.0);
            assert!(success);
        }
        other => panic!("unexpected event {other:?}"),
    }

    cancel.cancel();
}
