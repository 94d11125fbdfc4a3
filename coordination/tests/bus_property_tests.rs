//! Bus and breaker property tests: invariants checked across families of
//! inputs rather than single examples.
//!
//! Tests verify:
//! - A mailbox drains in send order and is empty afterwards
//! - Concurrent senders lose nothing and keep per-sender order
//! - History never exceeds its cap and keeps the newest entries
//! - Broadcast copies are independent
//! - Breakers open after exactly `threshold` failures and close after cooldown
//! - Backoff is monotone and capped

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use swarm_coordination::{
    BusConfig, CircuitState, Content, FailureConfig, FailureHandler, Message, MessageBus,
    MessageKind, Payload,
};

fn numbered(sender: &str, receiver: &str, n: usize) -> Message {
    let mut content = Content::new();
    content.insert("n".into(), json!(n));
    Message::new(sender, receiver, Payload::Feedback(content))
}

fn seq(message: &Message) -> u64 {
    message.content().and_then(|c| c["n"].as_u64()).unwrap_or(u64::MAX)
}

#[test]
fn prop_mailbox_fifo_then_empty() {
    for count in [0usize, 1, 2, 7, 64, 500] {
        let bus = MessageBus::new();
        let sent: Vec<String> = (0..count)
            .map(|n| {
                let msg = numbered("s", "r", n);
                let id = msg.id.clone();
                bus.send(msg);
                id
            })
            .collect();

        assert_eq!(bus.pending("r"), count);
        let received: Vec<String> = bus.receive("r").into_iter().map(|m| m.id).collect();
        assert_eq!(received, sent, "order broken for {count} messages");
        assert!(bus.receive("r").is_empty());
        assert_eq!(bus.pending("r"), 0);
    }
}

#[test]
fn prop_interleaved_receivers_are_isolated() {
    for receivers in 1..6usize {
        let bus = MessageBus::new();
        for n in 0..(receivers * 10) {
            bus.send(numbered("s", &format!("r{}", n % receivers), n));
        }
        for r in 0..receivers {
            let got: Vec<u64> = bus.receive(&format!("r{r}")).iter().map(seq).collect();
            let expected: Vec<u64> = (0..receivers * 10)
                .filter(|n| n % receivers == r)
                .map(|n| n as u64)
                .collect();
            assert_eq!(got, expected);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn prop_concurrent_senders_lose_nothing() {
    for senders in [2usize, 4, 8] {
        let bus = MessageBus::new().shared();
        let per_sender = 200;

        let handles: Vec<_> = (0..senders)
            .map(|s| {
                let bus = bus.clone();
                tokio::spawn(async move {
                    for n in 0..per_sender {
                        bus.send(numbered(&format!("s{s}"), "sink", n));
                        if n % 16 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                })
            })
            .collect();

        // drain concurrently with the senders
        let mut received = Vec::new();
        while received.len() < senders * per_sender {
            received.extend(bus.recv_timeout("sink", Duration::from_secs(5)).await);
        }
        for handle in handles {
            handle.await.unwrap();
        }
        received.extend(bus.receive("sink"));

        assert_eq!(received.len(), senders * per_sender);
        for s in 0..senders {
            let sender = format!("s{s}");
            let order: Vec<u64> = received
                .iter()
                .filter(|m| m.sender == sender)
                .map(seq)
                .collect();
            let expected: Vec<u64> = (0..per_sender as u64).collect();
            assert_eq!(order, expected, "per-sender order broken for {sender}");
        }
    }
}

#[test]
fn prop_history_cap_keeps_newest() {
    for limit in [1usize, 3, 10, 50] {
        for sends in [0usize, limit - 1, limit, limit + 1, limit * 3] {
            let bus = MessageBus::with_config(&BusConfig {
                history_limit: Some(limit),
            });
            for n in 0..sends {
                bus.send(numbered("s", "r", n));
            }

            let history = bus.history();
            assert_eq!(history.len(), sends.min(limit));
            let kept: Vec<u64> = history.messages().iter().map(seq).collect();
            let expected: Vec<u64> = (sends.saturating_sub(limit)..sends).map(|n| n as u64).collect();
            assert_eq!(kept, expected);
            // mailboxes are unaffected by the cap
            assert_eq!(bus.pending("r"), sends);
        }
    }
}

#[test]
fn prop_broadcast_copies_are_independent() {
    for fanout in 0..8usize {
        let bus = MessageBus::new();
        let receivers: Vec<String> = (0..fanout).map(|i| format!("r{i}")).collect();
        let ids = bus.broadcast("hub", Payload::Alert(Content::new()), &receivers);

        assert_eq!(ids.len(), fanout);
        let mut unique = ids.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), fanout, "broadcast ids must be fresh");

        for (receiver, id) in receivers.iter().zip(&ids) {
            let inbox = bus.receive(receiver);
            assert_eq!(inbox.len(), 1);
            assert_eq!(&inbox[0].id, id);
            assert_eq!(inbox[0].kind(), MessageKind::Alert);
        }
        assert_eq!(bus.drain_outbox().len(), fanout);
        assert!(bus.outbox().is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn prop_breaker_opens_at_threshold_and_expires() {
    for threshold in 1..=5u32 {
        let handler = Arc::new(FailureHandler::new(FailureConfig {
            threshold,
            cooldown_secs: 30,
            ..FailureConfig::default()
        }));

        for n in 1..threshold {
            let action = handler.handle_failure("agent", "task", "boom");
            assert!(action.is_retry(), "failure {n} of {threshold} should retry");
            assert!(handler.is_available("agent"));
            assert_eq!(handler.state("agent"), CircuitState::Degrading);
        }

        assert!(handler.handle_failure("agent", "task", "boom").is_reroute());
        assert!(!handler.is_available("agent"));
        assert_eq!(handler.state("agent"), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!handler.is_available("agent"));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(handler.is_available("agent"));
        assert_eq!(handler.failure_count("agent"), 0);
        assert_eq!(handler.state("agent"), CircuitState::Healthy);
    }
}

#[test]
fn prop_backoff_monotone_and_capped() {
    for max_units in [1u64, 8, 60, 1_000] {
        let handler = FailureHandler::new(FailureConfig {
            backoff_unit_ms: 250,
            max_backoff_units: max_units,
            ..FailureConfig::default()
        });

        let mut previous = Duration::ZERO;
        for failures in 0..80u32 {
            let delay = handler.backoff_delay(failures);
            assert!(delay >= previous);
            assert!(delay <= Duration::from_millis(250 * max_units));
            previous = delay;
        }
        assert_eq!(previous, Duration::from_millis(250 * max_units));
    }
}
