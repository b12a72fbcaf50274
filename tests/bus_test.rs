//! Message bus behavior seen from endpoints

use phaseline::bus::{AuthToken, Envelope, MessageBus, Payload, Recipient, ORCHESTRATOR_ID};
use phaseline::config::BusConfig;
use phaseline::{BusError, Priority};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn bus(capacity: usize) -> Arc<MessageBus> {
    MessageBus::new(BusConfig {
        queue_capacity: capacity,
        send_retries: 2,
        send_backoff_ms: 1,
    })
}

#[tokio::test]
async fn test_stale_token_dropped_and_recorded() {
    let bus = bus(8);
    let alpha = bus.endpoint("alpha").await;
    bus.endpoint("bravo").await;

    alpha.send("bravo", Priority::Routine, Payload::Shutdown).await.unwrap();

    // A newer challenge for the pair makes alpha's cached token stale
    bus.issue_challenge("alpha", &Recipient::endpoint("bravo")).await.unwrap();
    let err = alpha.send("bravo", Priority::Flash, Payload::Shutdown).await.unwrap_err();
    assert!(matches!(err, BusError::Authentication { .. }));

    let events = bus.security_events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].sender, "alpha");
    assert_eq!(events[0].recipient, "bravo");
    assert_eq!(bus.pending("bravo").await, 1);

    // The endpoint re-challenges on the next send
    assert_eq!(alpha.send("bravo", Priority::Routine, Payload::Shutdown).await, Ok(2));
    assert_eq!(bus.security_event_count().await, 1);
}

#[tokio::test]
async fn test_forged_response_rejected() {
    let bus = bus(8);
    bus.register("mallory").await;
    bus.endpoint("bravo").await;

    let challenge = bus
        .issue_challenge("mallory", &Recipient::endpoint("bravo"))
        .await
        .unwrap();
    let envelope = Envelope {
        sender: "mallory".to_string(),
        recipient: Recipient::endpoint("bravo"),
        priority: Priority::Flash,
        payload: Payload::Shutdown,
        token: AuthToken {
            challenge: challenge.nonce,
            response: "00".repeat(32),
        },
    };

    assert!(matches!(bus.send(envelope).await, Err(BusError::Authentication { .. })));
    assert_eq!(bus.try_receive("bravo").await, Ok(None));
    assert_eq!(bus.security_events_since(0).await.len(), 1);
}

#[tokio::test]
async fn test_unregistered_sender_rejected() {
    let bus = bus(8);
    bus.endpoint("bravo").await;
    let err = bus
        .issue_challenge("ghost", &Recipient::endpoint("bravo"))
        .await
        .unwrap_err();
    assert_eq!(err, BusError::UnknownSender("ghost".to_string()));
}

#[tokio::test]
async fn test_priority_across_senders() {
    let bus = bus(8);
    let alpha = bus.endpoint("alpha").await;
    let bravo = bus.endpoint("bravo").await;
    let orch = bus.endpoint(ORCHESTRATOR_ID).await;

    alpha.send(ORCHESTRATOR_ID, Priority::Routine, Payload::Shutdown).await.unwrap();
    bravo.send(ORCHESTRATOR_ID, Priority::Flash, Payload::Shutdown).await.unwrap();

    let cancel = CancellationToken::new();
    assert_eq!(orch.receive(&cancel).await.unwrap().sender(), "bravo");
    assert_eq!(orch.receive(&cancel).await.unwrap().sender(), "alpha");
}

#[tokio::test]
async fn test_sender_order_preserved() {
    let bus = bus(16);
    let alpha = bus.endpoint("alpha").await;
    let orch = bus.endpoint(ORCHESTRATOR_ID).await;

    let priorities = [Priority::Routine, Priority::Flash, Priority::Priority, Priority::Immediate];
    for priority in priorities {
        alpha.send(ORCHESTRATOR_ID, priority, Payload::Shutdown).await.unwrap();
    }

    let mut sequences = Vec::new();
    while let Some(message) = orch.try_receive().await.unwrap() {
        sequences.push(message.sequence());
    }
    assert_eq!(sequences, vec![1, 2, 3, 4]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sender_order_preserved_under_concurrency() {
    const SENDERS: usize = 6;
    const PER_SENDER: u64 = 50;
    let bus = bus(SENDERS * PER_SENDER as usize);
    let orch = bus.endpoint(ORCHESTRATOR_ID).await;

    let mut producers = Vec::new();
    for s in 0..SENDERS {
        let endpoint = bus.endpoint(&format!("sender-{}", s)).await;
        producers.push(tokio::spawn(async move {
            for i in 0..PER_SENDER {
                let priority = match (i + s as u64) % 4 {
                    0 => Priority::Routine,
                    1 => Priority::Flash,
                    2 => Priority::Priority,
                    _ => Priority::Immediate,
                };
                endpoint.send(ORCHESTRATOR_ID, priority, Payload::Shutdown).await.unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }

    let mut seen: HashMap<String, Vec<u64>> = HashMap::new();
    let cancel = CancellationToken::new();
    for _ in 0..SENDERS * PER_SENDER as usize {
        let message = tokio::time::timeout(Duration::from_secs(5), orch.receive(&cancel))
            .await
            .unwrap()
            .unwrap();
        seen.entry(message.sender().to_string()).or_default().push(message.sequence());
    }
    for producer in producers {
        producer.await.unwrap();
    }

    assert_eq!(seen.len(), SENDERS);
    for (sender, sequences) in &seen {
        let expected: Vec<u64> = (1..=PER_SENDER).collect();
        assert_eq!(sequences, &expected, "{} delivered out of order", sender);
    }
}

#[tokio::test]
async fn test_broadcast_skips_saturated() {
    let bus = bus(1);
    let orch = bus.endpoint(ORCHESTRATOR_ID).await;
    let alpha = bus.endpoint("alpha").await;
    bus.endpoint("bravo").await;
    bus.endpoint("charlie").await;

    alpha.send("charlie", Priority::Routine, Payload::Shutdown).await.unwrap();

    let receipt = orch.broadcast(Priority::Flash, Payload::Shutdown).await.unwrap();
    assert_eq!(receipt.delivered, vec!["alpha".to_string(), "bravo".to_string()]);
    assert_eq!(receipt.saturated, vec!["charlie".to_string()]);
    assert_eq!(receipt.sequence, Some(1));

    let copy = alpha.try_receive().await.unwrap().unwrap();
    assert_eq!(copy.sender(), ORCHESTRATOR_ID);
    assert_eq!(copy.sequence(), 1);
    assert_eq!(bus.pending(ORCHESTRATOR_ID).await, 0);
}

#[tokio::test]
async fn test_backoff_gives_up_when_saturated() {
    let bus = bus(1);
    let alpha = bus.endpoint("alpha").await;
    bus.endpoint("bravo").await;

    alpha.send("bravo", Priority::Routine, Payload::Shutdown).await.unwrap();
    let err = alpha
        .send_with_backoff("bravo", Priority::Routine, Payload::Shutdown)
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::QueueSaturated { capacity: 1, .. }));
}

#[tokio::test]
async fn test_backoff_succeeds_after_drain() {
    let bus = MessageBus::new(BusConfig {
        queue_capacity: 1,
        send_retries: 5,
        send_backoff_ms: 20,
    });
    let alpha = bus.endpoint("alpha").await;
    let bravo = bus.endpoint("bravo").await;
    alpha.send("bravo", Priority::Routine, Payload::Shutdown).await.unwrap();

    let drainer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        bravo.try_receive().await.unwrap()
    });

    assert!(alpha
        .send_with_backoff("bravo", Priority::Routine, Payload::Shutdown)
        .await
        .is_ok());
    assert!(drainer.await.unwrap().is_some());
}

#[tokio::test]
async fn test_receive_wakes_on_send() {
    let bus = bus(4);
    let alpha = bus.endpoint("alpha").await;
    let orch = bus.endpoint(ORCHESTRATOR_ID).await;
    let cancel = CancellationToken::new();

    let waiter = tokio::spawn(async move { orch.receive(&cancel).await.map(|m| m.sender().to_string()) });
    tokio::time::sleep(Duration::from_millis(20)).await;
    alpha.send(ORCHESTRATOR_ID, Priority::Routine, Payload::Shutdown).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    assert_eq!(received, Ok("alpha".to_string()));
}

#[tokio::test]
async fn test_receive_unblocks_on_cancel() {
    let bus = bus(4);
    let orch = bus.endpoint(ORCHESTRATOR_ID).await;
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(Duration::from_secs(1), orch.receive(&cancel)).await.unwrap();
    assert_eq!(result, Err(BusError::Cancelled));
}
