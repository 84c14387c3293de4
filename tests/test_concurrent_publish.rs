//! Many publish calls in flight against a small broker pool


use amqp_output::testing::{HostBehavior, MockBroker};
use amqp_output::LogEvent;
use futures::future::join_all;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use test_helpers::{config_for, seeded_output};

#[tokio::test]
async fn test_channel_use_is_serialized() {
    let broker = MockBroker::new().with_host(
        "amqp://a:5672",
        HostBehavior::healthy().with_publish_delay(Duration::from_millis(2)),
    );
    let config = config_for(&["amqp://a:5672"]);
    let output = seeded_output(&config, &broker).await;

    let events: Vec<LogEvent> = (0..40)
        .map(|i| LogEvent::new(format!("event {i}")).with_field("service", json!("api")))
        .collect();
    let results = join_all(events.iter().map(|e| output.event(e))).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(broker.deliveries().len(), 40);
    assert_eq!(broker.max_in_flight(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_spawned_tasks_share_one_output() {
    let slow = HostBehavior::healthy().with_publish_delay(Duration::from_millis(1));
    let broker = MockBroker::new()
        .with_host("amqp://a:5672", slow.clone())
        .with_host("amqp://b:5672", HostBehavior::failing_publish())
        .with_host("amqp://c:5672", slow);
    let config = config_for(&["amqp://a:5672", "amqp://b:5672", "amqp://c:5672"]);
    let output = Arc::new(seeded_output(&config, &broker).await);

    let mut handles = Vec::new();
    for i in 0..100 {
        let output = Arc::clone(&output);
        handles.push(tokio::spawn(async move {
            let event = LogEvent::new(format!("event {i}")).with_field("service", json!("api"));
            output.publish(&event).await
        }));
    }

    for handle in handles {
        let delivered = handle.await.unwrap().unwrap();
        assert_ne!(delivered.host, "amqp://b:5672");
    }

    let deliveries = broker.deliveries();
    assert_eq!(deliveries.len(), 100);
    assert_eq!(broker.max_in_flight(), 1);

    let messages: HashSet<Vec<u8>> = deliveries.into_iter().map(|d| d.payload).collect();
    assert_eq!(messages.len(), 100, "every event delivered exactly once");

    let metrics = output.metrics();
    assert_eq!(metrics.events_received, 100);
    assert_eq!(metrics.events_published, 100);
    assert_eq!(metrics.publish_attempts, metrics.retries + 100);
}
