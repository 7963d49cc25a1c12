//! Integration tests for `MessageBusSource`.
//!
//! These require a running Kafka broker. Start one locally and run:
//!
//! ```bash
//! KAFKA_BROKERS="localhost:9092" \
//!     cargo test --package analysis-bus-source -- --ignored
//! ```

use analysis_bus_source::MessageBusSource;
use analysis_core::source::Source;
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn brokers() -> String {
    std::env::var("KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string())
}

async fn publish(topic: &str, key: &str, payload: &str) {
    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", brokers())
        .create()
        .expect("construct test producer");
    let record = FutureRecord::to(topic).key(key).payload(payload);
    producer
        .send(record, Timeout::After(Duration::from_secs(5)))
        .await
        .expect("publish test message");
}

#[tokio::test]
#[ignore = "requires a running Kafka broker (run with --ignored)"]
async fn emits_a_task_for_a_well_formed_submission_then_acks_it() {
    let topic = "analysis_bus_source_it_basic";
    let payload = r#"{"uuid":"U1","task_type":"generic","profiler_type":"perf","input_reference":"raw/U1.collapsed","duration_hint_ms":500}"#;
    publish(topic, "U1", payload).await;

    let source = MessageBusSource::new(
        "primary",
        &brokers(),
        topic,
        "analysis_bus_source_it_basic_group",
        &format!("{topic}-dlq"),
        5_000,
        Duration::from_secs(5),
        16,
    )
    .expect("construct message-bus source");

    source.start(CancellationToken::new()).await.expect("start source");
    let mut stream = source.tasks();
    let event = tokio::time::timeout(Duration::from_secs(10), stream.next())
        .await
        .expect("event within timeout")
        .expect("one task emitted");
    assert_eq!(event.task.uuid, "U1");

    source.ack(&event).await.expect("ack succeeds");
    source.stop().await;
}

#[tokio::test]
#[ignore = "requires a running Kafka broker (run with --ignored)"]
async fn a_malformed_submission_is_routed_to_the_dead_letter_topic() {
    let topic = "analysis_bus_source_it_malformed";
    publish(topic, "bad", "not json at all").await;

    let source = MessageBusSource::new(
        "primary",
        &brokers(),
        topic,
        "analysis_bus_source_it_malformed_group",
        &format!("{topic}-dlq"),
        5_000,
        Duration::from_secs(5),
        16,
    )
    .expect("construct message-bus source");

    source.start(CancellationToken::new()).await.expect("start source");
    let mut stream = source.tasks();
    let outcome = tokio::time::timeout(Duration::from_millis(500), stream.next()).await;
    assert!(outcome.is_err(), "a malformed submission must never reach the task stream");
    source.stop().await;
}

#[tokio::test]
#[ignore = "requires a running Kafka broker (run with --ignored)"]
async fn health_check_succeeds_against_a_live_broker() {
    let topic = "analysis_bus_source_it_health";
    let source = MessageBusSource::new(
        "primary",
        &brokers(),
        topic,
        "analysis_bus_source_it_health_group",
        &format!("{topic}-dlq"),
        5_000,
        Duration::from_secs(5),
        16,
    )
    .expect("construct message-bus source");
    source.health_check().await.expect("health check succeeds");
}
