//! Integration tests for the end-to-end canary probe.
//!
//! The producer and consumer loops run against the loopback mock broker, so
//! every produced canary is consumed and committed again.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use minion::broker::ConsumedRecord;
use minion::end_to_end::{CanaryMessage, EndToEnd};
use minion::error::Error;
use minion::metrics::{EndToEndMetrics, encode_metrics};
use minion::mock_broker::MockBroker;
use minion::tasks::TaskStatus;
use minion::{Service, ServiceConfig};
use prometheus::Registry;

fn end_to_end_config(partitions: i32) -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.end_to_end.enabled = true;
    config.end_to_end.partitions = partitions;
    config.end_to_end.probe_interval = Duration::from_millis(20);
    config
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

// ============================================================================
// Full loops through the service
// ============================================================================

#[tokio::test]
async fn test_loops_count_every_stage() {
    let broker = Arc::new(MockBroker::new());
    let registry = Registry::new();
    let mut service = Service::new(end_to_end_config(3), broker.clone(), &registry).unwrap();
    service.start().await.unwrap();

    let pipeline = service.end_to_end().unwrap().clone();
    wait_until(|| pipeline.metrics().messages_committed.get() >= 6).await;
    service.shutdown().await;

    let m = pipeline.metrics();
    assert!(m.messages_produced.get() >= m.messages_acked.get());
    assert!(m.messages_acked.get() >= m.messages_received.get());
    assert!(m.messages_received.get() >= m.messages_committed.get());
    assert!(m.ack_latency.get_sample_count() >= 6);
    assert!(m.commit_latency.get_sample_count() >= 6);

    for partition in 0..3 {
        let committed = broker.committed_offset(
            "kminion-end-to-end",
            "kminion-end-to-end",
            partition,
        );
        assert!(committed.is_some(), "partition {partition} never committed");
    }

    let text = encode_metrics(&registry).unwrap();
    assert!(text.contains("kminion_end_to_end_messages_produced_total"));
    assert!(text.contains("kminion_end_to_end_roundtrip_latency_seconds_bucket"));
}

#[tokio::test]
async fn test_loops_stop_on_shutdown() {
    let broker = Arc::new(MockBroker::new());
    let mut service =
        Service::new(end_to_end_config(1), broker.clone(), &Registry::new()).unwrap();
    service.start().await.unwrap();
    wait_until(|| broker.produce_calls() >= 2).await;

    service.shutdown().await;
    let produced = broker.produce_calls();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(broker.produce_calls(), produced);
}

#[tokio::test]
async fn test_consumer_resubscribes_after_stream_ends() {
    let broker = Arc::new(MockBroker::new());
    let mut service =
        Service::new(end_to_end_config(1), broker.clone(), &Registry::new()).unwrap();
    service.start().await.unwrap();

    let pipeline = service.end_to_end().unwrap().clone();
    wait_until(|| pipeline.metrics().messages_received.get() >= 2).await;

    broker.end_consume_stream();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let received = pipeline.metrics().messages_received.get();
    assert!(
        service
            .task_health()
            .contains(&("end_to_end_consumer", TaskStatus::Running))
    );

    // Canaries produced meanwhile reach the new subscription
    wait_until(|| pipeline.metrics().messages_received.get() >= received + 2).await;
    assert!(
        service
            .task_health()
            .contains(&("end_to_end_consumer", TaskStatus::Running))
    );
    service.shutdown().await;
}

#[tokio::test]
async fn test_produce_failures_are_not_acked() {
    let broker = Arc::new(MockBroker::new());
    broker.update_behavior(|b| {
        b.produce_error = Some(Error::Broker("not enough replicas".into()));
    });

    let mut service =
        Service::new(end_to_end_config(2), broker.clone(), &Registry::new()).unwrap();
    service.start().await.unwrap();
    wait_until(|| broker.produce_calls() >= 4).await;
    service.shutdown().await;

    let pipeline = service.end_to_end().unwrap();
    let m = pipeline.metrics();
    assert!(m.messages_produced.get() >= 4);
    assert_eq!(m.messages_acked.get(), 0);
    assert_eq!(m.messages_received.get(), 0);
}

// ============================================================================
// Correlation against foreign traffic
// ============================================================================

#[tokio::test]
async fn test_foreign_and_garbage_records_committed_not_counted() {
    let mut config = end_to_end_config(1);
    config.end_to_end.probe_interval = Duration::from_secs(3600);
    let registry = Registry::new();
    let metrics = EndToEndMetrics::register(&registry, "kminion", &config.end_to_end).unwrap();
    let pipeline = Arc::new(EndToEnd::with_minion_id(config.end_to_end.clone(), metrics, "ours"));
    let broker = Arc::new(MockBroker::new());

    let topic = config.end_to_end.topic_name.clone();
    broker.inject_record(ConsumedRecord {
        topic: topic.clone(),
        partition: 0,
        offset: 0,
        value: CanaryMessage::new("theirs", 0).encode().unwrap(),
    });
    broker.inject_record(ConsumedRecord {
        topic: topic.clone(),
        partition: 0,
        offset: 1,
        value: Bytes::from_static(b"\x00\x01 not a canary"),
    });
    broker.inject_record(ConsumedRecord {
        topic: topic.clone(),
        partition: 0,
        offset: 2,
        value: CanaryMessage::new("ours", 0).encode().unwrap(),
    });

    let consumer = {
        let (pipeline, broker) = (pipeline.clone(), broker.clone());
        tokio::spawn(async move { pipeline.run_consumer(broker.as_ref()).await })
    };
    wait_until(|| broker.commit_calls() == 3).await;
    consumer.abort();

    let m = pipeline.metrics();
    assert_eq!(m.messages_received.get(), 1);
    assert_eq!(m.commit_latency.get_sample_count(), 1);
    assert_eq!(
        broker.committed_offset(&config.end_to_end.consumer.group_id, &topic, 0),
        Some(3)
    );
}

#[tokio::test]
async fn test_replayed_canary_counted_twice() {
    let config = end_to_end_config(1);
    let metrics =
        EndToEndMetrics::register(&Registry::new(), "kminion", &config.end_to_end).unwrap();
    let pipeline = EndToEnd::with_minion_id(config.end_to_end.clone(), metrics, "ours");
    let broker = MockBroker::new();

    let record = ConsumedRecord {
        topic: config.end_to_end.topic_name.clone(),
        partition: 0,
        offset: 5,
        value: CanaryMessage::new("ours", 0).encode().unwrap(),
    };
    pipeline.handle_record(&broker, record.clone()).await;
    pipeline.handle_record(&broker, record).await;

    assert_eq!(pipeline.metrics().messages_received.get(), 2);
    assert_eq!(pipeline.metrics().roundtrip_latency.get_sample_count(), 2);
}
