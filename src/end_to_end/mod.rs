//! End-to-end canary probe.
//!
//! The producer loop sends a [`CanaryMessage`] to every partition of the
//! end-to-end topic once per probe interval; the consumer loop reads them back
//! and commits their offsets. Each message goes through
//!
//! ```text
//! Produced ──ack──▶ Acked ──consume──▶ RoundtripMatched ──commit──▶ Committed
//!                               └────▶ RoundtripDropped       └───▶ CommitDropped
//! ```
//!
//! | Stage | Histogram | Counter |
//! |-------|-----------|---------|
//! | ack | always | always |
//! | roundtrip | only within `roundtrip_sla` | only within `roundtrip_sla` |
//! | commit | always (matched messages) | only within `commit_sla` |
//!
//! Replayed messages are not deduplicated, every consumption is a new
//! observation. Foreign or undecodable records are committed but never counted.

mod message;

use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use futures::future::join_all;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::broker::{Broker, ConsumedRecord, ProduceRecord};
use crate::config::EndToEndConfig;
use crate::constants::RESUBSCRIBE_DELAY;
use crate::metrics::EndToEndMetrics;

pub use message::CanaryMessage;

/// Result of correlating a consumed canary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundtripOutcome {
    /// Arrived within the roundtrip SLA and was counted.
    Matched,
    /// Arrived too late; nothing was recorded.
    Dropped,
}

/// Result of an offset commit confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Confirmed within the commit SLA; latency observed and counted.
    Committed,
    /// Confirmed too late; latency observed only.
    Dropped,
}

/// The end-to-end pipeline of one monitor instance.
pub struct EndToEnd {
    config: EndToEndConfig,
    /// Random per process, tells our canaries apart from other instances'.
    minion_id: String,
    metrics: EndToEndMetrics,
}

impl EndToEnd {
    pub fn new(config: EndToEndConfig, metrics: EndToEndMetrics) -> Self {
        Self::with_minion_id(config, metrics, Uuid::new_v4().to_string())
    }

    pub fn with_minion_id(
        config: EndToEndConfig,
        metrics: EndToEndMetrics,
        minion_id: impl Into<String>,
    ) -> Self {
        Self {
            config,
            minion_id: minion_id.into(),
            metrics,
        }
    }

    pub fn minion_id(&self) -> &str {
        &self.minion_id
    }

    pub fn metrics(&self) -> &EndToEndMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &EndToEndConfig {
        &self.config
    }

    // =========================================================================
    // Stage transitions
    // =========================================================================

    /// The broker acknowledged a produce request. Not SLA gated: acks measure
    /// raw write availability.
    pub fn on_ack(&self, partition: i32, duration: Duration) {
        trace!(partition, ?duration, "Canary acked");
        self.metrics.messages_acked.inc();
        self.metrics.ack_latency.observe(duration.as_secs_f64());
    }

    /// One of our canaries came back after `duration`.
    pub fn on_roundtrip(&self, partition: i32, duration: Duration) -> RoundtripOutcome {
        if duration > self.config.consumer.roundtrip_sla {
            debug!(partition, ?duration, "Canary exceeded roundtrip SLA, dropping");
            return RoundtripOutcome::Dropped;
        }

        self.metrics.messages_received.inc();
        self.metrics.roundtrip_latency.observe(duration.as_secs_f64());
        RoundtripOutcome::Matched
    }

    /// The broker confirmed the offset commit of a matched canary after
    /// `duration`.
    pub fn on_offset_commit(&self, partition: i32, duration: Duration) -> CommitOutcome {
        self.metrics.commit_latency.observe(duration.as_secs_f64());

        if duration > self.config.consumer.commit_sla {
            debug!(partition, ?duration, "Offset commit exceeded commit SLA");
            return CommitOutcome::Dropped;
        }

        self.metrics.messages_committed.inc();
        CommitOutcome::Committed
    }

    // =========================================================================
    // Producer
    // =========================================================================

    /// Produce a canary to every partition once per probe interval, forever.
    pub async fn run_producer(&self, broker: &dyn Broker) {
        info!(
            topic = %self.config.topic_name,
            partitions = self.config.partitions,
            interval = ?self.config.probe_interval,
            minion_id = %self.minion_id,
            "Starting end-to-end producer"
        );

        let mut ticker = tokio::time::interval(self.config.probe_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.produce_round(broker).await;
        }
    }

    /// Produce one canary to each partition concurrently and wait for all acks.
    pub async fn produce_round(&self, broker: &dyn Broker) {
        let canaries =
            (0..self.config.partitions).map(|partition| self.produce_canary(broker, partition));
        join_all(canaries).await;
    }

    async fn produce_canary(&self, broker: &dyn Broker, partition: i32) {
        let message = CanaryMessage::new(self.minion_id.as_str(), partition);
        let value = match message.encode() {
            Ok(value) => value,
            Err(e) => {
                warn!(partition, error = %e, "Failed to encode canary message");
                return;
            }
        };

        self.metrics.messages_produced.inc();
        let started = Instant::now();
        let record = ProduceRecord {
            topic: self.config.topic_name.clone(),
            partition,
            value,
        };

        match broker.produce(record).await {
            Ok(ack) => self.on_ack(ack.partition, started.elapsed()),
            Err(e) => {
                warn!(partition, error = %e, "Failed to produce canary message");
            }
        }
    }

    // =========================================================================
    // Consumer
    // =========================================================================

    /// Consume the end-to-end topic forever, re-subscribing whenever the
    /// stream ends.
    pub async fn run_consumer(&self, broker: &dyn Broker) {
        info!(
            topic = %self.config.topic_name,
            group_id = %self.config.consumer.group_id,
            "Starting end-to-end consumer"
        );

        loop {
            let mut records = broker.consume(&self.config.topic_name);
            while let Some(item) = records.next().await {
                match item {
                    Ok(record) => self.handle_record(broker, record).await,
                    Err(e) => {
                        warn!(error = %e, "Failed to consume from end-to-end topic");
                    }
                }
            }

            warn!(
                topic = %self.config.topic_name,
                "End-to-end consumer stream ended, re-subscribing"
            );
            tokio::time::sleep(RESUBSCRIBE_DELAY).await;
        }
    }

    /// Correlate one consumed record and commit its offset.
    pub async fn handle_record(&self, broker: &dyn Broker, record: ConsumedRecord) {
        let received_at = Utc::now().timestamp_millis();

        let outcome = match CanaryMessage::decode(&record.value) {
            Ok(message) if message.minion_id == self.minion_id => {
                Some(self.on_roundtrip(record.partition, message.age_at(received_at)))
            }
            Ok(message) => {
                trace!(minion_id = %message.minion_id, "Ignoring canary of another instance");
                None
            }
            Err(e) => {
                debug!(
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "Ignoring undecodable record on end-to-end topic"
                );
                None
            }
        };

        // Everything gets committed, only matched canaries are measured
        let started = Instant::now();
        match broker
            .commit_offset(&self.config.consumer.group_id, &record)
            .await
        {
            Ok(_) if outcome == Some(RoundtripOutcome::Matched) => {
                self.on_offset_commit(record.partition, started.elapsed());
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "Failed to commit end-to-end offset"
                );
            }
        }
    }
}
