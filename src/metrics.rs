//! Prometheus metrics for the end-to-end probe.
//!
//! Metrics are registered against a caller-provided [`Registry`] so several
//! service instances (or tests) never share counters. Hosts that do not manage
//! their own registry can use [`REGISTRY`].
//!
//! All end-to-end metrics live under `<namespace>_end_to_end_`:
//!
//! | Metric | Type | Meaning |
//! |--------|------|---------|
//! | `messages_produced_total` | counter | produce attempts |
//! | `messages_acked_total` | counter | acknowledged produce requests |
//! | `messages_received_total` | counter | own canaries received within the roundtrip SLA |
//! | `messages_committed_total` | counter | commits of matched canaries within the commit SLA |
//! | `produce_latency_seconds` | histogram | time until the produce ack |
//! | `roundtrip_latency_seconds` | histogram | produce to consume, within SLA only |
//! | `commit_latency_seconds` | histogram | time until the commit was confirmed |
//!
//! Histogram buckets are sized from the stage SLA with [`histogram_buckets`].
//!
//! # Safety
//!
//! Registration errors (usually a duplicate name in a shared registry) are
//! logged and the metric is returned unregistered instead of panicking.

use std::time::Duration;

use once_cell::sync::Lazy;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};
use tracing::warn;

use crate::config::EndToEndConfig;
use crate::constants::{BUCKET_FACTOR, BUCKET_FLOOR_SECS, END_TO_END_SUBSYSTEM};
use crate::error::{Error, Result};

/// Process-wide registry for hosts that do not bring their own.
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Exponential histogram buckets covering 5 ms up to at least `max_latency`.
///
/// Boundaries start at 5 ms and double each step. The bucket count is
/// `floor(log2(max_latency_ms / 10)) + 3`: the base is normalized to 20 ms,
/// plus the two buckets below it (5 ms, 10 ms) and one more to absorb the
/// rounding of the logarithm. Latencies under 10 ms get a single bucket.
///
/// ```
/// use std::time::Duration;
/// use minion::metrics::histogram_buckets;
///
/// assert_eq!(
///     histogram_buckets(Duration::from_millis(20)),
///     vec![0.005, 0.01, 0.02, 0.04]
/// );
/// ```
pub fn histogram_buckets(max_latency: Duration) -> Vec<f64> {
    // Integer division, the fractional part of the base is intentionally dropped
    let base = max_latency.as_millis() / 10;
    let count = if base == 0 {
        1
    } else {
        base.ilog2() as usize + 3
    };

    std::iter::successors(Some(BUCKET_FLOOR_SECS), |bucket| Some(bucket * BUCKET_FACTOR))
        .take(count)
        .collect()
}

/// Counters and histograms fed by the end-to-end pipeline.
#[derive(Debug, Clone)]
pub struct EndToEndMetrics {
    /// Messages the producer tried to send.
    pub messages_produced: IntCounter,
    /// Messages the broker acknowledged.
    pub messages_acked: IntCounter,
    /// Own messages received within the roundtrip SLA.
    pub messages_received: IntCounter,
    /// Matched messages whose offset commit was confirmed within the commit SLA.
    pub messages_committed: IntCounter,

    pub ack_latency: Histogram,
    pub roundtrip_latency: Histogram,
    pub commit_latency: Histogram,
}

impl EndToEndMetrics {
    /// Create and register the end-to-end metric family.
    ///
    /// Fails only if a metric description is invalid, e.g. a namespace that is
    /// not a valid Prometheus identifier.
    pub fn register(registry: &Registry, namespace: &str, config: &EndToEndConfig) -> Result<Self> {
        let counter = |name: &str, help: &str| register_counter(registry, namespace, name, help);
        let histogram = |name: &str, max_latency: Duration, help: &str| {
            register_histogram(registry, namespace, name, help, max_latency)
        };

        Ok(Self {
            // Low-level info, users build alerts like "can't produce" from these
            messages_produced: counter(
                "messages_produced_total",
                "Number of messages that the end-to-end test has tried to send to kafka",
            )?,
            messages_acked: counter(
                "messages_acked_total",
                "Number of messages kafka acknowledged as produced",
            )?,
            messages_received: counter(
                "messages_received_total",
                "Number of *matching* messages received. Every roundtrip message carries the \
                 minion id (randomly generated on startup) and a timestamp. A message only matches \
                 if it carries our minion id and arrives within the configured roundtrip SLA",
            )?,
            messages_committed: counter(
                "messages_committed_total",
                "Number of *matching* messages successfully committed as read/processed. \
                 Late or foreign messages are committed too, but not counted here",
            )?,

            // The implicit +Inf bucket catches lost or very late messages
            ack_latency: histogram(
                "produce_latency_seconds",
                config.producer.ack_sla,
                "Time until we received an ack for a produced message",
            )?,
            roundtrip_latency: histogram(
                "roundtrip_latency_seconds",
                config.consumer.roundtrip_sla,
                "Time it took between sending (producing) and receiving (consuming) a message",
            )?,
            commit_latency: histogram(
                "commit_latency_seconds",
                config.consumer.commit_sla,
                "Time kafka took to respond to the offset commit",
            )?,
        })
    }
}

/// Encode all metrics of `registry` in Prometheus text format.
pub fn encode_metrics(
    registry: &Registry,
) -> std::result::Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

// =============================================================================
// Safe registration helpers
// =============================================================================

fn register_counter(
    registry: &Registry,
    namespace: &str,
    name: &str,
    help: &str,
) -> Result<IntCounter> {
    let opts = Opts::new(name, help)
        .namespace(namespace)
        .subsystem(END_TO_END_SUBSYSTEM);
    let counter = IntCounter::with_opts(opts).map_err(invalid_metric)?;
    if let Err(e) = registry.register(Box::new(counter.clone())) {
        warn!(
            name,
            error = %e,
            "Failed to register IntCounter metric, using unregistered fallback"
        );
    }
    Ok(counter)
}

fn register_histogram(
    registry: &Registry,
    namespace: &str,
    name: &str,
    help: &str,
    max_latency: Duration,
) -> Result<Histogram> {
    let opts = HistogramOpts::new(name, help)
        .namespace(namespace)
        .subsystem(END_TO_END_SUBSYSTEM)
        .buckets(histogram_buckets(max_latency));
    let histogram = Histogram::with_opts(opts).map_err(invalid_metric)?;
    if let Err(e) = registry.register(Box::new(histogram.clone())) {
        warn!(name, error = %e, "Failed to register Histogram metric, using unregistered fallback");
    }
    Ok(histogram)
}

fn invalid_metric(e: prometheus::Error) -> Error {
    Error::Config(format!("invalid metric description: {e}"))
}
