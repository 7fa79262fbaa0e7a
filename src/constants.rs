//! Centralized defaults and fixed values.
//!
//! # Categories
//!
//! - **Startup**: compatibility check limits
//! - **Streams**: re-subscription pacing of the consuming loops
//! - **Histograms**: bucket layout for end-to-end latency
//! - **End-to-End**: canary topic and SLA defaults
//! - **Cache**: metadata memoization lifetimes

use std::time::Duration;

// =============================================================================
// Startup
// =============================================================================

/// Upper bound for the broker API-version query issued by the compatibility gate.
pub const COMPATIBILITY_CHECK_TIMEOUT: Duration = Duration::from_secs(15);

// =============================================================================
// Streams
// =============================================================================

/// Pause before a consuming loop re-subscribes after its stream ended.
pub const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

// =============================================================================
// Histograms
// =============================================================================

/// Lowest histogram bucket boundary, in seconds (5 ms).
pub const BUCKET_FLOOR_SECS: f64 = 0.005;

/// Growth factor between consecutive bucket boundaries.
pub const BUCKET_FACTOR: f64 = 2.0;

/// Metric namespace used when none is configured.
pub const DEFAULT_METRIC_NAMESPACE: &str = "kminion";

/// Subsystem under which all end-to-end metrics are registered.
pub const END_TO_END_SUBSYSTEM: &str = "end_to_end";

// =============================================================================
// End-to-End
// =============================================================================

/// Topic the canary messages are produced to.
pub const DEFAULT_END_TO_END_TOPIC: &str = "kminion-end-to-end";

/// Number of partitions a probe round produces to.
pub const DEFAULT_END_TO_END_PARTITIONS: i32 = 1;

/// Interval between two probe rounds.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// Maximum acceptable time until the broker acknowledges a produce request.
pub const DEFAULT_ACK_SLA: Duration = Duration::from_secs(5);

/// Maximum acceptable time between producing and consuming a canary message.
pub const DEFAULT_ROUNDTRIP_SLA: Duration = Duration::from_secs(20);

/// Maximum acceptable time for an offset commit to be confirmed.
pub const DEFAULT_COMMIT_SLA: Duration = Duration::from_secs(10);

// =============================================================================
// Cache
// =============================================================================

/// Lifetime of memoized broker metadata.
pub const DEFAULT_METADATA_CACHE_TTL: Duration = Duration::from_secs(10);

/// Cache key for the broker's API version set.
pub const CACHE_KEY_API_VERSIONS: &str = "api_versions";

/// Cache key for the broker's log directory description.
pub const CACHE_KEY_LOG_DIRS: &str = "describe_log_dirs";
