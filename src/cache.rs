//! Short-lived memoization of broker metadata.
//!
//! [`TtlCache`] maps string keys to cloned values with a per-entry lifetime and
//! coalesces concurrent population of the same key: while one caller is fetching
//! a value from the broker, every other caller asking for that key waits for the
//! same result instead of issuing its own request.
//!
//! # Expiry
//!
//! Every entry carries the TTL it was stored with. The deadline is recomputed on
//! each [`TtlCache::set`], so replacing a value before it expires gives the new
//! value its full lifetime and the old deadline no longer applies. Expired
//! entries are never returned; moka reclaims them during its housekeeping.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use minion::cache::TtlCache;
//!
//! # async fn example() -> minion::Result<()> {
//! let cache: TtlCache<u64> = TtlCache::new();
//!
//! let value = cache
//!     .get_or_populate("partition_count", Duration::from_secs(10), || async {
//!         // ask the broker
//!         Ok(12)
//!     })
//!     .await?;
//! assert_eq!(value, 12);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::future::Cache;
use tracing::debug;

use crate::error::Result;

/// Upper bound on stored keys. The service only uses a handful.
const MAX_ENTRIES: u64 = 10_000;

/// A stored value together with the TTL it was stored with.
type Entry<V> = (V, Duration);

/// Expires each entry after the TTL given to the `set` that stored it.
struct PerEntryTtl;

impl<V> Expiry<String, Entry<V>> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &Entry<V>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.1)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry<V>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.1)
    }
}

/// Expiring key/value cache with coalesced population.
pub struct TtlCache<V> {
    inner: Cache<String, Entry<V>>,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V> Default for TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(MAX_ENTRIES)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }

    /// Look up a live entry.
    pub async fn get(&self, key: &str) -> Option<V> {
        self.inner.get(key).await.map(|(value, _)| value)
    }

    /// Install `value` under `key`, replacing any previous entry and its
    /// deadline.
    pub async fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.inner.insert(key.into(), (value, ttl)).await;
    }

    pub async fn delete(&self, key: &str) {
        self.inner.invalidate(key).await;
    }

    /// Number of live entries.
    pub async fn len(&self) -> u64 {
        self.inner.run_pending_tasks().await;
        self.inner.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Return the cached value for `key`, or run `populate` to obtain it.
    ///
    /// At most one `populate` runs per key at a time. Callers arriving while a
    /// population is in progress wait for it and receive its result, success or
    /// error. Successful values are cached for `ttl`; errors are not cached, so a
    /// later call retries.
    ///
    /// If the populating caller is cancelled before it finishes, one of the
    /// waiters takes over and populates the key itself.
    pub async fn get_or_populate<F, Fut>(&self, key: &str, ttl: Duration, populate: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let init = async move {
            debug!(key, "Populating cache entry");
            populate().await.map(|value| (value, ttl))
        };

        self.inner
            .try_get_with_by_ref(key, init)
            .await
            .map(|(value, _)| value)
            .map_err(|e| (*e).clone())
    }
}
