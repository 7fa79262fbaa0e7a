//! In-memory mock broker for testing.
//!
//! Produced records are looped back to the (single) consumer of the same topic,
//! so the end-to-end pipeline can run without a cluster. Failures and latencies
//! of every request type can be injected, and a consumer subscription can be
//! ended to exercise re-subscription.
//!
//! # Usage
//!
//! This module is available when the `test-utilities` feature is enabled,
//! or during unit tests:
//!
//! ```toml
//! [dev-dependencies]
//! minion = { path = ".", features = ["test-utilities"] }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::broker::{
    ApiKey, ApiVersionSet, Broker, CommitConfirmation, ConsumedRecord, GroupOffsetCommit,
    LogDirInfo, ProduceAck, ProduceRecord,
};
use crate::error::{Error, Result};

/// Behavior knobs, changeable while the broker is in use.
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    pub api_versions_delay: Duration,
    pub api_versions_error: Option<Error>,
    pub produce_delay: Duration,
    pub produce_error: Option<Error>,
    pub commit_delay: Duration,
    pub commit_error: Option<Error>,
}

/// A record feed with at most one live subscription. Items sent while nobody is
/// subscribed are buffered for the next subscriber.
struct Feed<T> {
    tx: Mutex<mpsc::UnboundedSender<T>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<T>>>,
}

impl<T: Send + 'static> Feed<T> {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(tx),
            rx: Mutex::new(Some(rx)),
        }
    }

    fn send(&self, item: T) {
        let _ = self.tx.lock().send(item);
    }

    /// Hand out the buffered receiver as a stream. While a subscription is
    /// live, further subscribers see an empty stream.
    fn subscribe(&self) -> BoxStream<'static, T> {
        match self.rx.lock().take() {
            Some(rx) => stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed(),
            None => stream::empty().boxed(),
        }
    }

    /// End the live subscription once it has drained what was already sent.
    /// Later items wait for the next subscriber.
    fn restart(&self) {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.rx.lock() = Some(rx);
        *self.tx.lock() = tx;
    }
}

/// Loopback broker backed by in-memory channels.
pub struct MockBroker {
    versions: Mutex<ApiVersionSet>,
    log_dirs: Mutex<Vec<LogDirInfo>>,
    behavior: Mutex<MockBehavior>,

    records: Feed<ConsumedRecord>,
    group_offsets: Feed<Result<GroupOffsetCommit>>,
    next_offsets: Mutex<HashMap<(String, i32), i64>>,
    committed: Mutex<HashMap<(String, String, i32), i64>>,

    api_versions_calls: AtomicUsize,
    describe_log_dirs_calls: AtomicUsize,
    produce_calls: AtomicUsize,
    commit_calls: AtomicUsize,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBroker {
    /// A broker that advertises every API the monitor uses.
    pub fn new() -> Self {
        Self::with_versions(Self::modern_versions())
    }

    pub fn with_versions(versions: ApiVersionSet) -> Self {
        Self {
            versions: Mutex::new(versions),
            log_dirs: Mutex::new(vec![LogDirInfo {
                broker_id: 0,
                path: "/var/lib/kafka/data".to_string(),
                size_bytes: 0,
                error: None,
            }]),
            behavior: Mutex::new(MockBehavior::default()),
            records: Feed::new(),
            group_offsets: Feed::new(),
            next_offsets: Mutex::new(HashMap::new()),
            committed: Mutex::new(HashMap::new()),
            api_versions_calls: AtomicUsize::new(0),
            describe_log_dirs_calls: AtomicUsize::new(0),
            produce_calls: AtomicUsize::new(0),
            commit_calls: AtomicUsize::new(0),
        }
    }

    /// Version set of a recent broker.
    pub fn modern_versions() -> ApiVersionSet {
        ApiVersionSet::new()
            .with(ApiKey::Produce, 0, 9)
            .with(ApiKey::Fetch, 0, 13)
            .with(ApiKey::ListOffsets, 0, 7)
            .with(ApiKey::Metadata, 0, 12)
            .with(ApiKey::OffsetCommit, 0, 8)
            .with(ApiKey::OffsetFetch, 0, 8)
            .with(ApiKey::FindCoordinator, 0, 4)
            .with(ApiKey::DescribeGroups, 0, 5)
            .with(ApiKey::ListGroups, 0, 4)
            .with(ApiKey::ApiVersions, 0, 3)
            .with(ApiKey::DescribeConfigs, 0, 4)
            .with(ApiKey::DescribeLogDirs, 0, 4)
    }

    /// Version set of a broker that predates DescribeLogDirs.
    pub fn legacy_versions() -> ApiVersionSet {
        ApiVersionSet::new()
            .with(ApiKey::Produce, 0, 3)
            .with(ApiKey::Fetch, 0, 5)
            .with(ApiKey::Metadata, 0, 4)
            .with(ApiKey::OffsetCommit, 0, 3)
            .with(ApiKey::OffsetFetch, 0, 3)
            .with(ApiKey::ApiVersions, 0, 1)
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn update_behavior(&self, f: impl FnOnce(&mut MockBehavior)) {
        f(&mut self.behavior.lock());
    }

    /// Append a record to the consumer stream as if someone else produced it.
    pub fn inject_record(&self, record: ConsumedRecord) {
        self.records.send(record);
    }

    /// End the current `consume` stream, as a group rebalance would. Records
    /// produced afterwards are delivered to the next `consume` call.
    pub fn end_consume_stream(&self) {
        self.records.restart();
    }

    /// Append an entry to the offsets-topic stream.
    pub fn push_group_offset(&self, commit: Result<GroupOffsetCommit>) {
        self.group_offsets.send(commit);
    }

    /// Last committed offset of `group_id` for a partition.
    pub fn committed_offset(&self, group_id: &str, topic: &str, partition: i32) -> Option<i64> {
        self.committed
            .lock()
            .get(&(group_id.to_string(), topic.to_string(), partition))
            .copied()
    }

    pub fn api_versions_calls(&self) -> usize {
        self.api_versions_calls.load(Ordering::SeqCst)
    }

    pub fn describe_log_dirs_calls(&self) -> usize {
        self.describe_log_dirs_calls.load(Ordering::SeqCst)
    }

    pub fn produce_calls(&self) -> usize {
        self.produce_calls.load(Ordering::SeqCst)
    }

    pub fn commit_calls(&self) -> usize {
        self.commit_calls.load(Ordering::SeqCst)
    }
}

async fn delay(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn api_versions(&self) -> Result<ApiVersionSet> {
        self.api_versions_calls.fetch_add(1, Ordering::SeqCst);
        let (wait, error) = {
            let behavior = self.behavior.lock();
            (behavior.api_versions_delay, behavior.api_versions_error.clone())
        };
        delay(wait).await;
        match error {
            Some(e) => Err(e),
            None => Ok(self.versions.lock().clone()),
        }
    }

    async fn describe_log_dirs(&self) -> Result<Vec<LogDirInfo>> {
        self.describe_log_dirs_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.log_dirs.lock().clone())
    }

    async fn produce(&self, record: ProduceRecord) -> Result<ProduceAck> {
        self.produce_calls.fetch_add(1, Ordering::SeqCst);
        let (wait, error) = {
            let behavior = self.behavior.lock();
            (behavior.produce_delay, behavior.produce_error.clone())
        };
        delay(wait).await;
        if let Some(e) = error {
            return Err(e);
        }

        let offset = {
            let mut offsets = self.next_offsets.lock();
            let next = offsets
                .entry((record.topic.clone(), record.partition))
                .or_insert(0);
            let offset = *next;
            *next += 1;
            offset
        };

        self.records.send(ConsumedRecord {
            topic: record.topic,
            partition: record.partition,
            offset,
            value: record.value,
        });

        Ok(ProduceAck {
            partition: record.partition,
            offset,
        })
    }

    fn consume(&self, topic: &str) -> BoxStream<'static, Result<ConsumedRecord>> {
        let topic = topic.to_string();
        self.records
            .subscribe()
            .filter(move |record| futures::future::ready(record.topic == topic))
            .map(Ok)
            .boxed()
    }

    async fn commit_offset(
        &self,
        group_id: &str,
        record: &ConsumedRecord,
    ) -> Result<CommitConfirmation> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        let (wait, error) = {
            let behavior = self.behavior.lock();
            (behavior.commit_delay, behavior.commit_error.clone())
        };
        delay(wait).await;
        if let Some(e) = error {
            return Err(e);
        }

        // Kafka convention: the committed offset is the next one to read
        let offset = record.offset + 1;
        self.committed.lock().insert(
            (group_id.to_string(), record.topic.clone(), record.partition),
            offset,
        );
        Ok(CommitConfirmation {
            partition: record.partition,
            offset,
        })
    }

    fn consume_offsets(&self) -> BoxStream<'static, Result<GroupOffsetCommit>> {
        self.group_offsets.subscribe()
    }
}
