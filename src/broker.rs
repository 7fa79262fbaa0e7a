//! Broker collaborator.
//!
//! The monitor never speaks the Kafka wire protocol itself. Everything it needs
//! from the cluster goes through the [`Broker`] trait, which a host implements
//! on top of its Kafka client of choice.
//!
//! # Available Implementations
//!
//! - [`MockBroker`](crate::mock_broker::MockBroker): in-memory loopback broker
//!   for tests (`test-utilities` feature)

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::Result;

/// Kafka API keys the monitor cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiKey {
    Produce,
    Fetch,
    ListOffsets,
    Metadata,
    OffsetCommit,
    OffsetFetch,
    FindCoordinator,
    ListGroups,
    DescribeGroups,
    ApiVersions,
    DescribeConfigs,
    DescribeLogDirs,
    Unknown(i16),
}

impl From<i16> for ApiKey {
    fn from(value: i16) -> Self {
        match value {
            0 => ApiKey::Produce,
            1 => ApiKey::Fetch,
            2 => ApiKey::ListOffsets,
            3 => ApiKey::Metadata,
            8 => ApiKey::OffsetCommit,
            9 => ApiKey::OffsetFetch,
            10 => ApiKey::FindCoordinator,
            15 => ApiKey::DescribeGroups,
            16 => ApiKey::ListGroups,
            18 => ApiKey::ApiVersions,
            32 => ApiKey::DescribeConfigs,
            35 => ApiKey::DescribeLogDirs,
            n => ApiKey::Unknown(n),
        }
    }
}

impl From<ApiKey> for i16 {
    fn from(key: ApiKey) -> Self {
        match key {
            ApiKey::Produce => 0,
            ApiKey::Fetch => 1,
            ApiKey::ListOffsets => 2,
            ApiKey::Metadata => 3,
            ApiKey::OffsetCommit => 8,
            ApiKey::OffsetFetch => 9,
            ApiKey::FindCoordinator => 10,
            ApiKey::DescribeGroups => 15,
            ApiKey::ListGroups => 16,
            ApiKey::ApiVersions => 18,
            ApiKey::DescribeConfigs => 32,
            ApiKey::DescribeLogDirs => 35,
            ApiKey::Unknown(n) => n,
        }
    }
}

/// Version range the broker supports for one API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRange {
    pub min_version: i16,
    pub max_version: i16,
}

impl VersionRange {
    pub const fn new(min_version: i16, max_version: i16) -> Self {
        Self {
            min_version,
            max_version,
        }
    }
}

/// API versions advertised by the connected broker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiVersionSet {
    versions: HashMap<i16, VersionRange>,
}

impl ApiVersionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the range for `key`.
    pub fn with(mut self, key: ApiKey, min_version: i16, max_version: i16) -> Self {
        self.versions
            .insert(key.into(), VersionRange::new(min_version, max_version));
        self
    }

    pub fn has_key(&self, key: ApiKey) -> bool {
        self.versions.contains_key(&i16::from(key))
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

impl FromIterator<(i16, i16, i16)> for ApiVersionSet {
    /// Build from raw `(api_key, min_version, max_version)` triples as found in
    /// an ApiVersions response.
    fn from_iter<T: IntoIterator<Item = (i16, i16, i16)>>(iter: T) -> Self {
        Self {
            versions: iter
                .into_iter()
                .map(|(key, min, max)| (key, VersionRange::new(min, max)))
                .collect(),
        }
    }
}

/// One log directory of one broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogDirInfo {
    pub broker_id: i32,
    pub path: String,
    pub size_bytes: i64,
    pub error: Option<String>,
}

/// A record to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceRecord {
    pub topic: String,
    pub partition: i32,
    pub value: Bytes,
}

/// Broker acknowledgement of a produce request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProduceAck {
    pub partition: i32,
    pub offset: i64,
}

/// A record read from a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub value: Bytes,
}

/// Broker confirmation of an offset commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitConfirmation {
    pub partition: i32,
    pub offset: i64,
}

/// A consumer group offset commit read from the offsets topic.
///
/// `offset` is `None` for tombstones, which mark the group's offset for the
/// partition as deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupOffsetCommit {
    pub group: String,
    pub topic: String,
    pub partition: i32,
    pub offset: Option<i64>,
}

/// The Kafka cluster as seen by the monitor.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Query the API versions the broker supports.
    async fn api_versions(&self) -> Result<ApiVersionSet>;

    /// Describe the log directories of all brokers.
    async fn describe_log_dirs(&self) -> Result<Vec<LogDirInfo>>;

    /// Produce a single record and wait for its acknowledgement.
    async fn produce(&self, record: ProduceRecord) -> Result<ProduceAck>;

    /// Subscribe to `topic`. The stream yields records until the broker goes
    /// away.
    fn consume(&self, topic: &str) -> BoxStream<'static, Result<ConsumedRecord>>;

    /// Commit the offset after `record` for the end-to-end consumer group.
    async fn commit_offset(&self, group_id: &str, record: &ConsumedRecord)
    -> Result<CommitConfirmation>;

    /// Read consumer group offset commits from the offsets topic.
    fn consume_offsets(&self) -> BoxStream<'static, Result<GroupOffsetCommit>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_roundtrip_i16() {
        for raw in [0i16, 1, 2, 3, 8, 9, 10, 15, 16, 18, 32, 35] {
            let key = ApiKey::from(raw);
            assert!(!matches!(key, ApiKey::Unknown(_)), "{raw} should be known");
            assert_eq!(i16::from(key), raw);
        }
        assert_eq!(ApiKey::from(99), ApiKey::Unknown(99));
        assert_eq!(i16::from(ApiKey::Unknown(99)), 99);
    }

    #[test]
    fn test_version_set_lookup() {
        let versions: ApiVersionSet = [(0, 0, 9), (35, 0, 4)].into_iter().collect();
        assert!(versions.has_key(ApiKey::Produce));
        assert!(versions.has_key(ApiKey::DescribeLogDirs));
        assert!(!versions.has_key(ApiKey::DescribeConfigs));
        assert_eq!(versions.len(), 2);

        assert_eq!(
            versions,
            ApiVersionSet::new()
                .with(ApiKey::Produce, 0, 9)
                .with(ApiKey::DescribeLogDirs, 0, 4)
        );
    }
}
