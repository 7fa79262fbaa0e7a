//! Consumer group offsets collected from the offsets topic.
//!
//! In [`ScrapeMode::OffsetsTopic`](crate::config::ScrapeMode::OffsetsTopic) the
//! service runs [`OffsetStorage::consume_offsets`] in the background. It keeps
//! the latest committed offset per `(group, topic, partition)`; exporters read
//! them through [`OffsetStorage::offset`] or [`OffsetStorage::snapshot`].

use dashmap::DashMap;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::broker::{Broker, GroupOffsetCommit};
use crate::constants::RESUBSCRIBE_DELAY;
use crate::filter::Filter;

/// Key of a stored offset: (group, topic, partition).
pub type GroupPartitionKey = (String, String, i32);

#[derive(Debug, Default)]
pub struct OffsetStorage {
    offsets: DashMap<GroupPartitionKey, i64>,
}

impl OffsetStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one commit. Tombstones remove the stored offset.
    pub fn apply(&self, commit: GroupOffsetCommit) {
        let key = (commit.group, commit.topic, commit.partition);
        match commit.offset {
            Some(offset) => {
                self.offsets.insert(key, offset);
            }
            None => {
                self.offsets.remove(&key);
            }
        }
    }

    pub fn offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        self.offsets
            .get(&(group.to_string(), topic.to_string(), partition))
            .map(|entry| *entry.value())
    }

    /// Distinct group ids with at least one stored offset, sorted.
    pub fn groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self
            .offsets
            .iter()
            .map(|entry| entry.key().0.clone())
            .collect();
        groups.sort();
        groups.dedup();
        groups
    }

    /// Copy of every stored offset, in no particular order.
    pub fn snapshot(&self) -> Vec<GroupOffsetCommit> {
        self.offsets
            .iter()
            .map(|entry| {
                let (group, topic, partition) = entry.key().clone();
                GroupOffsetCommit {
                    group,
                    topic,
                    partition,
                    offset: Some(*entry.value()),
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Follow the broker's offsets topic forever, storing commits of groups
    /// that pass `groups`.
    pub async fn consume_offsets(&self, broker: &dyn Broker, groups: &Filter) {
        info!("Starting to consume consumer group offsets");
        loop {
            let mut stream = broker.consume_offsets();
            while let Some(item) = stream.next().await {
                match item {
                    Ok(commit) if groups.is_allowed(&commit.group) => self.apply(commit),
                    Ok(commit) => {
                        debug!(group = %commit.group, "Skipping offset commit of filtered group");
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read from the offsets topic");
                    }
                }
            }

            warn!("Offsets topic stream ended, re-subscribing");
            tokio::time::sleep(RESUBSCRIBE_DELAY).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::mock_broker::MockBroker;
    use std::sync::Arc;
    use std::time::Duration;

    fn commit(group: &str, partition: i32, offset: Option<i64>) -> GroupOffsetCommit {
        GroupOffsetCommit {
            group: group.to_string(),
            topic: "orders".to_string(),
            partition,
            offset,
        }
    }

    #[test]
    fn test_apply_keeps_latest() {
        let storage = OffsetStorage::new();
        storage.apply(commit("billing", 0, Some(10)));
        storage.apply(commit("billing", 0, Some(12)));
        storage.apply(commit("billing", 1, Some(3)));
        assert_eq!(storage.offset("billing", "orders", 0), Some(12));
        assert_eq!(storage.offset("billing", "orders", 1), Some(3));
        assert_eq!(storage.len(), 2);
        assert_eq!(storage.groups(), vec!["billing".to_string()]);
    }

    #[test]
    fn test_tombstone_removes() {
        let storage = OffsetStorage::new();
        storage.apply(commit("billing", 0, Some(10)));
        storage.apply(commit("billing", 0, None));
        assert_eq!(storage.offset("billing", "orders", 0), None);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_consume_offsets_filters_groups() {
        let broker = Arc::new(MockBroker::new());
        let storage = Arc::new(OffsetStorage::new());
        let filter = Filter::new(&["/.*/"], &["/^console-consumer-.*/"]).unwrap();

        broker.push_group_offset(Ok(commit("billing", 0, Some(5))));
        broker.push_group_offset(Err(Error::Broker("corrupt record".into())));
        broker.push_group_offset(Ok(commit("console-consumer-1234", 0, Some(9))));
        broker.push_group_offset(Ok(commit("shipping", 2, Some(7))));

        let task = {
            let broker = broker.clone();
            let storage = storage.clone();
            tokio::spawn(async move { storage.consume_offsets(broker.as_ref(), &filter).await })
        };

        for _ in 0..100 {
            if storage.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        task.abort();

        assert_eq!(storage.groups(), vec!["billing".to_string(), "shipping".to_string()]);
        assert_eq!(storage.offset("shipping", "orders", 2), Some(7));
    }
}
