//! The monitor service.
//!
//! [`Service`] wires configuration, the broker collaborator, the metadata cache,
//! offset storage and the end-to-end pipeline together and owns their
//! background loops.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use minion::prelude::*;
//!
//! async fn run(broker: Arc<dyn Broker>) -> minion::Result<()> {
//!     let config = ServiceConfig::from_env()?;
//!     let mut service = Service::with_default_registry(config, broker)?;
//!     service.start().await?;
//!
//!     // ... serve metrics until told to stop
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use prometheus::Registry;
use tracing::{info, warn};

use crate::broker::{ApiKey, ApiVersionSet, Broker, LogDirInfo};
use crate::cache::TtlCache;
use crate::config::{ScrapeMode, ServiceConfig};
use crate::constants::{CACHE_KEY_API_VERSIONS, CACHE_KEY_LOG_DIRS, COMPATIBILITY_CHECK_TIMEOUT};
use crate::end_to_end::EndToEnd;
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::metrics::{EndToEndMetrics, REGISTRY};
use crate::storage::OffsetStorage;
use crate::tasks::{TaskRegistry, TaskStatus};

/// Values memoized in the metadata cache. Each cache key always holds the same
/// variant.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerMetadata {
    ApiVersions(ApiVersionSet),
    LogDirs(Vec<LogDirInfo>),
}

pub struct Service {
    config: ServiceConfig,
    broker: Arc<dyn Broker>,
    cache: TtlCache<BrokerMetadata>,
    topic_filter: Filter,
    group_filter: Arc<Filter>,
    storage: Arc<OffsetStorage>,
    end_to_end: Option<Arc<EndToEnd>>,
    tasks: TaskRegistry,
    started: bool,
}

impl Service {
    /// Build a service from validated configuration. End-to-end metrics are
    /// registered with `registry` only when the probe is enabled.
    pub fn new(
        config: ServiceConfig,
        broker: Arc<dyn Broker>,
        registry: &Registry,
    ) -> Result<Self> {
        if let Err(problems) = config.validate() {
            return Err(Error::Config(problems.join("; ")));
        }

        let topic_filter =
            Filter::new(&config.topics.allowed_topics, &config.topics.ignored_topics)?;
        let group_filter = Filter::new(
            &config.consumer_groups.allowed_group_ids,
            &config.consumer_groups.ignored_group_ids,
        )?;

        let end_to_end = if config.end_to_end.enabled {
            let metrics =
                EndToEndMetrics::register(registry, &config.metric_namespace, &config.end_to_end)?;
            let pipeline = EndToEnd::new(config.end_to_end.clone(), metrics);
            info!(minion_id = %pipeline.minion_id(), "End-to-end probe enabled");
            Some(Arc::new(pipeline))
        } else {
            None
        };

        Ok(Self {
            config,
            broker,
            cache: TtlCache::new(),
            topic_filter,
            group_filter: Arc::new(group_filter),
            storage: Arc::new(OffsetStorage::new()),
            end_to_end,
            tasks: TaskRegistry::new(),
            started: false,
        })
    }

    /// [`Service::new`] against the process-wide [`REGISTRY`].
    pub fn with_default_registry(config: ServiceConfig, broker: Arc<dyn Broker>) -> Result<Self> {
        Self::new(config, broker, &REGISTRY)
    }

    /// Check broker compatibility and spawn the background loops.
    ///
    /// Fails if the broker cannot be queried for its API versions within
    /// [`COMPATIBILITY_CHECK_TIMEOUT`]. Features the broker cannot serve are
    /// disabled with a warning instead.
    pub async fn start(&mut self) -> Result<()> {
        if self.tasks.is_shutting_down() {
            return Err(Error::Shutdown);
        }
        if self.started {
            warn!("Service already started");
            return Ok(());
        }

        self.ensure_compatibility().await?;

        if self.config.consumer_groups.scrape_mode == ScrapeMode::OffsetsTopic {
            let broker = self.broker.clone();
            let storage = self.storage.clone();
            let groups = self.group_filter.clone();
            self.tasks.spawn("consumer_group_offsets", async move {
                storage.consume_offsets(broker.as_ref(), &groups).await;
            });
        }

        if let Some(pipeline) = &self.end_to_end {
            let (broker, producer) = (self.broker.clone(), pipeline.clone());
            self.tasks.spawn("end_to_end_producer", async move {
                producer.run_producer(broker.as_ref()).await;
            });

            let (broker, consumer) = (self.broker.clone(), pipeline.clone());
            self.tasks.spawn("end_to_end_consumer", async move {
                consumer.run_consumer(broker.as_ref()).await;
            });
        }

        self.started = true;
        info!(
            scrape_mode = %self.config.consumer_groups.scrape_mode,
            log_dirs = self.config.log_dirs.enabled,
            end_to_end = self.end_to_end.is_some(),
            "Minion service started"
        );
        Ok(())
    }

    /// One-shot capability check against the connected broker.
    async fn ensure_compatibility(&mut self) -> Result<()> {
        let versions = match tokio::time::timeout(COMPATIBILITY_CHECK_TIMEOUT, self.api_versions())
            .await
        {
            Ok(Ok(versions)) => versions,
            Ok(Err(e)) => return Err(Error::Compatibility(Box::new(e))),
            Err(_) => {
                return Err(Error::Compatibility(Box::new(Error::Timeout(
                    COMPATIBILITY_CHECK_TIMEOUT,
                ))));
            }
        };

        if self.config.log_dirs.enabled && !versions.has_key(ApiKey::DescribeLogDirs) {
            warn!(
                "Log dirs feature is enabled, but the Kafka cluster does not support \
                 DescribeLogDirs requests. Disabling the log dirs feature"
            );
            self.config.log_dirs.enabled = false;
        }

        Ok(())
    }

    /// Signal every background loop to stop and wait for them.
    pub async fn shutdown(&mut self) {
        info!("Shutting down minion service");
        self.tasks.shutdown_all().await;
    }

    // =========================================================================
    // Cached broker metadata
    // =========================================================================

    /// API versions of the connected broker, memoized for `metadata_cache_ttl`.
    pub async fn api_versions(&self) -> Result<ApiVersionSet> {
        let broker = self.broker.clone();
        let metadata = self
            .cache
            .get_or_populate(CACHE_KEY_API_VERSIONS, self.config.metadata_cache_ttl, || async move {
                broker.api_versions().await.map(BrokerMetadata::ApiVersions)
            })
            .await?;

        match metadata {
            BrokerMetadata::ApiVersions(versions) => Ok(versions),
            other => Err(unexpected_variant(CACHE_KEY_API_VERSIONS, &other)),
        }
    }

    /// Log directories of all brokers, memoized for `metadata_cache_ttl`.
    pub async fn describe_log_dirs(&self) -> Result<Vec<LogDirInfo>> {
        if !self.config.log_dirs.enabled {
            return Err(Error::FeatureDisabled("log_dirs"));
        }

        let broker = self.broker.clone();
        let metadata = self
            .cache
            .get_or_populate(CACHE_KEY_LOG_DIRS, self.config.metadata_cache_ttl, || async move {
                broker.describe_log_dirs().await.map(BrokerMetadata::LogDirs)
            })
            .await?;

        match metadata {
            BrokerMetadata::LogDirs(dirs) => Ok(dirs),
            other => Err(unexpected_variant(CACHE_KEY_LOG_DIRS, &other)),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn is_topic_allowed(&self, topic: &str) -> bool {
        self.topic_filter.is_allowed(topic)
    }

    pub fn is_group_allowed(&self, group_id: &str) -> bool {
        self.group_filter.is_allowed(group_id)
    }

    /// Effective configuration, including features the compatibility gate
    /// turned off.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn log_dirs_enabled(&self) -> bool {
        self.config.log_dirs.enabled
    }

    pub fn cache(&self) -> &TtlCache<BrokerMetadata> {
        &self.cache
    }

    pub fn offset_storage(&self) -> &Arc<OffsetStorage> {
        &self.storage
    }

    pub fn end_to_end(&self) -> Option<&Arc<EndToEnd>> {
        self.end_to_end.as_ref()
    }

    /// Status of every background loop, sorted by name.
    pub fn task_health(&self) -> Vec<(&'static str, TaskStatus)> {
        self.tasks.health_check()
    }
}

fn unexpected_variant(key: &str, found: &BrokerMetadata) -> Error {
    Error::Codec(format!("cache key {key} holds unexpected value {found:?}"))
}
