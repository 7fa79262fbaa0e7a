//! Service configuration.
//!
//! ```rust,no_run
//! use minion::ServiceConfig;
//!
//! // Defaults with the end-to-end probe enabled
//! let mut config = ServiceConfig::default();
//! config.end_to_end.enabled = true;
//! assert!(config.validate().is_ok());
//!
//! // Or from MINION_* environment variables
//! let config = ServiceConfig::from_env().expect("invalid configuration");
//! ```
//!
//! Everything is immutable once the service started, except feature flags
//! the compatibility gate turns off for brokers that lack the required APIs.

use std::time::Duration;

use crate::constants::{
    DEFAULT_ACK_SLA, DEFAULT_COMMIT_SLA, DEFAULT_END_TO_END_PARTITIONS, DEFAULT_END_TO_END_TOPIC,
    DEFAULT_METADATA_CACHE_TTL, DEFAULT_METRIC_NAMESPACE, DEFAULT_PROBE_INTERVAL,
    DEFAULT_ROUNDTRIP_SLA,
};
use crate::error::{Error, Result};
use crate::filter::Filter;

/// How consumer group offsets are collected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScrapeMode {
    /// Offsets are requested through the admin API by the exporter.
    #[default]
    AdminApi,
    /// Offsets are read continuously from the `__consumer_offsets` topic.
    OffsetsTopic,
}

impl std::fmt::Display for ScrapeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScrapeMode::AdminApi => write!(f, "adminApi"),
            ScrapeMode::OffsetsTopic => write!(f, "offsetsTopic"),
        }
    }
}

impl std::str::FromStr for ScrapeMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "adminapi" | "admin-api" | "admin" => Ok(ScrapeMode::AdminApi),
            "offsetstopic" | "offsets-topic" | "offsets" => Ok(ScrapeMode::OffsetsTopic),
            _ => Err(format!(
                "Unknown scrape mode '{}'. Valid options: adminApi, offsetsTopic",
                s
            )),
        }
    }
}

/// Consumer group scraping and filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerGroupsConfig {
    pub scrape_mode: ScrapeMode,
    /// Group ids to export. `/regex/` patterns or exact names.
    pub allowed_group_ids: Vec<String>,
    /// Group ids to skip even if allowed.
    pub ignored_group_ids: Vec<String>,
}

impl Default for ConsumerGroupsConfig {
    fn default() -> Self {
        Self {
            scrape_mode: ScrapeMode::default(),
            allowed_group_ids: vec!["/.*/".to_string()],
            ignored_group_ids: Vec::new(),
        }
    }
}

/// Topic filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicsConfig {
    /// Topics to export. `/regex/` patterns or exact names.
    pub allowed_topics: Vec<String>,
    /// Topics to skip even if allowed.
    pub ignored_topics: Vec<String>,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            allowed_topics: vec!["/.*/".to_string()],
            ignored_topics: Vec::new(),
        }
    }
}

/// Log directory description. Requires the DescribeLogDirs API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogDirsConfig {
    pub enabled: bool,
}

impl Default for LogDirsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerConfig {
    /// Maximum acceptable time until a produce request is acknowledged. Also
    /// the upper end of the ack latency histogram.
    pub ack_sla: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            ack_sla: DEFAULT_ACK_SLA,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Consumer group the end-to-end consumer commits offsets for.
    pub group_id: String,
    /// Canaries older than this when consumed are dropped.
    pub roundtrip_sla: Duration,
    /// Commits slower than this are observed but not counted.
    pub commit_sla: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group_id: "kminion-end-to-end".to_string(),
            roundtrip_sla: DEFAULT_ROUNDTRIP_SLA,
            commit_sla: DEFAULT_COMMIT_SLA,
        }
    }
}

/// End-to-end canary probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndToEndConfig {
    pub enabled: bool,
    pub topic_name: String,
    /// Each probe round produces one canary to every partition in `0..partitions`.
    pub partitions: i32,
    pub probe_interval: Duration,
    pub producer: ProducerConfig,
    pub consumer: ConsumerConfig,
}

impl Default for EndToEndConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            topic_name: DEFAULT_END_TO_END_TOPIC.to_string(),
            partitions: DEFAULT_END_TO_END_PARTITIONS,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            producer: ProducerConfig::default(),
            consumer: ConsumerConfig::default(),
        }
    }
}

/// Top-level configuration of the monitor service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Prometheus namespace of every metric.
    pub metric_namespace: String,
    /// Lifetime of memoized broker metadata.
    pub metadata_cache_ttl: Duration,
    pub consumer_groups: ConsumerGroupsConfig,
    pub topics: TopicsConfig,
    pub log_dirs: LogDirsConfig,
    pub end_to_end: EndToEndConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            metric_namespace: DEFAULT_METRIC_NAMESPACE.to_string(),
            metadata_cache_ttl: DEFAULT_METADATA_CACHE_TTL,
            consumer_groups: ConsumerGroupsConfig::default(),
            topics: TopicsConfig::default(),
            log_dirs: LogDirsConfig::default(),
            end_to_end: EndToEndConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Validate the configuration and return every problem found.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !is_metric_identifier(&self.metric_namespace) {
            errors.push(format!(
                "metric_namespace ({:?}) must match [a-zA-Z_][a-zA-Z0-9_]*",
                self.metric_namespace
            ));
        }

        if self.metadata_cache_ttl.is_zero() {
            errors.push("metadata_cache_ttl must be greater than 0".to_string());
        }

        let patterns = [
            ("consumer_groups.allowed_group_ids", &self.consumer_groups.allowed_group_ids),
            ("consumer_groups.ignored_group_ids", &self.consumer_groups.ignored_group_ids),
            ("topics.allowed_topics", &self.topics.allowed_topics),
            ("topics.ignored_topics", &self.topics.ignored_topics),
        ];
        for (field, list) in patterns {
            for pattern in list {
                if let Err(e) = Filter::compile_pattern(pattern) {
                    errors.push(format!("{field}: invalid pattern {pattern:?}: {e}"));
                }
            }
        }

        let e2e = &self.end_to_end;
        if e2e.enabled {
            if e2e.topic_name.is_empty() {
                errors.push("end_to_end.topic_name must not be empty".to_string());
            }
            if e2e.partitions < 1 {
                errors.push(format!(
                    "end_to_end.partitions ({}) must be at least 1",
                    e2e.partitions
                ));
            }
            if e2e.probe_interval.is_zero() {
                errors.push("end_to_end.probe_interval must be greater than 0".to_string());
            }
            if e2e.consumer.group_id.is_empty() {
                errors.push("end_to_end.consumer.group_id must not be empty".to_string());
            }
            let slas = [
                ("end_to_end.producer.ack_sla", e2e.producer.ack_sla),
                ("end_to_end.consumer.roundtrip_sla", e2e.consumer.roundtrip_sla),
                ("end_to_end.consumer.commit_sla", e2e.consumer.commit_sla),
            ];
            for (field, sla) in slas {
                if sla.is_zero() {
                    errors.push(format!("{field} must be greater than 0"));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Environment variables:
    /// - `MINION_METRIC_NAMESPACE` (default: kminion)
    /// - `MINION_METADATA_CACHE_TTL_MS` (default: 10000)
    /// - `MINION_SCRAPE_MODE`: "adminApi" or "offsetsTopic" (default: adminApi)
    /// - `MINION_ALLOWED_GROUPS`, `MINION_IGNORED_GROUPS`: comma separated patterns
    /// - `MINION_ALLOWED_TOPICS`, `MINION_IGNORED_TOPICS`: comma separated patterns
    /// - `MINION_LOG_DIRS_ENABLED`: "true" or "false" (default: true)
    /// - `MINION_E2E_ENABLED`: "true" or "false" (default: false)
    /// - `MINION_E2E_TOPIC` (default: kminion-end-to-end)
    /// - `MINION_E2E_PARTITIONS` (default: 1)
    /// - `MINION_E2E_PROBE_INTERVAL_MS` (default: 100)
    /// - `MINION_E2E_GROUP_ID` (default: kminion-end-to-end)
    /// - `MINION_E2E_ACK_SLA_MS` (default: 5000)
    /// - `MINION_E2E_ROUNDTRIP_SLA_MS` (default: 20000)
    /// - `MINION_E2E_COMMIT_SLA_MS` (default: 10000)
    ///
    /// The result is validated before it is returned.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ns) = lookup("MINION_METRIC_NAMESPACE") {
            config.metric_namespace = ns;
        }
        if let Some(ttl) = parse_millis(&lookup, "MINION_METADATA_CACHE_TTL_MS")? {
            config.metadata_cache_ttl = ttl;
        }

        if let Some(mode) = lookup("MINION_SCRAPE_MODE") {
            config.consumer_groups.scrape_mode = mode.parse().map_err(Error::Config)?;
        }
        if let Some(list) = lookup("MINION_ALLOWED_GROUPS") {
            config.consumer_groups.allowed_group_ids = split_list(&list);
        }
        if let Some(list) = lookup("MINION_IGNORED_GROUPS") {
            config.consumer_groups.ignored_group_ids = split_list(&list);
        }
        if let Some(list) = lookup("MINION_ALLOWED_TOPICS") {
            config.topics.allowed_topics = split_list(&list);
        }
        if let Some(list) = lookup("MINION_IGNORED_TOPICS") {
            config.topics.ignored_topics = split_list(&list);
        }

        if let Some(enabled) = parse_bool(&lookup, "MINION_LOG_DIRS_ENABLED")? {
            config.log_dirs.enabled = enabled;
        }

        let e2e = &mut config.end_to_end;
        if let Some(enabled) = parse_bool(&lookup, "MINION_E2E_ENABLED")? {
            e2e.enabled = enabled;
        }
        if let Some(topic) = lookup("MINION_E2E_TOPIC") {
            e2e.topic_name = topic;
        }
        if let Some(partitions) = lookup("MINION_E2E_PARTITIONS") {
            e2e.partitions = partitions
                .parse()
                .map_err(|e| Error::Config(format!("Invalid MINION_E2E_PARTITIONS: {}", e)))?;
        }
        if let Some(interval) = parse_millis(&lookup, "MINION_E2E_PROBE_INTERVAL_MS")? {
            e2e.probe_interval = interval;
        }
        if let Some(group_id) = lookup("MINION_E2E_GROUP_ID") {
            e2e.consumer.group_id = group_id;
        }
        if let Some(sla) = parse_millis(&lookup, "MINION_E2E_ACK_SLA_MS")? {
            e2e.producer.ack_sla = sla;
        }
        if let Some(sla) = parse_millis(&lookup, "MINION_E2E_ROUNDTRIP_SLA_MS")? {
            e2e.consumer.roundtrip_sla = sla;
        }
        if let Some(sla) = parse_millis(&lookup, "MINION_E2E_COMMIT_SLA_MS")? {
            e2e.consumer.commit_sla = sla;
        }

        if let Err(errors) = config.validate() {
            return Err(Error::Config(format!(
                "Configuration validation failed: {}",
                errors.join("; ")
            )));
        }

        Ok(config)
    }
}

fn parse_millis<F>(lookup: &F, key: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| Error::Config(format!("Invalid {}: {}", key, e)))
        })
        .transpose()
}

fn parse_bool<F>(lookup: &F, key: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            other => Err(Error::Config(format!(
                "Invalid {}: expected true or false, got {:?}",
                key, other
            ))),
        })
        .transpose()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn is_metric_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.end_to_end.enabled);
        assert!(config.log_dirs.enabled);
        assert_eq!(config.consumer_groups.scrape_mode, ScrapeMode::AdminApi);
    }

    #[test]
    fn test_scrape_mode_parse() {
        assert_eq!("offsetsTopic".parse::<ScrapeMode>().unwrap(), ScrapeMode::OffsetsTopic);
        assert_eq!("ADMINAPI".parse::<ScrapeMode>().unwrap(), ScrapeMode::AdminApi);
        assert!("zookeeper".parse::<ScrapeMode>().is_err());
        assert_eq!(ScrapeMode::OffsetsTopic.to_string(), "offsetsTopic");
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = ServiceConfig::default();
        config.metric_namespace = "9bad".to_string();
        config.metadata_cache_ttl = Duration::ZERO;
        config.topics.allowed_topics = vec!["/[unclosed/".to_string()];
        config.end_to_end.enabled = true;
        config.end_to_end.partitions = 0;
        config.end_to_end.consumer.commit_sla = Duration::ZERO;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 5, "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("metric_namespace")));
        assert!(errors.iter().any(|e| e.contains("topics.allowed_topics")));
        assert!(errors.iter().any(|e| e.contains("commit_sla")));
    }

    #[test]
    fn test_disabled_end_to_end_is_not_validated() {
        let mut config = ServiceConfig::default();
        config.end_to_end.partitions = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = ServiceConfig::from_lookup(lookup_from(&[
            ("MINION_METRIC_NAMESPACE", "canary"),
            ("MINION_SCRAPE_MODE", "offsetsTopic"),
            ("MINION_IGNORED_GROUPS", "console-consumer, /^_.*/"),
            ("MINION_LOG_DIRS_ENABLED", "false"),
            ("MINION_E2E_ENABLED", "true"),
            ("MINION_E2E_PARTITIONS", "3"),
            ("MINION_E2E_ROUNDTRIP_SLA_MS", "1500"),
        ]))
        .unwrap();

        assert_eq!(config.metric_namespace, "canary");
        assert_eq!(config.consumer_groups.scrape_mode, ScrapeMode::OffsetsTopic);
        assert_eq!(
            config.consumer_groups.ignored_group_ids,
            vec!["console-consumer".to_string(), "/^_.*/".to_string()]
        );
        assert!(!config.log_dirs.enabled);
        assert!(config.end_to_end.enabled);
        assert_eq!(config.end_to_end.partitions, 3);
        assert_eq!(
            config.end_to_end.consumer.roundtrip_sla,
            Duration::from_millis(1500)
        );
        // untouched values keep their defaults
        assert_eq!(config.end_to_end.producer.ack_sla, DEFAULT_ACK_SLA);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = ServiceConfig::from_lookup(lookup_from(&[("MINION_E2E_ACK_SLA_MS", "fast")]))
            .unwrap_err();
        assert!(err.to_string().contains("MINION_E2E_ACK_SLA_MS"));

        let err = ServiceConfig::from_lookup(lookup_from(&[("MINION_E2E_ENABLED", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_from_lookup_validates() {
        let err = ServiceConfig::from_lookup(lookup_from(&[
            ("MINION_E2E_ENABLED", "true"),
            ("MINION_E2E_TOPIC", ""),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("topic_name"));
    }
}
