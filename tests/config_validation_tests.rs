//! Integration tests for ServiceConfig.
//!
//! These tests verify defaults, validation and environment overrides.

use std::collections::HashMap;
use std::time::Duration;

use minion::config::{EndToEndConfig, ScrapeMode, ServiceConfig};
use minion::constants::*;
use minion::filter::Filter;

fn lookup(vars: &[(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<&str, &str> = vars.iter().copied().collect();
    move |key| vars.get(key).map(|v| v.to_string())
}

// ============================================================================
// Defaults
// ============================================================================

#[test]
fn test_end_to_end_defaults() {
    let config = EndToEndConfig::default();
    assert!(!config.enabled);
    assert_eq!(config.topic_name, DEFAULT_END_TO_END_TOPIC);
    assert_eq!(config.partitions, DEFAULT_END_TO_END_PARTITIONS);
    assert_eq!(config.probe_interval, DEFAULT_PROBE_INTERVAL);
    assert_eq!(config.producer.ack_sla, DEFAULT_ACK_SLA);
    assert_eq!(config.consumer.roundtrip_sla, DEFAULT_ROUNDTRIP_SLA);
    assert_eq!(config.consumer.commit_sla, DEFAULT_COMMIT_SLA);
}

#[test]
fn test_default_filters_allow_everything() {
    let config = ServiceConfig::default();
    let topics = Filter::new(&config.topics.allowed_topics, &config.topics.ignored_topics).unwrap();
    assert!(topics.is_allowed("orders"));
    assert!(topics.is_allowed("__consumer_offsets"));
}

#[test]
fn test_empty_environment_gives_defaults() {
    let config = ServiceConfig::from_lookup(lookup(&[])).unwrap();
    assert_eq!(config, ServiceConfig::default());
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_enabled_end_to_end_is_validated() {
    let mut config = ServiceConfig::default();
    config.end_to_end.enabled = true;
    config.end_to_end.probe_interval = Duration::ZERO;
    config.end_to_end.consumer.group_id = String::new();

    let errors = config.validate().unwrap_err();
    assert_eq!(errors.len(), 2, "{errors:?}");
    assert!(errors.iter().any(|e| e.contains("probe_interval")));
    assert!(errors.iter().any(|e| e.contains("group_id")));
}

#[test]
fn test_invalid_group_pattern_reported() {
    let mut config = ServiceConfig::default();
    config.consumer_groups.ignored_group_ids = vec!["/(/".to_string()];
    let errors = config.validate().unwrap_err();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("consumer_groups.ignored_group_ids"));
}

#[test]
fn test_environment_overrides() {
    let config = ServiceConfig::from_lookup(lookup(&[
        ("MINION_SCRAPE_MODE", "offsetsTopic"),
        ("MINION_ALLOWED_TOPICS", "orders,/^payments-.*/"),
        ("MINION_METADATA_CACHE_TTL_MS", "2500"),
        ("MINION_E2E_ENABLED", "yes"),
        ("MINION_E2E_GROUP_ID", "canary-probe"),
        ("MINION_E2E_COMMIT_SLA_MS", "750"),
    ]))
    .unwrap();

    assert_eq!(config.consumer_groups.scrape_mode, ScrapeMode::OffsetsTopic);
    assert_eq!(config.topics.allowed_topics.len(), 2);
    assert_eq!(config.metadata_cache_ttl, Duration::from_millis(2500));
    assert!(config.end_to_end.enabled);
    assert_eq!(config.end_to_end.consumer.group_id, "canary-probe");
    assert_eq!(config.end_to_end.consumer.commit_sla, Duration::from_millis(750));
}

#[test]
fn test_unknown_scrape_mode_rejected() {
    let err =
        ServiceConfig::from_lookup(lookup(&[("MINION_SCRAPE_MODE", "zookeeper")])).unwrap_err();
    assert!(err.is_fatal());
}
