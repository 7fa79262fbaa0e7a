//! # Minion
//! Kafka cluster monitoring core.
//!
//! Minion watches a Kafka cluster from the outside: it memoizes broker
//! metadata, follows consumer group offsets, and continuously probes the
//! produce/consume/commit path with canary messages, exporting what it sees as
//! Prometheus metrics.
//!
//! The crate does not speak the Kafka protocol. Plug in a Kafka client by
//! implementing the [`Broker`](broker::Broker) trait.
//!
//! ## Getting started
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use minion::prelude::*;
//!
//! async fn monitor(broker: Arc<dyn Broker>) -> minion::Result<()> {
//!     let mut config = ServiceConfig::default();
//!     config.end_to_end.enabled = true;
//!
//!     let mut service = Service::with_default_registry(config, broker)?;
//!     service.start().await?;
//!
//!     let text = minion::metrics::encode_metrics(&minion::metrics::REGISTRY)
//!         .expect("metrics are encodable");
//!     println!("{text}");
//!     Ok(())
//! }
//! ```
//!
//! ## Building blocks
//!
//! - [`cache::TtlCache`]: expiring key/value cache with coalesced population
//! - [`metrics::histogram_buckets`]: latency bucket layout derived from an SLA
//! - [`end_to_end::EndToEnd`]: the canary producer/consumer pipeline
//! - [`storage::OffsetStorage`]: consumer group offsets read from the offsets topic

#![forbid(unsafe_code)]

pub mod broker;
pub mod cache;
pub mod config;
pub mod constants;
pub mod end_to_end;
pub mod error;
pub mod filter;
pub mod metrics;
#[cfg(any(test, feature = "test-utilities"))]
pub mod mock_broker;
pub mod service;
pub mod storage;
pub mod tasks;
pub mod telemetry;

pub use config::ServiceConfig;
pub use error::{Error, Result};
pub use service::Service;

pub mod prelude {
    //! Commonly used types.
    pub use crate::broker::{ApiKey, ApiVersionSet, Broker};
    pub use crate::config::{ScrapeMode, ServiceConfig};
    pub use crate::error::{Error, Result};
    pub use crate::service::Service;

    pub use bytes;
}
