//! Canary payload.

use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Synthetic message produced by the end-to-end probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanaryMessage {
    /// Instance that produced the message.
    pub minion_id: String,
    /// Production time, milliseconds since the Unix epoch (UTC).
    pub produced_at: i64,
    /// Partition the message was produced to.
    pub partition: i32,
}

impl CanaryMessage {
    /// Stamp a new message with the current wall-clock time.
    pub fn new(minion_id: impl Into<String>, partition: i32) -> Self {
        Self {
            minion_id: minion_id.into(),
            produced_at: Utc::now().timestamp_millis(),
            partition,
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(value: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(value)?)
    }

    /// Age of the message at `now_ms`. Clock skew between producer and consumer
    /// can make this negative, which is reported as zero.
    pub fn age_at(&self, now_ms: i64) -> Duration {
        let millis = now_ms.saturating_sub(self.produced_at).max(0);
        Duration::from_millis(millis as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let msg = CanaryMessage {
            minion_id: "abc".to_string(),
            produced_at: 1_700_000_000_000,
            partition: 4,
        };
        let encoded = msg.encode().unwrap();
        assert_eq!(
            &encoded[..],
            br#"{"minionId":"abc","producedAt":1700000000000,"partition":4}"#
        );
        assert_eq!(CanaryMessage::decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(CanaryMessage::decode(b"not json").is_err());
        assert!(CanaryMessage::decode(br#"{"minionId":"abc"}"#).is_err());
    }

    #[test]
    fn test_age() {
        let msg = CanaryMessage {
            minion_id: "abc".to_string(),
            produced_at: 10_000,
            partition: 0,
        };
        assert_eq!(msg.age_at(12_500), Duration::from_millis(2_500));
        assert_eq!(msg.age_at(9_000), Duration::ZERO);
    }
}
