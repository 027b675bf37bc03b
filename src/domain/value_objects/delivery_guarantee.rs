use serde::{Deserialize, Serialize};
use std::fmt;

/// How the dispatcher trades duplicate alerts against lost ones when the host dies mid-delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryGuarantee {
    /// A crash between alerting and committing re-alerts once after restart.
    #[default]
    AtLeastOnce,
    /// An intent is committed before alerting; a crash after it never re-alerts.
    AtMostOnce,
}

impl DeliveryGuarantee {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "at_least_once" => Some(DeliveryGuarantee::AtLeastOnce),
            "at_most_once" => Some(DeliveryGuarantee::AtMostOnce),
            _ => None,
        }
    }
}

impl fmt::Display for DeliveryGuarantee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryGuarantee::AtLeastOnce => f.write_str("at-least-once"),
            DeliveryGuarantee::AtMostOnce => f.write_str("at-most-once"),
        }
    }
}
