//! Result records produced by probe runs
//!
//! A record is a flat JSON object: scalar fields such as `host` and `port`,
//! and nested duration objects for every `*_rtt` stage measurement.

use serde_json::{Map, Value, json};
use std::time::Duration;

/// Field mapping filled in by a single probe execution
pub type Event = Map<String, Value>;

/// Field key of the base TCP connect duration
pub const TCP_CONNECT_RTT: &str = "tcp_connect_rtt";

/// Field key of the SOCKS5 negotiation duration
pub const SOCKS5_CONNECT_RTT: &str = "socks5_connect_rtt";

/// Field key of the TLS handshake duration
pub const TLS_HANDSHAKE_RTT: &str = "tls_handshake_rtt";

/// Field key of the validation round trip
pub const VALIDATE_RTT: &str = "validate_rtt";

/// Encode a duration the way every `*_rtt` field is reported
pub fn rtt(d: Duration) -> Value {
    json!({ "us": d.as_micros() as u64 })
}

/// Insert a duration field
pub fn put_rtt(event: &mut Event, key: &str, d: Duration) {
    event.insert(key.to_string(), rtt(d));
}

/// Why a probe invocation failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    /// Resolution, connect, proxy, TLS or transport failure
    IoFailed(String),
    /// The validation step rejected the connection
    ValidateFailed(String),
}

impl Reason {
    /// Short type tag written into the `error` field
    pub fn kind(&self) -> &'static str {
        match self {
            Reason::IoFailed(_) => "io",
            Reason::ValidateFailed(_) => "validate",
        }
    }

    /// Human readable message
    pub fn message(&self) -> &str {
        match self {
            Reason::IoFailed(msg) | Reason::ValidateFailed(msg) => msg,
        }
    }

    /// Nested value stored under `error`
    pub fn to_value(&self) -> Value {
        json!({ "type": self.kind(), "message": self.message() })
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind(), self.message())
    }
}

/// One reported measurement: the record plus the optional failure reason
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// Collected fields
    pub fields: Event,
    /// Set when the invocation failed
    pub reason: Option<Reason>,
}

impl ProbeOutcome {
    /// Successful outcome
    pub fn ok(fields: Event) -> Self {
        Self { fields, reason: None }
    }

    /// Failed outcome; the reason is mirrored into the `error` field
    pub fn failed(mut fields: Event, reason: Reason) -> Self {
        fields.insert("error".to_string(), reason.to_value());
        Self {
            fields,
            reason: Some(reason),
        }
    }

    /// Whether the probe reached its target
    pub fn is_up(&self) -> bool {
        self.reason.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtt_encoding() {
        assert_eq!(rtt(Duration::from_millis(3)), json!({ "us": 3000 }));
    }

    #[test]
    fn test_failed_outcome_carries_error_field() {
        let outcome = ProbeOutcome::failed(Event::new(), Reason::IoFailed("refused".into()));
        assert!(!outcome.is_up());
        assert_eq!(
            outcome.fields["error"],
            json!({ "type": "io", "message": "refused" })
        );
    }
}
