//! Error types for the probe core
//!
//! Construction-time failures (bad bind specs, bad targets, bad proxy URLs)
//! abort job-set construction. Run-time failures (resolution, dial, bind
//! mismatch) are folded into the per-invocation result record instead.

use thiserror::Error;

/// Result type alias for probe operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the probe system
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration (scheme, port, proxy URL, cross-field checks)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A bind spec or IP literal could not be parsed
    #[error("interface: malformed bind address: {0}")]
    Format(String),

    /// Named network interface does not exist or cannot be enumerated
    #[error("interface lookup failed for '{name}': {reason}")]
    InterfaceLookup {
        /// Interface name
        name: String,
        /// Failure description
        reason: String,
    },

    /// A bind spec has an empty target list
    #[error("interface: {0}: hosts missing")]
    HostsMissing(String),

    /// No bind spec produced a local address group
    #[error("interface: no interface configured")]
    NoInterface,

    /// DNS resolution failed
    #[error("DNS resolution failed: {0}")]
    Resolution(String),

    /// Connect failure
    #[error("dial {addr} failed: {reason}")]
    Dial {
        /// Address being dialed
        addr: String,
        /// Failure description
        reason: String,
    },

    /// No resolved address matches the family of any local source address
    #[error("bind address and remote address family do not match for {0}")]
    BindMismatch(String),

    /// SOCKS5 negotiation failure
    #[error("SOCKS5 proxy error: {0}")]
    Proxy(String),

    /// TLS handshake failure
    #[error("TLS error: {0}")]
    Tls(String),

    /// A stage exceeded its time budget
    #[error("{stage} timed out after {millis}ms")]
    Timeout {
        /// Stage that timed out
        stage: String,
        /// Budget in milliseconds
        millis: u128,
    },

    /// Raw I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a format error
    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    /// Create an interface lookup error
    pub fn interface(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InterfaceLookup {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a resolution error
    pub fn resolution(msg: impl Into<String>) -> Self {
        Self::Resolution(msg.into())
    }

    /// Create a dial error
    pub fn dial(addr: impl ToString, reason: impl ToString) -> Self {
        Self::Dial {
            addr: addr.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a SOCKS5 proxy error
    pub fn proxy(msg: impl Into<String>) -> Self {
        Self::Proxy(msg.into())
    }

    /// Create a TLS error
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    /// Create a timeout error for the named stage
    pub fn timeout(stage: impl Into<String>, budget: std::time::Duration) -> Self {
        Self::Timeout {
            stage: stage.into(),
            millis: budget.as_millis(),
        }
    }

    /// Whether this error belongs to job-set construction and must never be retried
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::Format(_)
                | Self::HostsMissing(_)
                | Self::NoInterface
                | Self::InterfaceLookup { .. }
        )
    }
}
