// Post-connect validation: write a payload, compare the reply prefix.

use crate::config::CheckConfig;
use crate::dialchain::BoxedConn;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Outcome of a failed validation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The peer answered, but not with what was expected; reported, not failed
    #[error("received string mismatch")]
    Mismatch,

    /// Transport failure while validating
    #[error("validation failed: {0}")]
    Failed(String),
}

impl From<std::io::Error> for ValidationError {
    fn from(e: std::io::Error) -> Self {
        ValidationError::Failed(e.to_string())
    }
}

/// A check run over an established connection
#[async_trait]
pub trait ConnCheck: Send + Sync {
    async fn validate(&self, conn: &mut BoxedConn) -> Result<(), ValidationError>;
}

/// Send `send`, then expect the reply to start with `receive`
#[derive(Debug, Clone)]
pub struct SendReceiveCheck {
    send: Vec<u8>,
    receive: Vec<u8>,
}

impl SendReceiveCheck {
    pub fn new(send: impl Into<Vec<u8>>, receive: impl Into<Vec<u8>>) -> Self {
        Self {
            send: send.into(),
            receive: receive.into(),
        }
    }

    /// `None` when neither string is configured
    pub fn from_config(check: &CheckConfig) -> Option<Arc<dyn ConnCheck>> {
        if check.send.is_empty() && check.receive.is_empty() {
            return None;
        }
        Some(Arc::new(Self::new(check.send.as_bytes(), check.receive.as_bytes())))
    }
}

#[async_trait]
impl ConnCheck for SendReceiveCheck {
    async fn validate(&self, conn: &mut BoxedConn) -> Result<(), ValidationError> {
        if !self.send.is_empty() {
            conn.write_all(&self.send).await?;
            conn.flush().await?;
        }
        if self.receive.is_empty() {
            return Ok(());
        }

        let mut buf = vec![0u8; self.receive.len()];
        conn.read_exact(&mut buf).await?;
        if buf != self.receive {
            return Err(ValidationError::Mismatch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_check_configured() {
        assert!(SendReceiveCheck::from_config(&CheckConfig::default()).is_none());
    }

    #[tokio::test]
    async fn test_send_receive() {
        let (client, mut server) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let mut buf = [0u8; 4];
            server.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"PING");
            server.write_all(b"PONG extra").await.unwrap();
        });

        let mut conn: BoxedConn = Box::new(client);
        let check = SendReceiveCheck::new("PING", "PONG");
        assert_eq!(check.validate(&mut conn).await, Ok(()));
    }

    #[tokio::test]
    async fn test_mismatch() {
        let (client, mut server) = tokio::io::duplex(64);
        tokio::spawn(async move {
            server.write_all(b"NOPE").await.unwrap();
        });

        let mut conn: BoxedConn = Box::new(client);
        let check = SendReceiveCheck::new("", "PONG");
        assert_eq!(check.validate(&mut conn).await, Err(ValidationError::Mismatch));
    }

    #[tokio::test]
    async fn test_closed_before_reply() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);

        let mut conn: BoxedConn = Box::new(client);
        let check = SendReceiveCheck::new("", "PONG");
        assert!(matches!(
            check.validate(&mut conn).await,
            Err(ValidationError::Failed(_))
        ));
    }
}
