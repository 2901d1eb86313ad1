// TLS client handshake layer.

use super::{BoxedConn, DialTarget, Layer};
use crate::config::TlsSettings;
use crate::error::{Error, Result};
use crate::event::TLS_HANDSHAKE_RTT;
use async_trait::async_trait;
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, OwnedTrustAnchor, RootCertStore, ServerName};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_rustls::TlsConnector;

/// Accepts every certificate; enabled by `insecure_skip_verify`
struct InsecureCertVerifier;

impl ServerCertVerifier for InsecureCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

fn client_config(settings: &TlsSettings) -> ClientConfig {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(ta.subject, ta.spki, ta.name_constraints)
    }));

    let mut cfg = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();
    if settings.insecure_skip_verify {
        cfg.dangerous()
            .set_certificate_verifier(Arc::new(InsecureCertVerifier));
    }
    cfg
}

/// Layer running a TLS handshake over the previous stage
///
/// The client configuration is built once and shared by every clone of the
/// chain holding this layer.
#[derive(Clone)]
pub struct TlsLayer {
    config: Arc<ClientConfig>,
    server_name: Option<String>,
    timeout: Duration,
}

impl TlsLayer {
    pub fn new(settings: &TlsSettings, timeout: Duration) -> Self {
        Self {
            config: Arc::new(client_config(settings)),
            server_name: settings.server_name.clone().filter(|s| !s.is_empty()),
            timeout,
        }
    }

    fn server_name(&self, target: &DialTarget<'_>) -> Result<ServerName> {
        let name = self.server_name.as_deref().unwrap_or(&target.endpoint.host);
        let name = name.trim_start_matches('[').trim_end_matches(']');
        ServerName::try_from(name).map_err(|e| Error::tls(format!("invalid server name '{name}': {e}")))
    }
}

#[async_trait]
impl Layer for TlsLayer {
    fn metric(&self) -> &str {
        TLS_HANDSHAKE_RTT
    }

    fn test_build(&self) -> Result<()> {
        if let Some(name) = &self.server_name {
            ServerName::try_from(name.as_str())
                .map_err(|e| Error::config(format!("invalid TLS server name '{name}': {e}")))?;
        }
        Ok(())
    }

    async fn wrap(&self, conn: BoxedConn, target: DialTarget<'_>) -> Result<BoxedConn> {
        let server_name = self.server_name(&target)?;
        let connector = TlsConnector::from(self.config.clone());

        let stream = tokio::time::timeout(self.timeout, connector.connect(server_name, conn))
            .await
            .map_err(|_| Error::timeout("tls handshake", self.timeout))?
            .map_err(|e| Error::tls(format!("handshake with {} failed: {e}", target.endpoint)))?;
        Ok(Box::new(stream))
    }
}

impl std::fmt::Debug for TlsLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsLayer")
            .field("server_name", &self.server_name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialchain::Endpoint;

    #[test]
    fn test_invalid_override_fails_test_build() {
        let settings = TlsSettings {
            server_name: Some("not a host name".to_string()),
            insecure_skip_verify: false,
        };
        assert!(TlsLayer::new(&settings, Duration::from_secs(1)).test_build().is_err());
    }

    #[test]
    fn test_empty_override_falls_back_to_target() {
        let settings = TlsSettings {
            server_name: Some(String::new()),
            insecure_skip_verify: true,
        };
        let layer = TlsLayer::new(&settings, Duration::from_secs(1));
        assert!(layer.test_build().is_ok());

        let endpoint = Endpoint::new("example.com", 443);
        let target = DialTarget {
            endpoint: &endpoint,
            addr: None,
        };
        assert!(layer.server_name(&target).is_ok());
    }
}
