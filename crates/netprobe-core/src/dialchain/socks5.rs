// SOCKS5 CONNECT negotiation (RFC 1928) with optional username/password
// authentication (RFC 1929).

use super::{BoxedConn, DialTarget, Endpoint, Layer};
use crate::error::{Error, Result};
use crate::event::SOCKS5_CONNECT_RTT;
use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;
use url::{Host, Url};

const SOCKS5_VERSION: u8 = 0x05;
const AUTH_NO_AUTH: u8 = 0x00;
const AUTH_USERNAME_PASSWORD: u8 = 0x02;
const AUTH_NO_ACCEPTABLE: u8 = 0xFF;
const AUTH_SUBNEG_VERSION: u8 = 0x01;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;
const REP_SUCCESS: u8 = 0x00;

/// Port assumed when the proxy URL has none
pub const DEFAULT_SOCKS5_PORT: u16 = 1080;

#[derive(Debug, Clone)]
struct ProxyEndpoint {
    endpoint: Endpoint,
    credentials: Option<(String, String)>,
}

/// Layer negotiating a tunnel through a SOCKS5 proxy
///
/// The proxy URL is parsed once; a malformed URL is reported by
/// [`Layer::test_build`] and by every dial attempt.
#[derive(Debug, Clone)]
pub struct Socks5Layer {
    proxy: std::result::Result<ProxyEndpoint, String>,
    timeout: Duration,
}

impl Socks5Layer {
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self {
            proxy: parse_proxy_url(url),
            timeout,
        }
    }

    fn proxy(&self) -> Result<&ProxyEndpoint> {
        self.proxy.as_ref().map_err(|e| Error::config(e.clone()))
    }

    /// Proxy address with credentials masked
    pub fn sanitized_url(&self) -> String {
        match &self.proxy {
            Ok(p) if p.credentials.is_some() => format!("socks5://***:***@{}", p.endpoint),
            Ok(p) => format!("socks5://{}", p.endpoint),
            Err(_) => "socks5://<invalid>".to_string(),
        }
    }
}

#[async_trait]
impl Layer for Socks5Layer {
    fn metric(&self) -> &str {
        SOCKS5_CONNECT_RTT
    }

    fn next_hop(&self) -> Option<Endpoint> {
        self.proxy.as_ref().ok().map(|p| p.endpoint.clone())
    }

    fn test_build(&self) -> Result<()> {
        self.proxy().map(|_| ())
    }

    async fn wrap(&self, mut conn: BoxedConn, target: DialTarget<'_>) -> Result<BoxedConn> {
        let proxy = self.proxy()?;
        let host = target.proxy_host();
        let port = target.endpoint.port;

        tokio::time::timeout(self.timeout, handshake(&mut conn, proxy, &host, port))
            .await
            .map_err(|_| Error::timeout("socks5 handshake", self.timeout))??;

        debug!(proxy = %self.sanitized_url(), %host, port, "SOCKS5 tunnel established");
        Ok(conn)
    }
}

fn parse_proxy_url(raw: &str) -> std::result::Result<ProxyEndpoint, String> {
    let url = Url::parse(raw).map_err(|e| format!("invalid proxy URL '{raw}': {e}"))?;
    match url.scheme() {
        "socks5" | "socks5h" | "socks" => {}
        other => return Err(format!("unsupported proxy scheme '{other}' in '{raw}'")),
    }

    let host = match url.host() {
        Some(Host::Domain(d)) if !d.is_empty() => d.to_string(),
        Some(Host::Ipv4(v4)) => v4.to_string(),
        Some(Host::Ipv6(v6)) => v6.to_string(),
        _ => return Err(format!("proxy URL '{raw}' has no host")),
    };
    let port = url.port().unwrap_or(DEFAULT_SOCKS5_PORT);
    if port == 0 {
        return Err(format!("proxy URL '{raw}' has port 0"));
    }

    let credentials = if url.username().is_empty() {
        None
    } else {
        let username = url.username().to_string();
        let password = url.password().unwrap_or_default().to_string();
        if username.len() > 255 || password.len() > 255 {
            return Err("proxy credentials longer than 255 bytes".to_string());
        }
        Some((username, password))
    };

    Ok(ProxyEndpoint {
        endpoint: Endpoint::new(host, port),
        credentials,
    })
}

async fn handshake(conn: &mut BoxedConn, proxy: &ProxyEndpoint, host: &str, port: u16) -> Result<()> {
    let method = negotiate(conn, proxy.credentials.is_some()).await?;
    match (method, &proxy.credentials) {
        (AUTH_NO_AUTH, _) => {}
        (AUTH_USERNAME_PASSWORD, Some((user, pass))) => authenticate(conn, user, pass).await?,
        (other, _) => {
            return Err(Error::proxy(format!(
                "proxy selected unsupported auth method 0x{other:02x}"
            )));
        }
    }
    connect(conn, host, port).await
}

async fn negotiate(conn: &mut BoxedConn, with_password: bool) -> Result<u8> {
    let mut methods = vec![AUTH_NO_AUTH];
    if with_password {
        methods.push(AUTH_USERNAME_PASSWORD);
    }
    let mut request = vec![SOCKS5_VERSION, methods.len() as u8];
    request.extend_from_slice(&methods);
    conn.write_all(&request).await?;

    let mut response = [0u8; 2];
    conn.read_exact(&mut response).await?;
    if response[0] != SOCKS5_VERSION {
        return Err(Error::proxy(format!(
            "invalid SOCKS version from proxy: 0x{:02x}",
            response[0]
        )));
    }
    if response[1] == AUTH_NO_ACCEPTABLE {
        return Err(Error::proxy("no acceptable authentication methods"));
    }
    Ok(response[1])
}

async fn authenticate(conn: &mut BoxedConn, username: &str, password: &str) -> Result<()> {
    let mut request = vec![AUTH_SUBNEG_VERSION, username.len() as u8];
    request.extend_from_slice(username.as_bytes());
    request.push(password.len() as u8);
    request.extend_from_slice(password.as_bytes());
    conn.write_all(&request).await?;

    let mut response = [0u8; 2];
    conn.read_exact(&mut response).await?;
    if response[0] != AUTH_SUBNEG_VERSION || response[1] != 0x00 {
        return Err(Error::proxy(format!(
            "authentication failed: status 0x{:02x}",
            response[1]
        )));
    }
    Ok(())
}

async fn connect(conn: &mut BoxedConn, host: &str, port: u16) -> Result<()> {
    let mut request = vec![SOCKS5_VERSION, CMD_CONNECT, 0x00];
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            request.push(ATYP_IPV4);
            request.extend_from_slice(&v4.octets());
        }
        Ok(IpAddr::V6(v6)) => {
            request.push(ATYP_IPV6);
            request.extend_from_slice(&v6.octets());
        }
        Err(_) => {
            if host.len() > 255 {
                return Err(Error::proxy(format!("hostname too long: {host}")));
            }
            request.push(ATYP_DOMAIN);
            request.push(host.len() as u8);
            request.extend_from_slice(host.as_bytes());
        }
    }
    request.extend_from_slice(&port.to_be_bytes());
    conn.write_all(&request).await?;

    // VER | REP | RSV | ATYP
    let mut head = [0u8; 4];
    conn.read_exact(&mut head).await?;
    if head[0] != SOCKS5_VERSION {
        return Err(Error::proxy(format!(
            "invalid SOCKS version in reply: 0x{:02x}",
            head[0]
        )));
    }
    if head[1] != REP_SUCCESS {
        return Err(Error::proxy(format!(
            "connect to {host}:{port} rejected: {}",
            reply_message(head[1])
        )));
    }

    // drain BND.ADDR and BND.PORT
    let addr_len = match head[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => conn.read_u8().await? as usize,
        other => {
            return Err(Error::proxy(format!(
                "invalid address type in reply: 0x{other:02x}"
            )));
        }
    };
    let mut bound = vec![0u8; addr_len + 2];
    conn.read_exact(&mut bound).await?;
    Ok(())
}

fn reply_message(code: u8) -> &'static str {
    match code {
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown error",
    }
}
