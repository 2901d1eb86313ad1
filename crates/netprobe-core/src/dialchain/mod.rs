//! Layered, measured connection building
//!
//! A [`DialerChain`] is a base connector ([`NetDialer`]) followed by an
//! ordered list of [`Layer`]s. Each stage records its elapsed time under its
//! own metric key:
//!
//! ```text
//! NetDialer (tcp_connect_rtt) -> Socks5Layer (socks5_connect_rtt) -> TlsLayer (tls_handshake_rtt)
//! ```
//!
//! Chains are built once per (local address, scheme) as templates and cloned
//! per destination with [`DialerChain::for_address`]; layers are shared
//! through `Arc`, so cloning never rebuilds TLS configuration.

mod net;
mod socks5;
mod tls;

pub use net::{BaseKind, NetDialer};
pub use socks5::Socks5Layer;
pub use tls::TlsLayer;

use crate::error::{Error, Result};
use crate::event::{Event, put_rtt};
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional byte stream produced by a chain stage
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

/// Type-erased connection handed from stage to stage
pub type BoxedConn = Box<dyn Connection>;

/// Logical `host:port` a chain connects to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host parsed as an IP literal, if it is one
    pub fn ip(&self) -> Option<IpAddr> {
        self.host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse()
            .ok()
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.ip() {
            Some(IpAddr::V6(v6)) => write!(f, "[{}]:{}", v6, self.port),
            _ => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

/// What a layer sees of the destination
#[derive(Debug, Clone, Copy)]
pub struct DialTarget<'a> {
    /// Logical destination; names the TLS server
    pub endpoint: &'a Endpoint,
    /// Address pinned by [`DialerChain::for_address`], handed to a proxy instead of the name
    pub addr: Option<IpAddr>,
}

impl DialTarget<'_> {
    /// Host the proxy is asked to connect to
    pub fn proxy_host(&self) -> String {
        match self.addr {
            Some(ip) => ip.to_string(),
            None => self.endpoint.host.clone(),
        }
    }
}

/// One protocol stage stacked on top of the previous stage's connection
#[async_trait]
pub trait Layer: Send + Sync {
    /// Result field the stage duration is written to
    fn metric(&self) -> &str;

    /// Where the base connector must dial instead of the destination (proxies)
    fn next_hop(&self) -> Option<Endpoint> {
        None
    }

    /// I/O-free validity check
    fn test_build(&self) -> Result<()>;

    /// Run the stage over `conn`
    async fn wrap(&self, conn: BoxedConn, target: DialTarget<'_>) -> Result<BoxedConn>;
}

/// Base connector plus ordered layers
#[derive(Clone)]
pub struct DialerChain {
    base: NetDialer,
    layers: Vec<Arc<dyn Layer>>,
    pinned: Option<IpAddr>,
}

impl DialerChain {
    pub fn new(base: NetDialer) -> Self {
        Self {
            base,
            layers: Vec::new(),
            pinned: None,
        }
    }

    /// Append a layer; proxy layers must be added before TLS
    pub fn add_layer(&mut self, layer: Arc<dyn Layer>) {
        self.layers.push(layer);
    }

    /// Builder form of [`add_layer`](Self::add_layer)
    pub fn with_layer(mut self, layer: Arc<dyn Layer>) -> Self {
        self.add_layer(layer);
        self
    }

    pub fn base(&self) -> &NetDialer {
        &self.base
    }

    /// Metric keys of every stage, in execution order
    pub fn stages(&self) -> Vec<&str> {
        std::iter::once(self.base.metric())
            .chain(self.layers.iter().map(|l| l.metric()))
            .collect()
    }

    /// Whether the first layer redirects the base connector to a proxy
    pub fn has_proxy(&self) -> bool {
        self.proxy_hop().is_some()
    }

    fn proxy_hop(&self) -> Option<Endpoint> {
        self.layers.first().and_then(|l| l.next_hop())
    }

    /// Validate every stage without touching the network
    ///
    /// A proxy stage redirects the base connector, so it must be the first layer.
    pub fn test_build(&self) -> Result<()> {
        self.base.test_build()?;
        if let Some(misplaced) = self.layers.iter().skip(1).find(|l| l.next_hop().is_some()) {
            return Err(Error::config(format!(
                "{} must run before every other layer",
                misplaced.metric()
            )));
        }
        for layer in &self.layers {
            layer.test_build()?;
        }
        Ok(())
    }

    /// Clone this template for one concrete destination address
    ///
    /// Without a proxy the base connector is replaced by a constant-address
    /// dialer; with a proxy the address is handed to the proxy layer instead.
    pub fn for_address(&self, ip: IpAddr) -> DialerChain {
        let mut chain = self.clone();
        if chain.has_proxy() {
            chain.pinned = Some(ip);
        } else {
            chain.base = chain.base.pinned_to(ip);
        }
        chain
    }

    /// Run every stage, recording each attempted stage's duration into `event`
    ///
    /// Stops at the first failing stage; later stages are not attempted.
    pub async fn build_with_measures(&self, target: &Endpoint, event: &mut Event) -> Result<BoxedConn> {
        let hop = self.proxy_hop().unwrap_or_else(|| target.clone());

        let start = Instant::now();
        let dialed = self.base.dial(&hop).await;
        put_rtt(event, self.base.metric(), start.elapsed());
        let mut conn = dialed?;

        let dial_target = DialTarget {
            endpoint: target,
            addr: self.pinned,
        };
        for layer in &self.layers {
            let start = Instant::now();
            let wrapped = layer.wrap(conn, dial_target).await;
            put_rtt(event, layer.metric(), start.elapsed());
            conn = wrapped?;
        }
        Ok(conn)
    }
}

impl std::fmt::Debug for DialerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialerChain")
            .field("base", &self.base)
            .field("stages", &self.stages())
            .field("pinned", &self.pinned)
            .finish()
    }
}
