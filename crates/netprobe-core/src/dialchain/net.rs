// Base TCP connectors.
//
// A NetDialer either lets the OS pick the source address (direct), binds to
// one of a set of local source addresses (bound), or skips resolution and
// dials a pinned address (constant-address, optionally bound as well).

use super::{BoxedConn, DialerChain, Endpoint};
use crate::bind::{AddrFamily, SourceAddress};
use crate::dns::Resolve;
use crate::error::{Error, Result};
use crate::event::TCP_CONNECT_RTT;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpSocket, TcpStream};
use tracing::debug;

/// Which base connector a [`NetDialer`] acts as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseKind {
    /// OS-chosen source address
    Direct,
    /// Restricted to configured local source addresses
    Bound,
    /// Destination address fixed up front, no resolution
    ConstAddr,
}

/// Base connector of a [`DialerChain`]
#[derive(Clone)]
pub struct NetDialer {
    timeout: Duration,
    locals: Arc<[SourceAddress]>,
    resolver: Arc<dyn Resolve>,
    pinned: Option<IpAddr>,
}

impl NetDialer {
    /// Dial without a source-address restriction
    pub fn direct(timeout: Duration, resolver: Arc<dyn Resolve>) -> Self {
        Self {
            timeout,
            locals: Arc::from(Vec::new()),
            resolver,
            pinned: None,
        }
    }

    /// Dial from one of `locals`; an empty list behaves like [`direct`](Self::direct)
    pub fn bound(timeout: Duration, locals: Vec<SourceAddress>, resolver: Arc<dyn Resolve>) -> Self {
        Self {
            timeout,
            locals: Arc::from(locals),
            resolver,
            pinned: None,
        }
    }

    /// Copy of this dialer that always connects to `ip`
    pub fn pinned_to(&self, ip: IpAddr) -> Self {
        Self {
            pinned: Some(ip),
            ..self.clone()
        }
    }

    /// Chain with this dialer as base and no layers
    pub fn into_chain(self) -> DialerChain {
        DialerChain::new(self)
    }

    pub fn kind(&self) -> BaseKind {
        if self.pinned.is_some() {
            BaseKind::ConstAddr
        } else if self.locals.is_empty() {
            BaseKind::Direct
        } else {
            BaseKind::Bound
        }
    }

    pub fn metric(&self) -> &str {
        TCP_CONNECT_RTT
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn locals(&self) -> &[SourceAddress] {
        &self.locals
    }

    /// Whether `ip` shares a family with at least one source address
    pub fn accepts(&self, ip: &IpAddr) -> bool {
        let family = AddrFamily::from(ip);
        self.locals.is_empty() || self.locals.iter().any(|l| l.family() == family)
    }

    /// Reject source addresses that can never be bound
    pub fn test_build(&self) -> Result<()> {
        match self.locals.iter().find(|l| l.zone() == Some("")) {
            Some(local) => Err(Error::format(format!("{local}: empty zone"))),
            None => Ok(()),
        }
    }

    /// Connect to `hop`, trying candidate addresses in order
    pub async fn dial(&self, hop: &Endpoint) -> Result<BoxedConn> {
        let candidates = match (self.pinned, hop.ip()) {
            (Some(ip), _) | (None, Some(ip)) => vec![ip],
            (None, None) => self.resolver.resolve(&hop.host).await?,
        };

        let stream = if self.locals.is_empty() {
            self.connect_any(hop, &candidates).await?
        } else {
            self.connect_bound(hop, &candidates).await?
        };
        Ok(Box::new(stream))
    }

    async fn connect_any(&self, hop: &Endpoint, candidates: &[IpAddr]) -> Result<TcpStream> {
        let mut last_error = None;
        for ip in candidates {
            match self.connect_one(None, SocketAddr::new(*ip, hop.port)).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(remote = %ip, error = %e, "connect attempt failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::dial(hop, "no addresses to dial")))
    }

    async fn connect_bound(&self, hop: &Endpoint, candidates: &[IpAddr]) -> Result<TcpStream> {
        let mut last_error = None;
        for local in self.locals.iter() {
            let family = local.family();
            for ip in candidates.iter().filter(|ip| AddrFamily::from(*ip) == family) {
                match self.connect_one(Some(local), SocketAddr::new(*ip, hop.port)).await {
                    Ok(stream) => return Ok(stream),
                    Err(e) => {
                        debug!(local = %local, remote = %ip, error = %e, "bound connect attempt failed");
                        last_error = Some(e);
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::BindMismatch(hop.to_string())))
    }

    async fn connect_one(&self, local: Option<&SourceAddress>, remote: SocketAddr) -> Result<TcpStream> {
        let socket = match remote {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };

        let mut remote = remote;
        if let Some(local) = local {
            let local_addr = local.socket_addr()?;
            socket.bind(local_addr).map_err(|e| Error::dial(local, e))?;
            // link-local destinations inherit the source zone
            if let (SocketAddr::V6(r), SocketAddr::V6(l)) = (&mut remote, local_addr)
                && r.scope_id() == 0
                && (r.ip().segments()[0] & 0xffc0) == 0xfe80
            {
                r.set_scope_id(l.scope_id());
            }
        }

        tokio::time::timeout(self.timeout, socket.connect(remote))
            .await
            .map_err(|_| Error::timeout(format!("tcp connect to {remote}"), self.timeout))?
            .map_err(|e| Error::dial(remote, e))
    }
}

impl std::fmt::Debug for NetDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetDialer")
            .field("kind", &self.kind())
            .field("timeout", &self.timeout)
            .field("locals", &self.locals)
            .field("pinned", &self.pinned)
            .finish()
    }
}
