//! Test doubles and local servers shared by the contract tests
//!
//! Everything here binds to loopback only; no test depends on the host's
//! interfaces, resolvers or outside connectivity.

#![allow(dead_code)]

use async_trait::async_trait;
use netprobe_core::bind::InterfaceTable;
use netprobe_core::dialchain::{BoxedConn, DialTarget, Layer};
use netprobe_core::dns::Resolve;
use netprobe_core::error::{Error, Result};
use netprobe_core::MonitorConfig;
use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpListener, TcpStream};

/// Resolver returning a fixed answer and counting calls
#[derive(Clone)]
pub struct CountingResolver {
    ips: Vec<IpAddr>,
    calls: Arc<AtomicUsize>,
}

impl CountingResolver {
    pub fn new(ips: Vec<IpAddr>) -> Self {
        Self {
            ips,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolve for CountingResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.ips.is_empty() {
            return Err(Error::resolution(format!("{host}: no such host")));
        }
        Ok(self.ips.clone())
    }
}

/// Open/close counters shared between a layer and the connections it wraps
#[derive(Clone, Default)]
pub struct ConnCounters {
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl ConnCounters {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Pass-through layer whose connections count their own drop
pub struct CountingLayer {
    metric: &'static str,
    counters: ConnCounters,
}

impl CountingLayer {
    pub fn new(metric: &'static str) -> (Arc<Self>, ConnCounters) {
        let counters = ConnCounters::default();
        let layer = Arc::new(Self {
            metric,
            counters: counters.clone(),
        });
        (layer, counters)
    }
}

#[async_trait]
impl Layer for CountingLayer {
    fn metric(&self) -> &str {
        self.metric
    }

    fn test_build(&self) -> Result<()> {
        Ok(())
    }

    async fn wrap(&self, conn: BoxedConn, _target: DialTarget<'_>) -> Result<BoxedConn> {
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountedConn {
            inner: conn,
            closed: self.counters.closed.clone(),
        }))
    }
}

struct CountedConn {
    inner: BoxedConn,
    closed: Arc<AtomicUsize>,
}

impl Drop for CountedConn {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

impl AsyncRead for CountedConn {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for CountedConn {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Interface table backed by a fixed map
pub struct StaticInterfaces(pub HashMap<String, Vec<IpAddr>>);

impl StaticInterfaces {
    pub fn with(name: &str, ips: &[&str]) -> Arc<Self> {
        let mut map = HashMap::new();
        map.insert(name.to_string(), ips.iter().map(|ip| ip.parse().unwrap()).collect());
        Arc::new(Self(map))
    }
}

impl InterfaceTable for StaticInterfaces {
    fn addresses(&self, name: &str) -> Result<Vec<IpAddr>> {
        self.0
            .get(name)
            .cloned()
            .ok_or_else(|| Error::interface(name, "no such interface"))
    }

    fn owner_of(&self, ip: &IpAddr) -> Option<String> {
        self.0
            .iter()
            .find(|(_, ips)| ips.contains(ip))
            .map(|(name, _)| name.clone())
    }
}

/// Monitor configuration with a single bind key
pub fn monitor(key: &str, targets: &[&str]) -> MonitorConfig {
    let mut map = BTreeMap::new();
    map.insert(key.to_string(), targets.iter().map(|t| t.to_string()).collect());
    MonitorConfig::new(map)
}

/// TCP server that reads one chunk, answers `reply`, then waits for the peer to close
pub async fn spawn_reply_server(bind: &str, reply: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind(bind).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 64];
                let _ = stream.read(&mut buf).await;
                let _ = stream.write_all(reply).await;
                while matches!(stream.read(&mut buf).await, Ok(n) if n > 0) {}
            });
        }
    });
    addr
}

/// TCP server that closes every connection right after accepting it
pub async fn spawn_closing_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });
    addr
}

/// Address nothing listens on
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Minimal no-auth SOCKS5 server; records every requested `host:port`
pub async fn spawn_socks5_server() -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = requests.clone();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let seen = seen.clone();
            tokio::spawn(async move {
                let _ = serve_socks5(stream, seen).await;
            });
        }
    });
    (addr, requests)
}

async fn serve_socks5(mut client: TcpStream, seen: Arc<Mutex<Vec<String>>>) -> std::io::Result<()> {
    let mut head = [0u8; 2];
    client.read_exact(&mut head).await?;
    let mut methods = vec![0u8; head[1] as usize];
    client.read_exact(&mut methods).await?;
    client.write_all(&[0x05, 0x00]).await?;

    let mut request = [0u8; 4];
    client.read_exact(&mut request).await?;
    let host = match request[3] {
        0x01 => {
            let mut octets = [0u8; 4];
            client.read_exact(&mut octets).await?;
            IpAddr::from(octets).to_string()
        }
        0x04 => {
            let mut octets = [0u8; 16];
            client.read_exact(&mut octets).await?;
            IpAddr::from(octets).to_string()
        }
        _ => {
            let len = client.read_u8().await? as usize;
            let mut name = vec![0u8; len];
            client.read_exact(&mut name).await?;
            String::from_utf8_lossy(&name).into_owned()
        }
    };
    let port = client.read_u16().await?;
    seen.lock().unwrap().push(format!("{host}:{port}"));

    let upstream = match TcpStream::connect((host.as_str(), port)).await {
        Ok(upstream) => upstream,
        Err(_) => {
            client.write_all(&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0]).await?;
            return Ok(());
        }
    };
    client.write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]).await?;

    let mut upstream = upstream;
    let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
    Ok(())
}

/// TLS server with a self-signed certificate; records the SNI of every
/// handshake and greets each client with `PONG`
pub async fn spawn_tls_server() -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let cert = rcgen::generate_simple_self_signed(vec!["probe.test".into()]).unwrap();
    let config = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(
            vec![rustls::Certificate(cert.serialize_der().unwrap())],
            rustls::PrivateKey(cert.serialize_private_key_der()),
        )
        .unwrap();
    let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let names = Arc::new(Mutex::new(Vec::new()));
    let seen = names.clone();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            let seen = seen.clone();
            tokio::spawn(async move {
                let Ok(mut tls) = acceptor.accept(stream).await else {
                    return;
                };
                let sni = tls.get_ref().1.server_name().unwrap_or_default().to_string();
                seen.lock().unwrap().push(sni);
                let _ = tls.write_all(b"PONG").await;
                let _ = tls.flush().await;
                let mut sink = [0u8; 64];
                let _ = tls.read(&mut sink).await;
            });
        }
    });
    (addr, names)
}
