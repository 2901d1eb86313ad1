//! Hostname resolution
//!
//! [`DnsResolver`] talks to an ordered list of custom resolvers:
//!
//! - a single-family query tries each resolver in order; the first
//!   success-coded, non-empty answer wins, anything else is a soft failure
//!   and the next resolver is tried
//! - in `all` mode the A and AAAA queries run as two spawned tasks that are
//!   both awaited before the results are combined, IPv4 first
//!
//! [`SystemResolver`] is used when no custom resolvers are configured.
//! Both implement [`Resolve`], which is what dialers and jobs depend on.

mod exchange;

pub use exchange::{Exchange, UdpExchange};

use crate::config::{DnsMode, DnsSettings};
use crate::error::{Error, Result};
use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{Name, RData, RecordType};
use rand::Rng;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Port used for resolver addresses given without one
pub const DEFAULT_DNS_PORT: u16 = 53;

/// Anything that can turn a hostname into addresses
#[async_trait]
pub trait Resolve: Send + Sync {
    /// Resolve `host`; an empty answer is an error
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>>;
}

/// Build the resolver the settings call for
pub fn resolver_for(settings: &DnsSettings) -> Arc<dyn Resolve> {
    if settings.is_custom() {
        Arc::new(DnsResolver::new(settings.clone()))
    } else {
        Arc::new(SystemResolver::new(settings.mode))
    }
}

/// Dual-stack resolver over a list of custom name servers
#[derive(Clone)]
pub struct DnsResolver {
    settings: Arc<DnsSettings>,
    exchange: Arc<dyn Exchange>,
}

impl DnsResolver {
    /// Resolver speaking plain UDP
    pub fn new(settings: DnsSettings) -> Self {
        Self::with_exchange(settings, Arc::new(UdpExchange))
    }

    /// Resolver with a custom transport
    pub fn with_exchange(settings: DnsSettings, exchange: Arc<dyn Exchange>) -> Self {
        Self {
            settings: Arc::new(settings),
            exchange,
        }
    }

    pub fn settings(&self) -> &DnsSettings {
        &self.settings
    }

    /// Query a single record type against the resolvers in order
    pub async fn query(&self, domain: &str, record_type: RecordType) -> Result<Vec<IpAddr>> {
        if domain.is_empty() {
            return Err(Error::resolution("empty domain"));
        }
        if self.settings.addrs.is_empty() {
            return Err(Error::resolution("no resolvers configured"));
        }
        if record_type != RecordType::A && record_type != RecordType::AAAA {
            return Err(Error::resolution(format!(
                "unsupported query type {record_type}"
            )));
        }

        let request = build_query(domain, record_type)?;
        let timeout = self.settings.timeout();
        let mut last_error = None;

        for raw in &self.settings.addrs {
            let server = match parse_resolver_addr(raw) {
                Ok(server) => server,
                Err(e) => {
                    warn!(resolver = %raw, error = %e, "skipping invalid resolver address");
                    last_error = Some(e);
                    continue;
                }
            };

            let reply = match self.exchange.exchange(server, &request, timeout).await {
                Ok(reply) => reply,
                Err(e) => {
                    debug!(resolver = %server, %domain, error = %e, "resolver exchange failed");
                    last_error = Some(e);
                    continue;
                }
            };

            if reply.response_code() != ResponseCode::NoError {
                debug!(resolver = %server, %domain, rcode = %reply.response_code(), "resolver returned error code");
                last_error = Some(Error::resolution(format!(
                    "{server} answered {} for {domain} ({record_type})",
                    reply.response_code()
                )));
                continue;
            }

            let ips = extract_addrs(&reply, record_type);
            if ips.is_empty() {
                last_error = Some(Error::resolution(format!(
                    "{server} returned no {record_type} records for {domain}"
                )));
                continue;
            }

            debug!(resolver = %server, %domain, %record_type, count = ips.len(), "resolved");
            return Ok(ips);
        }

        Err(last_error.unwrap_or_else(|| Error::resolution(format!("no answer for {domain}"))))
    }

    /// Resolve according to the configured family mode
    pub async fn lookup(&self, domain: &str) -> Result<Vec<IpAddr>> {
        let mode = self.settings.mode;

        let v4 = mode.wants_v4().then(|| self.spawn_query(domain, RecordType::A));
        let v6 = mode.wants_v6().then(|| self.spawn_query(domain, RecordType::AAAA));

        // both tasks are already running; wait for each to finish
        let v4 = match v4 {
            Some(handle) => Some(join_query(handle).await),
            None => None,
        };
        let v6 = match v6 {
            Some(handle) => Some(join_query(handle).await),
            None => None,
        };

        combine(mode, v4, v6)
    }

    /// Resolve and pick one address uniformly at random
    pub async fn lookup_any<R: Rng + Send + ?Sized>(
        &self,
        domain: &str,
        rng: &mut R,
    ) -> Result<IpAddr> {
        let ips = self.lookup(domain).await?;
        pick_any(&ips, rng)
    }

    fn spawn_query(&self, domain: &str, record_type: RecordType) -> JoinHandle<Result<Vec<IpAddr>>> {
        let this = self.clone();
        let domain = domain.to_string();
        tokio::spawn(async move { this.query(&domain, record_type).await })
    }
}

#[async_trait]
impl Resolve for DnsResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>> {
        self.lookup(host).await
    }
}

/// Operating system resolver, filtered by family
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver {
    mode: DnsMode,
}

impl SystemResolver {
    pub fn new(mode: DnsMode) -> Self {
        Self { mode }
    }
}

#[async_trait]
impl Resolve for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>> {
        if host.is_empty() {
            return Err(Error::resolution("empty domain"));
        }
        let addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| Error::resolution(format!("{host}: {e}")))?;

        let mut v4 = Vec::new();
        let mut v6 = Vec::new();
        for addr in addrs {
            let ip = addr.ip();
            let bucket = if ip.is_ipv4() { &mut v4 } else { &mut v6 };
            if !bucket.contains(&ip) {
                bucket.push(ip);
            }
        }

        let mut ips = Vec::with_capacity(v4.len() + v6.len());
        if self.mode.wants_v4() {
            ips.extend(v4);
        }
        if self.mode.wants_v6() {
            ips.extend(v6);
        }
        if ips.is_empty() {
            return Err(Error::resolution(format!(
                "{host}: no addresses for mode {:?}",
                self.mode
            )));
        }
        Ok(ips)
    }
}

/// Pick one address uniformly at random
pub fn pick_any<R: Rng + ?Sized>(ips: &[IpAddr], rng: &mut R) -> Result<IpAddr> {
    match ips.len() {
        0 => Err(Error::resolution("no addresses to pick from")),
        1 => Ok(ips[0]),
        n => Ok(ips[rng.gen_range(0..n)]),
    }
}

/// Parse `ip`, `ip:port` or `[ipv6]:port`
pub fn parse_resolver_addr(raw: &str) -> Result<SocketAddr> {
    let raw = raw.trim();
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return Ok(addr);
    }
    raw.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DEFAULT_DNS_PORT))
        .map_err(|_| Error::config(format!("invalid resolver address '{raw}'")))
}

fn build_query(domain: &str, record_type: RecordType) -> Result<Message> {
    let fqdn = if domain.ends_with('.') {
        domain.to_string()
    } else {
        format!("{domain}.")
    };
    let name = Name::from_ascii(&fqdn)
        .map_err(|e| Error::resolution(format!("invalid domain '{domain}': {e}")))?;

    let mut message = Message::new();
    message
        .set_id(rand::random())
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(name, record_type));
    Ok(message)
}

fn extract_addrs(reply: &Message, record_type: RecordType) -> Vec<IpAddr> {
    reply
        .answers()
        .iter()
        .filter_map(|record| match (record_type, record.data()) {
            (RecordType::A, Some(RData::A(a))) => Some(IpAddr::V4(a.0)),
            (RecordType::AAAA, Some(RData::AAAA(aaaa))) => Some(IpAddr::V6(aaaa.0)),
            _ => None,
        })
        .collect()
}

async fn join_query(handle: JoinHandle<Result<Vec<IpAddr>>>) -> Result<Vec<IpAddr>> {
    handle
        .await
        .unwrap_or_else(|e| Err(Error::resolution(format!("lookup task failed: {e}"))))
}

/// Merge per-family results: IPv4 before IPv6; when nothing succeeded the
/// IPv4 error wins unless only IPv6 was requested
fn combine(
    mode: DnsMode,
    v4: Option<Result<Vec<IpAddr>>>,
    v6: Option<Result<Vec<IpAddr>>>,
) -> Result<Vec<IpAddr>> {
    let (v4_ok, v4_err) = split(v4);
    let (v6_ok, v6_err) = split(v6);

    if v4_ok.is_none() && v6_ok.is_none() {
        let err = if mode.wants_v4() { v4_err.or(v6_err) } else { v6_err.or(v4_err) };
        return Err(err.unwrap_or_else(|| Error::resolution("no address family requested")));
    }

    let mut ips = v4_ok.unwrap_or_default();
    ips.extend(v6_ok.unwrap_or_default());
    Ok(ips)
}

fn split(result: Option<Result<Vec<IpAddr>>>) -> (Option<Vec<IpAddr>>, Option<Error>) {
    match result {
        Some(Ok(ips)) => (Some(ips), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    }
}
