//! Probe jobs
//!
//! A [`ProbeJob`] is built once by the [`ProbeJobFactory`] and invoked
//! repeatedly by a scheduler. Every invocation returns one [`ProbeOutcome`]
//! per probed address. Jobs hold only shared, read-only state; the dialed
//! connection lives for a single run and is released on every path.

mod factory;
mod target;
mod validate;

pub use factory::{FactoryDeps, ProbeJobFactory};
pub use target::{DEFAULT_SCHEME, TLS_DEFAULT_SCHEME, TargetAddress, is_tls_scheme};
pub use validate::{ConnCheck, SendReceiveCheck, ValidationError};

use crate::config::PingMode;
use crate::dialchain::{BoxedConn, DialerChain, Endpoint};
use crate::dns::{Resolve, pick_any};
use crate::error::{Error, Result};
use crate::event::{Event, ProbeOutcome, Reason, VALIDATE_RTT, put_rtt, rtt};
use rand::rngs::StdRng;
use serde_json::{Value, json};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Shared random source used to pick one address in `any` mode
pub type SharedRng = Arc<Mutex<StdRng>>;

/// How a job finds the addresses it probes
#[derive(Clone)]
pub enum Strategy {
    /// Literal address known at construction
    ByIp(IpAddr),
    /// Resolved on every run
    ByHost {
        mode: PingMode,
        resolver: Arc<dyn Resolve>,
        rng: SharedRng,
    },
    /// The proxy resolves the host name
    ProxyHost,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::ByIp(_) => "by-ip",
            Strategy::ByHost { .. } => "by-host",
            Strategy::ProxyHost => "proxy-host",
        }
    }
}

impl std::fmt::Debug for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::ByIp(ip) => f.debug_tuple("ByIp").field(ip).finish(),
            Strategy::ByHost { mode, .. } => f.debug_struct("ByHost").field("mode", mode).finish(),
            Strategy::ProxyHost => f.write_str("ProxyHost"),
        }
    }
}

/// Everything a job needs regardless of strategy
#[derive(Clone)]
pub struct JobSpec {
    /// Monitor type name
    pub typ: String,
    pub scheme: String,
    /// `interface` field value
    pub interface: String,
    pub target: Endpoint,
    /// Template chain for this (local address, scheme)
    pub chain: DialerChain,
    pub validator: Option<Arc<dyn ConnCheck>>,
    /// Budget of the validation phase
    pub timeout: Duration,
}

/// A runnable probe
#[derive(Clone)]
pub struct ProbeJob {
    name: String,
    spec: JobSpec,
    strategy: Strategy,
}

impl ProbeJob {
    /// Probe a literal address; the chain is pinned to it once
    pub fn by_ip(mut spec: JobSpec, ip: IpAddr) -> Self {
        spec.chain = spec.chain.for_address(ip);
        Self::with_strategy(spec, Strategy::ByIp(ip))
    }

    /// Resolve the host on every run
    pub fn by_host(spec: JobSpec, mode: PingMode, resolver: Arc<dyn Resolve>, rng: SharedRng) -> Self {
        Self::with_strategy(spec, Strategy::ByHost { mode, resolver, rng })
    }

    /// Hand the host name to the proxy unresolved
    pub fn proxy_host(spec: JobSpec) -> Self {
        Self::with_strategy(spec, Strategy::ProxyHost)
    }

    fn with_strategy(spec: JobSpec, strategy: Strategy) -> Self {
        let kind = if target::is_tls_scheme(&spec.scheme) {
            spec.scheme.as_str()
        } else {
            "plain"
        };
        let name = format!("{}-{}-{}", spec.typ, kind, spec.target);
        Self { name, spec, strategy }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn typ(&self) -> &str {
        &self.spec.typ
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    pub fn target(&self) -> &Endpoint {
        &self.spec.target
    }

    pub fn scheme(&self) -> &str {
        &self.spec.scheme
    }

    pub fn interface(&self) -> &str {
        &self.spec.interface
    }

    /// The chain this job dials with (pinned for by-IP jobs)
    pub fn chain(&self) -> &DialerChain {
        &self.spec.chain
    }

    /// Run the probe once
    pub async fn run(&self) -> Vec<ProbeOutcome> {
        match &self.strategy {
            Strategy::ByIp(ip) => vec![self.ping(&self.spec.chain, Some(*ip)).await],
            Strategy::ProxyHost => vec![self.ping(&self.spec.chain, None).await],
            Strategy::ByHost { mode, resolver, rng } => {
                self.run_by_host(*mode, resolver.as_ref(), rng).await
            }
        }
    }

    async fn run_by_host(&self, mode: PingMode, resolver: &dyn Resolve, rng: &SharedRng) -> Vec<ProbeOutcome> {
        let started = Instant::now();
        let resolved = resolver
            .resolve(&self.spec.target.host)
            .await
            .and_then(|ips| self.bindable(ips))
            .and_then(|ips| match mode {
                PingMode::All => Ok(ips),
                PingMode::Any => {
                    let mut rng = rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    pick_any(&ips, &mut *rng).map(|ip| vec![ip])
                }
            });

        let ips = match resolved {
            Ok(ips) => ips,
            Err(e) => {
                debug!(job = %self.name, error = %e, "no address to probe");
                let mut event = self.base_fields(None);
                event.insert("duration".to_string(), rtt(started.elapsed()));
                return vec![ProbeOutcome::failed(event, Reason::IoFailed(e.to_string()))];
            }
        };

        let mut outcomes = Vec::with_capacity(ips.len());
        for ip in ips {
            let chain = self.spec.chain.for_address(ip);
            outcomes.push(self.ping(&chain, Some(ip)).await);
        }
        outcomes
    }

    /// Drop resolved addresses no source address of the chain can reach
    ///
    /// A proxied chain binds only the hop to the proxy, so every address is kept.
    fn bindable(&self, ips: Vec<IpAddr>) -> Result<Vec<IpAddr>> {
        let chain = &self.spec.chain;
        if chain.has_proxy() {
            return Ok(ips);
        }
        let ips: Vec<IpAddr> = ips.into_iter().filter(|ip| chain.base().accepts(ip)).collect();
        if ips.is_empty() {
            return Err(Error::BindMismatch(self.spec.target.to_string()));
        }
        Ok(ips)
    }

    async fn ping(&self, chain: &DialerChain, ip: Option<IpAddr>) -> ProbeOutcome {
        let started = Instant::now();
        let mut event = self.base_fields(ip);

        let reason = match chain.build_with_measures(&self.spec.target, &mut event).await {
            Err(e) => {
                debug!(job = %self.name, error = %e, "dial failed");
                Some(Reason::IoFailed(e.to_string()))
            }
            Ok(mut conn) => {
                let reason = match &self.spec.validator {
                    Some(check) => self.validate(check.as_ref(), &mut conn, &mut event).await,
                    None => None,
                };
                drop(conn);
                reason
            }
        };

        event.insert("duration".to_string(), rtt(started.elapsed()));
        match reason {
            Some(reason) => ProbeOutcome::failed(event, reason),
            None => ProbeOutcome::ok(event),
        }
    }

    async fn validate(&self, check: &dyn ConnCheck, conn: &mut BoxedConn, event: &mut Event) -> Option<Reason> {
        // fresh deadline, independent of the time spent connecting
        let deadline = Instant::now() + self.spec.timeout;
        let start = Instant::now();
        let result = tokio::time::timeout_at(deadline, check.validate(conn)).await;

        match result {
            Err(_) => Some(Reason::IoFailed(format!(
                "validation timed out after {}ms",
                self.spec.timeout.as_millis()
            ))),
            Ok(Err(ValidationError::Failed(msg))) => {
                debug!(job = %self.name, error = %msg, "check failed");
                Some(Reason::IoFailed(msg))
            }
            Ok(Err(mismatch @ ValidationError::Mismatch)) => {
                put_rtt(event, VALIDATE_RTT, start.elapsed());
                let info = Reason::ValidateFailed(mismatch.to_string());
                event.insert("error".to_string(), info.to_value());
                None
            }
            Ok(Ok(())) => {
                put_rtt(event, VALIDATE_RTT, start.elapsed());
                None
            }
        }
    }

    fn base_fields(&self, ip: Option<IpAddr>) -> Event {
        let mut event = Event::new();
        event.insert("@timestamp".to_string(), json!(chrono::Utc::now().to_rfc3339()));
        event.insert("scheme".to_string(), json!(self.spec.scheme));
        event.insert("host".to_string(), json!(self.spec.target.host));
        event.insert("port".to_string(), json!(self.spec.target.port));
        event.insert("interface".to_string(), json!(self.spec.interface));
        if let Some(ip) = ip {
            event.insert("ip".to_string(), Value::String(ip.to_string()));
        }
        event.insert("monitor.name".to_string(), json!(self.name));
        event.insert("monitor.type".to_string(), json!(self.spec.typ));
        event
    }
}

impl std::fmt::Debug for ProbeJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeJob")
            .field("name", &self.name)
            .field("strategy", &self.strategy)
            .field("chain", &self.spec.chain)
            .finish()
    }
}
