// Job-set construction.
//
// local address group x target x port -> ProbeJob, with one dialer chain
// template per (group, tls) reused by every job of that group.

use super::target::{DEFAULT_SCHEME, TLS_DEFAULT_SCHEME, TargetAddress};
use super::{JobSpec, ProbeJob, SendReceiveCheck, SharedRng};
use crate::bind::{InterfaceTable, LocalBindAddress, SystemInterfaces, parse_bind_specs};
use crate::config::{MonitorConfig, TlsSettings};
use crate::dialchain::{DialerChain, Endpoint, NetDialer, Socks5Layer, TlsLayer};
use crate::dns::{Resolve, resolver_for};
use crate::error::Result;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Collaborators the factory needs from the host system
#[derive(Clone)]
pub struct FactoryDeps {
    pub interfaces: Arc<dyn InterfaceTable>,
    /// Overrides the resolver derived from the DNS settings
    pub resolver: Option<Arc<dyn Resolve>>,
    pub rng: SharedRng,
}

impl FactoryDeps {
    /// OS interfaces and resolvers, random source seeded with `seed`
    pub fn system(seed: u64) -> Self {
        Self {
            interfaces: Arc::new(SystemInterfaces),
            resolver: None,
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    pub fn with_interfaces(mut self, interfaces: Arc<dyn InterfaceTable>) -> Self {
        self.interfaces = interfaces;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn Resolve>) -> Self {
        self.resolver = Some(resolver);
        self
    }
}

impl Default for FactoryDeps {
    fn default() -> Self {
        Self {
            interfaces: Arc::new(SystemInterfaces),
            resolver: None,
            rng: Arc::new(Mutex::new(StdRng::from_entropy())),
        }
    }
}

/// Builds every job of one monitor
pub struct ProbeJobFactory {
    config: MonitorConfig,
    deps: FactoryDeps,
}

impl ProbeJobFactory {
    pub fn new(config: MonitorConfig, deps: FactoryDeps) -> Self {
        Self { config, deps }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Enumerate the job set; any configuration error aborts the whole set
    pub fn build(&self) -> Result<Vec<ProbeJob>> {
        self.config.validate()?;

        let default_scheme = if self.config.tls.is_some() {
            TLS_DEFAULT_SCHEME
        } else {
            DEFAULT_SCHEME
        };
        let parsed = parse_bind_specs(
            &self.config.interface,
            default_scheme,
            self.deps.interfaces.as_ref(),
        )?;

        let resolver = self
            .deps
            .resolver
            .clone()
            .unwrap_or_else(|| resolver_for(&self.config.dns));
        let validator = SendReceiveCheck::from_config(&self.config.check);
        let proxy_resolves = self
            .config
            .proxy
            .as_ref()
            .is_some_and(|p| !p.local_resolve);

        let mut jobs = Vec::with_capacity(parsed.target_count);
        for group in &parsed.addrs {
            let targets = self
                .config
                .interface
                .get(&group.key)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let mut templates: HashMap<bool, DialerChain> = HashMap::new();

            for raw in targets {
                let target = TargetAddress::parse(raw, default_scheme, &self.config.ports)?;
                let tls = target.is_tls();
                let chain = match templates.get(&tls) {
                    Some(chain) => chain.clone(),
                    None => {
                        let chain = self.build_chain(group, tls, &resolver)?;
                        templates.insert(tls, chain.clone());
                        chain
                    }
                };
                let literal = target.host.parse::<IpAddr>().ok();

                for &port in &target.ports {
                    let spec = JobSpec {
                        typ: self.config.name.clone(),
                        scheme: target.scheme.clone(),
                        interface: group.host.clone(),
                        target: Endpoint::new(target.host.clone(), port),
                        chain: chain.clone(),
                        validator: validator.clone(),
                        timeout: self.config.timeout(),
                    };
                    let job = match literal {
                        _ if proxy_resolves => ProbeJob::proxy_host(spec),
                        Some(ip) => ProbeJob::by_ip(spec, ip),
                        None => ProbeJob::by_host(
                            spec,
                            self.config.mode,
                            resolver.clone(),
                            self.deps.rng.clone(),
                        ),
                    };
                    debug!(job = %job.name(), strategy = job.strategy().name(), "created job");
                    jobs.push(job);
                }
            }
        }

        info!(monitor = %self.config.name, jobs = jobs.len(), "job set built");
        Ok(jobs)
    }

    fn build_chain(&self, group: &LocalBindAddress, tls: bool, resolver: &Arc<dyn Resolve>) -> Result<DialerChain> {
        let timeout = self.config.timeout();
        let base = if group.is_default() {
            NetDialer::direct(timeout, resolver.clone())
        } else {
            NetDialer::bound(timeout, group.ips.clone(), resolver.clone())
        };

        let mut chain = base.into_chain();
        if let Some(proxy) = &self.config.proxy {
            chain.add_layer(Arc::new(Socks5Layer::new(&proxy.url, timeout)));
        }
        if tls {
            let defaults = TlsSettings::default();
            let settings = self.config.tls.as_ref().unwrap_or(&defaults);
            chain.add_layer(Arc::new(TlsLayer::new(settings, timeout)));
        }

        chain.test_build()?;
        Ok(chain)
    }
}
