//! Configuration types for the probe core
//!
//! Loading is left to the embedding application; these types only describe
//! and validate a single TCP monitor.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// One TCP monitor: where to bind, what to dial and how
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Monitor type name, first part of every job name
    #[serde(default = "default_name")]
    pub name: String,

    /// Ports probed for targets that carry no explicit port
    #[serde(default)]
    pub ports: Vec<u16>,

    /// Bind spec → target strings
    pub interface: BTreeMap<String, Vec<String>>,

    /// Whether one resolved address suffices or every address is probed
    #[serde(default)]
    pub mode: PingMode,

    /// Optional SOCKS5 proxy
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,

    /// Global TLS settings; when present the default scheme becomes `ssl`
    #[serde(default)]
    pub tls: Option<TlsSettings>,

    /// Budget for each dial stage and for the validation phase (in seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Cadence at which a scheduler should invoke each job (in seconds)
    #[serde(default = "default_schedule_secs")]
    pub schedule_secs: u64,

    /// Custom resolver settings
    #[serde(default)]
    pub dns: DnsSettings,

    /// Send/receive validation
    #[serde(default)]
    pub check: CheckConfig,
}

impl MonitorConfig {
    /// Create a configuration with defaults and the given bind map
    pub fn new(interface: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            name: default_name(),
            ports: Vec::new(),
            interface,
            mode: PingMode::default(),
            proxy: None,
            tls: None,
            timeout_secs: default_timeout_secs(),
            schedule_secs: default_schedule_secs(),
            dns: DnsSettings::default(),
            check: CheckConfig::default(),
        }
    }

    /// Set the fallback port list
    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = ports;
        self
    }

    /// Set the ping mode
    pub fn with_mode(mut self, mode: PingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Route probes through a SOCKS5 proxy
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Enable global TLS settings
    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Set the stage timeout
    ///
    /// The timeout is stored in whole seconds: fractions round up, so a
    /// sub-second timeout becomes one second.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
        self.timeout_secs = secs.max(1);
        self
    }

    /// Set the custom resolver settings
    pub fn with_dns(mut self, dns: DnsSettings) -> Self {
        self.dns = dns;
        self
    }

    /// Set the validation strings
    pub fn with_check(mut self, check: CheckConfig) -> Self {
        self.check = check;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn schedule(&self) -> Duration {
        Duration::from_secs(self.schedule_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.name.is_empty() {
            return Err(crate::Error::config("Monitor name cannot be empty"));
        }
        if self.interface.is_empty() {
            return Err(crate::Error::config("interface map cannot be empty"));
        }
        if self.timeout_secs == 0 {
            return Err(crate::Error::config("timeout must be > 0"));
        }
        if self.schedule_secs == 0 {
            return Err(crate::Error::config("schedule must be > 0"));
        }
        if let Some(proxy) = &self.proxy {
            if proxy.url.is_empty() {
                return Err(crate::Error::config("proxy URL cannot be empty"));
            }
            if self.mode != PingMode::Any && !proxy.local_resolve {
                return Err(crate::Error::config(
                    "ping all ips only supported if proxy local resolver is enabled",
                ));
            }
        }
        self.dns.validate()?;
        Ok(())
    }
}

/// Whether one reachable resolved address suffices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PingMode {
    /// Probe one randomly chosen resolved address
    #[default]
    Any,
    /// Probe every resolved address, each reported independently
    All,
}

/// SOCKS5 proxy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// `socks5://[user:pass@]host[:port]`
    pub url: String,

    /// Resolve targets locally and hand the proxy an IP instead of a name
    #[serde(default)]
    pub local_resolve: bool,
}

impl ProxyConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            local_resolve: false,
        }
    }

    pub fn with_local_resolve(mut self, local_resolve: bool) -> Self {
        self.local_resolve = local_resolve;
        self
    }
}

/// TLS client settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsSettings {
    /// SNI / verification name override; defaults to the target host
    #[serde(default)]
    pub server_name: Option<String>,

    /// Accept any server certificate
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

/// Address family selection for DNS lookups
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DnsMode {
    /// A records only
    #[default]
    Ipv4,
    /// AAAA records only
    Ipv6,
    /// Both, IPv4 results first
    All,
}

impl DnsMode {
    pub fn wants_v4(self) -> bool {
        matches!(self, DnsMode::Ipv4 | DnsMode::All)
    }

    pub fn wants_v6(self) -> bool {
        matches!(self, DnsMode::Ipv6 | DnsMode::All)
    }
}

/// Custom resolver settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsSettings {
    /// Resolver addresses (`ip` or `ip:port`, port defaults to 53), tried in order
    #[serde(default)]
    pub addrs: Vec<String>,

    /// Per-exchange timeout (in seconds)
    #[serde(default = "default_dns_timeout_secs")]
    pub timeout_secs: u64,

    /// Which families to query
    #[serde(default)]
    pub mode: DnsMode,
}

impl DnsSettings {
    pub fn new(addrs: Vec<String>, mode: DnsMode) -> Self {
        Self {
            addrs,
            timeout_secs: default_dns_timeout_secs(),
            mode,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Whether custom resolvers replace the system resolver
    pub fn is_custom(&self) -> bool {
        !self.addrs.is_empty()
    }

    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.is_custom() && self.timeout_secs == 0 {
            return Err(crate::Error::config("dns timeout must be > 0"));
        }
        Ok(())
    }
}

impl Default for DnsSettings {
    fn default() -> Self {
        Self::new(Vec::new(), DnsMode::default())
    }
}

/// Send/receive validation strings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckConfig {
    /// Payload written after connecting
    #[serde(default)]
    pub send: String,

    /// Expected reply prefix
    #[serde(default)]
    pub receive: String,
}

fn default_name() -> String {
    "tcp".to_string()
}

fn default_timeout_secs() -> u64 {
    16
}

fn default_schedule_secs() -> u64 {
    10
}

fn default_dns_timeout_secs() -> u64 {
    3
}
