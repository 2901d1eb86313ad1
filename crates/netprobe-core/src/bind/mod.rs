//! Bind specification parsing
//!
//! Turns the keys of the `interface` configuration map into concrete local
//! source addresses. Supported key forms:
//!
//! - `default`: no explicit binding, the OS picks the source address
//! - `*eth0`: every unicast address bound to interface `eth0`
//! - `10-0-0-1` / `10-0-0-1:8000`: dashed IPv4 (dashes stand in for dots so
//!   the spec can double as a map key)
//! - `10.0.0.1`, `10.0.0.1:8000`, `fe80::1`, `[fe80::1]:8000`,
//!   `[fe80::1%eth0]:8000`: IP literals with optional port
//!
//! ```rust,ignore
//! let parsed = parse_bind_specs(&config.interface, "tcp", &SystemInterfaces)?;
//! for group in &parsed.addrs {
//!     println!("{} -> {:?}", group.key, group.ips);
//! }
//! ```

mod interfaces;

pub use interfaces::{InterfaceTable, SystemInterfaces, scope_id};

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv6Addr, SocketAddr, SocketAddrV6};
use tracing::{debug, warn};

/// Key meaning "no explicit binding"
pub const DEFAULT_INTERFACE: &str = "default";

/// Scheme hint under which port suffixes are rejected
pub const ICMP_SCHEME: &str = "icmp";

/// Address family of a source address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddrFamily {
    /// IPv4
    V4,
    /// IPv6
    V6,
}

impl From<&IpAddr> for AddrFamily {
    fn from(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => AddrFamily::V4,
            IpAddr::V6(_) => AddrFamily::V6,
        }
    }
}

/// A concrete local address a probe may originate from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAddress {
    ip: IpAddr,
    port: u16,
    zone: Option<String>,
}

impl SourceAddress {
    /// Create a source address; port 0 lets the OS assign one
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port, zone: None }
    }

    /// Attach an IPv6 zone (interface name); ignored for IPv4
    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        if self.ip.is_ipv6() {
            self.zone = Some(zone.into());
        }
        self
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn zone(&self) -> Option<&str> {
        self.zone.as_deref()
    }

    /// Always derived from the IP literal
    pub fn family(&self) -> AddrFamily {
        AddrFamily::from(&self.ip)
    }

    /// Socket address suitable for `bind(2)`, with the zone mapped to a scope id
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        match (self.ip, self.zone.as_deref()) {
            (IpAddr::V6(v6), Some(zone)) => {
                let scope = scope_id(zone)?;
                Ok(SocketAddr::V6(SocketAddrV6::new(v6, self.port, 0, scope)))
            }
            (ip, _) => Ok(SocketAddr::new(ip, self.port)),
        }
    }
}

impl std::fmt::Display for SourceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.ip, &self.zone) {
            (IpAddr::V6(v6), Some(zone)) => write!(f, "[{}%{}]:{}", v6, zone, self.port),
            (IpAddr::V6(v6), None) => write!(f, "[{}]:{}", v6, self.port),
            (IpAddr::V4(v4), _) => write!(f, "{}:{}", v4, self.port),
        }
    }
}

/// All source addresses implied by one configuration key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalBindAddress {
    /// Raw configuration key
    pub key: String,
    /// Label reported in the `interface` result field
    pub host: String,
    /// Ordered source addresses; empty for `default`
    pub ips: Vec<SourceAddress>,
}

impl LocalBindAddress {
    /// Whether this group lets the OS choose the source address
    pub fn is_default(&self) -> bool {
        self.ips.is_empty()
    }
}

/// Output of [`parse_bind_specs`]
#[derive(Debug, Clone)]
pub struct ParsedBindSpecs {
    /// One group per accepted key
    pub addrs: Vec<LocalBindAddress>,
    /// Total number of target strings across the accepted keys
    pub target_count: usize,
}

/// Parse every key of the interface map into local address groups
///
/// A `default` key is the sole result when present; any other keys are
/// ignored (with a warning). Under the `icmp` scheme hint, keys carrying a
/// port suffix are rejected.
pub fn parse_bind_specs(
    specs: &BTreeMap<String, Vec<String>>,
    scheme_hint: &str,
    interfaces: &dyn InterfaceTable,
) -> Result<ParsedBindSpecs> {
    if let Some(targets) = specs.get(DEFAULT_INTERFACE) {
        if targets.is_empty() {
            return Err(Error::HostsMissing(DEFAULT_INTERFACE.to_string()));
        }
        if specs.len() > 1 {
            warn!(
                ignored = specs.len() - 1,
                "'default' interface configured together with explicit bindings; explicit bindings ignored"
            );
        }
        return Ok(ParsedBindSpecs {
            addrs: vec![LocalBindAddress {
                key: DEFAULT_INTERFACE.to_string(),
                host: DEFAULT_INTERFACE.to_string(),
                ips: Vec::new(),
            }],
            target_count: targets.len(),
        });
    }

    let mut addrs = Vec::with_capacity(specs.len());
    let mut target_count = 0;

    for (key, targets) in specs {
        if targets.is_empty() {
            return Err(Error::HostsMissing(key.clone()));
        }
        let group = parse_bind_spec(key, scheme_hint, interfaces)?;
        debug!(
            key = %group.key,
            addrs = ?group.ips.iter().map(ToString::to_string).collect::<Vec<_>>(),
            targets = targets.len(),
            "parsed bind spec"
        );
        target_count += targets.len();
        addrs.push(group);
    }

    if addrs.is_empty() {
        return Err(Error::NoInterface);
    }

    Ok(ParsedBindSpecs { addrs, target_count })
}

/// Parse a single non-default bind spec
pub fn parse_bind_spec(
    key: &str,
    scheme_hint: &str,
    interfaces: &dyn InterfaceTable,
) -> Result<LocalBindAddress> {
    let key_trimmed = key.trim();

    if let Some(name) = key_trimmed.strip_prefix('*') {
        let ips = interfaces
            .addresses(name)?
            .into_iter()
            .map(|ip| SourceAddress::new(ip, 0).with_zone(name))
            .collect();
        return Ok(LocalBindAddress {
            key: key.to_string(),
            host: name.to_string(),
            ips,
        });
    }

    let host = if is_dashed_ipv4(key_trimmed) {
        key_trimmed.replace('-', ".")
    } else {
        key_trimmed.to_string()
    };

    let (ip, port, zone) = split_ip_port(&host)?;
    if scheme_hint == ICMP_SCHEME && port.is_some() {
        return Err(Error::format(format!(
            "icmp.interface: {}: port suffix not allowed",
            key
        )));
    }

    let mut source = SourceAddress::new(ip, port.unwrap_or(0));
    if let IpAddr::V6(v6) = ip {
        match zone {
            Some(zone) => source = source.with_zone(zone),
            None if is_link_local_v6(&v6) => {
                let owner = interfaces.owner_of(&ip).ok_or_else(|| {
                    Error::interface(host.clone(), "no interface owns this link-local address")
                })?;
                source = source.with_zone(owner);
            }
            None => {}
        }
    }

    Ok(LocalBindAddress {
        key: key.to_string(),
        host,
        ips: vec![source],
    })
}

/// `a-b-c-d` or `a-b-c-d:port`
fn is_dashed_ipv4(spec: &str) -> bool {
    let host = spec.split(':').next().unwrap_or_default();
    host.contains('-') && host.chars().all(|c| c.is_ascii_digit() || c == '-')
}

fn is_link_local_v6(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

/// Split an IP literal with optional port and optional `%zone`
fn split_ip_port(spec: &str) -> Result<(IpAddr, Option<u16>, Option<String>)> {
    let (host, port) = if let Some(rest) = spec.strip_prefix('[') {
        let (inner, after) = rest
            .split_once(']')
            .ok_or_else(|| Error::format(spec.to_string()))?;
        let port = match after {
            "" => None,
            p => Some(parse_port(spec, p.strip_prefix(':').ok_or_else(|| Error::format(spec.to_string()))?)?),
        };
        (inner, port)
    } else if spec.matches(':').count() == 1 {
        let (host, port) = spec
            .split_once(':')
            .ok_or_else(|| Error::format(spec.to_string()))?;
        (host, Some(parse_port(spec, port)?))
    } else {
        // bare IPv4, or bare IPv6 which cannot carry a port without brackets
        (spec, None)
    };

    let (addr, zone) = match host.split_once('%') {
        Some((addr, zone)) if !zone.is_empty() => (addr, Some(zone.to_string())),
        Some(_) => return Err(Error::format(spec.to_string())),
        None => (host, None),
    };

    let ip: IpAddr = addr
        .parse()
        .map_err(|_| Error::format(spec.to_string()))?;
    if zone.is_some() && ip.is_ipv4() {
        return Err(Error::format(format!("{}: zone on IPv4 address", spec)));
    }
    Ok((ip, port, zone))
}

fn parse_port(spec: &str, port: &str) -> Result<u16> {
    port.parse::<u16>()
        .map_err(|_| Error::format(format!("{}: invalid port '{}'", spec, port)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Interface table backed by a fixed map
    struct StaticInterfaces(HashMap<&'static str, Vec<IpAddr>>);

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
                .map(|(name, _)| name.to_string())
        }
    }

    fn table() -> StaticInterfaces {
        let mut map = HashMap::new();
        map.insert(
            "eth0",
            vec!["10.0.0.5".parse().unwrap(), "fe80::5".parse().unwrap()],
        );
        StaticInterfaces(map)
    }

    fn specs(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_dashed_matches_dotted() {
        let dashed = parse_bind_spec("172-16-0-9", "tcp", &table()).unwrap();
        let dotted = parse_bind_spec("172.16.0.9", "tcp", &table()).unwrap();
        assert_eq!(dashed.ips, dotted.ips);
        assert_eq!(dashed.host, "172.16.0.9");
        assert_eq!(dashed.key, "172-16-0-9");
    }

    #[test]
    fn test_dashed_with_port() {
        let parsed = parse_bind_spec("172-16-0-9:8000", "tcp", &table()).unwrap();
        assert_eq!(parsed.ips[0].port(), 8000);
        assert_eq!(parsed.ips[0].family(), AddrFamily::V4);
    }

    #[test]
    fn test_port_defaults_to_zero() {
        let parsed = parse_bind_spec("192.168.1.10", "tcp", &table()).unwrap();
        assert_eq!(parsed.ips[0].port(), 0);

        let parsed = parse_bind_spec("192.168.1.10:4242", "tcp", &table()).unwrap();
        assert_eq!(parsed.ips[0].port(), 4242);
    }

    #[test]
    fn test_ipv6_literals() {
        let parsed = parse_bind_spec("[2001:db8::1]:844", "tcp", &table()).unwrap();
        assert_eq!(parsed.ips[0].port(), 844);
        assert_eq!(parsed.ips[0].family(), AddrFamily::V6);
        assert_eq!(parsed.ips[0].zone(), None);

        let parsed = parse_bind_spec("2001:db8::1", "tcp", &table()).unwrap();
        assert_eq!(parsed.ips[0].port(), 0);

        let parsed = parse_bind_spec("[2001:db8::1]", "tcp", &table()).unwrap();
        assert_eq!(parsed.ips[0].port(), 0);
    }

    #[test]
    fn test_link_local_zone() {
        let parsed = parse_bind_spec("[fe80::5]:80", "tcp", &table()).unwrap();
        assert_eq!(parsed.ips[0].zone(), Some("eth0"));

        let parsed = parse_bind_spec("[fe80::5%wlan0]:80", "tcp", &table()).unwrap();
        assert_eq!(parsed.ips[0].zone(), Some("wlan0"));

        let err = parse_bind_spec("fe80::99", "tcp", &table()).unwrap_err();
        assert!(matches!(err, Error::InterfaceLookup { .. }));
    }

    #[test]
    fn test_interface_enumeration() {
        let parsed = parse_bind_spec("*eth0", "tcp", &table()).unwrap();
        assert_eq!(parsed.host, "eth0");
        assert_eq!(parsed.ips.len(), 2);
        assert_eq!(parsed.ips[0].zone(), None);
        assert_eq!(parsed.ips[1].zone(), Some("eth0"));

        let err = parse_bind_spec("*eth9", "tcp", &table()).unwrap_err();
        assert!(matches!(err, Error::InterfaceLookup { .. }));
    }

    #[test]
    fn test_icmp_rejects_port() {
        assert!(matches!(
            parse_bind_spec("10-0-0-1:80", ICMP_SCHEME, &table()),
            Err(Error::Format(_))
        ));
        assert!(matches!(
            parse_bind_spec("[2001:db8::1]:80", ICMP_SCHEME, &table()),
            Err(Error::Format(_))
        ));
        assert!(parse_bind_spec("10-0-0-1", ICMP_SCHEME, &table()).is_ok());
        assert!(parse_bind_spec("2001:db8::1", ICMP_SCHEME, &table()).is_ok());
    }

    #[test]
    fn test_malformed_specs() {
        for bad in ["10.0.0", "not-an-ip", "[2001:db8::1", "10.0.0.1:http", "10.0.0.1%eth0"] {
            assert!(
                matches!(parse_bind_spec(bad, "tcp", &table()), Err(Error::Format(_))),
                "expected format error for {bad}"
            );
        }
    }

    #[test]
    fn test_default_only() {
        let parsed = parse_bind_specs(
            &specs(&[("default", &["example.com:80", "example.com:443"])]),
            "tcp",
            &table(),
        )
        .unwrap();
        assert_eq!(parsed.addrs.len(), 1);
        assert!(parsed.addrs[0].is_default());
        assert_eq!(parsed.target_count, 2);
    }

    #[test]
    fn test_target_count_and_order() {
        let parsed = parse_bind_specs(
            &specs(&[
                ("10-0-0-1", &["a.example:80"]),
                ("*eth0", &["b.example:80", "c.example:80"]),
            ]),
            "tcp",
            &table(),
        )
        .unwrap();
        assert_eq!(parsed.addrs.len(), 2);
        assert_eq!(parsed.target_count, 3);
        assert_eq!(parsed.addrs[0].key, "*eth0");
    }

    #[test]
    fn test_hosts_missing() {
        let err = parse_bind_specs(&specs(&[("10.0.0.1", &[])]), "tcp", &table()).unwrap_err();
        assert!(matches!(err, Error::HostsMissing(key) if key == "10.0.0.1"));
    }

    #[test]
    fn test_no_interface() {
        let err = parse_bind_specs(&BTreeMap::new(), "tcp", &table()).unwrap_err();
        assert!(matches!(err, Error::NoInterface));
    }

    #[test]
    fn test_zone_maps_to_socket_addr() {
        let plain = SourceAddress::new("10.0.0.1".parse().unwrap(), 9000);
        assert_eq!(plain.socket_addr().unwrap(), "10.0.0.1:9000".parse().unwrap());
        assert_eq!(plain.to_string(), "10.0.0.1:9000");
    }
}
