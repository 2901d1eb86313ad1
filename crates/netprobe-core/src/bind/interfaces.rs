// Network interface lookups used by bind spec parsing.
//
// On unix the table is read with getifaddrs(3); other platforms report every
// lookup as failed, which turns `*iface` specs into configuration errors.

use crate::error::{Error, Result};
use std::net::IpAddr;

/// Read-only view of the host's interfaces
pub trait InterfaceTable: Send + Sync {
    /// Unicast addresses bound to the named interface, in enumeration order
    ///
    /// Fails when no interface carries that name.
    fn addresses(&self, name: &str) -> Result<Vec<IpAddr>>;

    /// Name of the interface that owns `ip`, if any
    fn owner_of(&self, ip: &IpAddr) -> Option<String>;
}

/// Interface table backed by the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemInterfaces;

fn is_unicast(ip: &IpAddr) -> bool {
    !ip.is_multicast() && !ip.is_unspecified()
}

#[cfg(unix)]
impl SystemInterfaces {
    fn entries() -> Result<Vec<(String, Option<IpAddr>)>> {
        use nix::ifaddrs::getifaddrs;

        let addrs = getifaddrs().map_err(|e| Error::interface("*", e.to_string()))?;
        Ok(addrs
            .map(|iface| {
                let ip = iface.address.and_then(|address| {
                    if let Some(v4) = address.as_sockaddr_in() {
                        Some(IpAddr::V4(v4.ip()))
                    } else {
                        address.as_sockaddr_in6().map(|v6| IpAddr::V6(v6.ip()))
                    }
                });
                (iface.interface_name, ip)
            })
            .collect())
    }
}

#[cfg(unix)]
impl InterfaceTable for SystemInterfaces {
    fn addresses(&self, name: &str) -> Result<Vec<IpAddr>> {
        let mut found = false;
        let mut out = Vec::new();
        for (iface, ip) in Self::entries()? {
            if iface != name {
                continue;
            }
            found = true;
            if let Some(ip) = ip.filter(is_unicast)
                && !out.contains(&ip)
            {
                out.push(ip);
            }
        }
        if !found {
            return Err(Error::interface(name, "no such network interface"));
        }
        Ok(out)
    }

    fn owner_of(&self, ip: &IpAddr) -> Option<String> {
        Self::entries()
            .ok()?
            .into_iter()
            .find(|(_, addr)| addr.as_ref() == Some(ip))
            .map(|(iface, _)| iface)
    }
}

#[cfg(not(unix))]
impl InterfaceTable for SystemInterfaces {
    fn addresses(&self, name: &str) -> Result<Vec<IpAddr>> {
        Err(Error::interface(
            name,
            "interface enumeration is only supported on unix",
        ))
    }

    fn owner_of(&self, _ip: &IpAddr) -> Option<String> {
        None
    }
}

/// Map an IPv6 zone (interface name or numeric index) to a scope id
pub fn scope_id(zone: &str) -> Result<u32> {
    if let Ok(index) = zone.parse::<u32>() {
        return Ok(index);
    }
    #[cfg(unix)]
    {
        nix::net::if_::if_nametoindex(zone).map_err(|e| Error::interface(zone, e.to_string()))
    }
    #[cfg(not(unix))]
    {
        Err(Error::interface(zone, "named zones are only supported on unix"))
    }
}
