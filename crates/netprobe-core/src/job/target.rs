// Target strings: `scheme://host[:port]` or `host[:port]`.

use crate::error::{Error, Result};

/// Scheme assumed for targets without one, unless TLS is configured
pub const DEFAULT_SCHEME: &str = "tcp";

/// Scheme assumed when global TLS settings are present
pub const TLS_DEFAULT_SCHEME: &str = "ssl";

const SUPPORTED_SCHEMES: &[&str] = &["tcp", "plain", "tls", "ssl"];

/// One destination with the ports it is probed on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddress {
    pub scheme: String,
    pub host: String,
    pub ports: Vec<u16>,
}

impl TargetAddress {
    /// Parse a target; an explicit port overrides `default_ports`
    pub fn parse(raw: &str, default_scheme: &str, default_ports: &[u16]) -> Result<Self> {
        let raw = raw.trim();
        let (scheme, rest) = match raw.split_once("://") {
            Some((scheme, rest)) if !rest.is_empty() => (scheme.to_ascii_lowercase(), rest),
            _ => (default_scheme.to_string(), raw),
        };
        if !SUPPORTED_SCHEMES.contains(&scheme.as_str()) {
            return Err(Error::config(format!(
                "'{scheme}' is no supported connection scheme in '{raw}'"
            )));
        }
        let rest = rest.trim_end_matches('/');

        let (host, port) = split_host_port(rest, raw)?;
        if host.is_empty() {
            return Err(Error::config(format!("target '{raw}' has no host")));
        }

        let ports = match port {
            Some(port) => vec![port],
            None if default_ports.is_empty() => {
                return Err(Error::config(format!("host '{raw}' missing port number")));
            }
            None => default_ports.to_vec(),
        };

        Ok(Self {
            scheme,
            host: host.to_string(),
            ports,
        })
    }

    /// Whether the TLS layer applies
    pub fn is_tls(&self) -> bool {
        is_tls_scheme(&self.scheme)
    }

    /// Connection kind used in job names: `tls`, `ssl` or `plain`
    pub fn kind(&self) -> &str {
        if self.is_tls() { &self.scheme } else { "plain" }
    }
}

pub fn is_tls_scheme(scheme: &str) -> bool {
    scheme == "tls" || scheme == "ssl"
}

fn split_host_port<'a>(rest: &'a str, raw: &str) -> Result<(&'a str, Option<u16>)> {
    let parse_port = |p: &str| {
        p.parse::<u16>()
            .map_err(|_| Error::config(format!("'{p}' is no valid port number in '{raw}'")))
    };

    if let Some(inner) = rest.strip_prefix('[') {
        let (host, after) = inner
            .split_once(']')
            .ok_or_else(|| Error::config(format!("unterminated IPv6 literal in '{raw}'")))?;
        return match after.strip_prefix(':') {
            Some(p) => Ok((host, Some(parse_port(p)?))),
            None if after.is_empty() => Ok((host, None)),
            None => Err(Error::config(format!("malformed target '{raw}'"))),
        };
    }

    match rest.matches(':').count() {
        0 => Ok((rest, None)),
        1 => {
            let (host, port) = rest
                .split_once(':')
                .ok_or_else(|| Error::config(format!("malformed target '{raw}'")))?;
            Ok((host, Some(parse_port(port)?)))
        }
        // bare IPv6 literal
        _ => Ok((rest, None)),
    }
}
