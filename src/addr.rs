use crate::registry::RegistryError;
use local_ip_address::{local_ip, local_ipv6};

/// Split an address of the form `host:port` or `host` on the last colon.
/// A missing or unparsable port yields 0. Bracketed IPv6 hosts survive the
/// split intact.
pub fn host_port(addr: &str) -> (&str, u16) {
    match addr.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().unwrap_or(0)),
        None => (addr, 0),
    }
}

fn is_wildcard(host: &str) -> bool {
    host.is_empty() || host == "0.0.0.0" || host == "[::]" || host == "::"
}

/// Resolve a bind host into an address other instances can dial.
///
/// A concrete host passes through unchanged. An empty or any-address host is
/// replaced by the first routable non-loopback address of this machine, IPv4
/// first.
pub fn extract(host: &str) -> Result<String, RegistryError> {
    if !is_wildcard(host) {
        return Ok(host.to_string());
    }

    match local_ip().or_else(|_| local_ipv6()) {
        Ok(ip) if !ip.is_loopback() => Ok(ip.to_string()),
        _ => Err(RegistryError::NoRoutableAddress {
            host: host.to_string(),
        }),
    }
}
