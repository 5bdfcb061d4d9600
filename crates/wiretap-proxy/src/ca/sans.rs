//! Host parsing for leaf certificate subjects.

use rcgen::SanType;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Loopback addresses appended to every leaf certificate.
pub const LOOPBACK_IPS: [IpAddr; 2] = [
    IpAddr::V4(Ipv4Addr::LOCALHOST),
    IpAddr::V6(Ipv6Addr::LOCALHOST),
];

/// Strip an optional port from `host`, `host:port` or `[v6]:port`.
///
/// A bare IPv6 literal (`::1`) is returned unchanged.
pub fn bare_host(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return match rest.find(']') {
            Some(end) => &rest[..end],
            None => host,
        };
    }

    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}

/// Split `host:port` into its parts. Missing ports yield `None`.
pub fn split_host_port(authority: &str) -> (&str, Option<&str>) {
    let host = bare_host(authority);
    let port = authority
        .rsplit_once(':')
        .map(|(_, port)| port)
        .filter(|port| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()))
        .filter(|_| host != authority || authority.starts_with('['));
    (host, port)
}

/// IP SANs for a host: its own literal address (if it is one) and the loopbacks.
pub fn ip_sans(bare_host: &str) -> Vec<IpAddr> {
    let mut ips = Vec::with_capacity(3);
    if let Ok(ip) = bare_host.parse::<IpAddr>() {
        ips.push(ip);
    }
    ips.extend(LOOPBACK_IPS);
    ips
}

/// Subject alternative names for a leaf certificate.
///
/// Hostnames get a DNS entry, IP literals an IP entry; loopbacks are always
/// present so clients dialing `127.0.0.1` without SNI still verify.
///
/// An IP literal is never written as a DNS name as well. Verifiers match IP
/// targets against IP entries only, and a dotted-quad dNSName is malformed.
pub fn subject_alt_names(bare_host: &str) -> Result<Vec<SanType>, rcgen::Error> {
    let mut sans = Vec::new();
    if !bare_host.is_empty() && bare_host.parse::<IpAddr>().is_err() {
        sans.push(SanType::DnsName(bare_host.try_into()?));
    }
    for ip in ip_sans(bare_host) {
        let san = SanType::IpAddress(ip);
        if !sans.contains(&san) {
            sans.push(san);
        }
    }
    Ok(sans)
}
