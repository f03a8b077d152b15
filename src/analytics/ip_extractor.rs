//! Client IP extraction, anonymization and routability checks
//!
//! - Takes the client-nearest address from `X-Forwarded-For` (first entry),
//!   then `X-Real-IP`, then the socket peer address
//! - Tolerates ports, IPv6 brackets and IPv4-mapped IPv6
//! - Never fails: anything unparseable is treated as absent

use axum::http::HeaderMap;
use ipnet::{Ipv4Net, Ipv6Net};
use std::net::IpAddr;
use std::sync::LazyLock;

/// IPv4 ranges that must never be sent to an external geo lookup
static NON_PUBLIC_V4: LazyLock<Vec<Ipv4Net>> = LazyLock::new(|| {
    [
        "0.0.0.0/8",
        "10.0.0.0/8",
        "100.64.0.0/10",
        "127.0.0.0/8",
        "169.254.0.0/16",
        "172.16.0.0/12",
        "192.0.0.0/24",
        "192.0.2.0/24",
        "192.168.0.0/16",
        "198.18.0.0/15",
        "198.51.100.0/24",
        "203.0.113.0/24",
        "224.0.0.0/4",
        "240.0.0.0/4",
    ]
    .iter()
    .filter_map(|net| net.parse().ok())
    .collect()
});

static NON_PUBLIC_V6: LazyLock<Vec<Ipv6Net>> = LazyLock::new(|| {
    [
        "::/128",
        "::1/128",
        "100::/64",
        "2001:db8::/32",
        "fc00::/7",
        "fe80::/10",
        "ff00::/8",
    ]
    .iter()
    .filter_map(|net| net.parse().ok())
    .collect()
});

/// Raw value of the forwarded-client header, if any
pub fn forwarded_for(headers: &HeaderMap) -> Option<&str> {
    ["x-forwarded-for", "x-real-ip"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|h| h.to_str().ok())
        .map(str::trim)
        .find(|v| !v.is_empty())
}

/// Extract the client IP address: forwarded headers first, then the socket
pub fn extract_client_ip(headers: &HeaderMap, socket_addr: Option<IpAddr>) -> Option<IpAddr> {
    forwarded_for(headers).and_then(parse_ip).or(socket_addr)
}

/// Parse the first entry of a comma-separated address list
///
/// Accepts `1.2.3.4`, `1.2.3.4:5678`, `2001:db8::1` and `[2001:db8::1]:443`.
pub fn parse_ip(raw: &str) -> Option<IpAddr> {
    let first = raw.split(',').next()?.trim().trim_matches('"');
    if first.is_empty() {
        return None;
    }

    if let Ok(ip) = first.parse::<IpAddr>() {
        return Some(ip);
    }

    if let Some(rest) = first.strip_prefix('[') {
        return rest.split(']').next()?.parse().ok();
    }

    // IPv4 with port; bare IPv6 has more than one colon and parsed above
    match first.split_once(':') {
        Some((host, port)) if !port.contains(':') => host.parse().ok(),
        _ => None,
    }
}

/// Anonymize an address given as text
///
/// - IPv4: zero the last octet, `/24`
/// - IPv6: first four groups, `::/64`
/// - absent or unparseable: empty string
pub fn anonymize_ip(raw: &str) -> String {
    parse_ip(raw).map(anonymize).unwrap_or_default()
}

pub fn anonymize(ip: IpAddr) -> String {
    match canonical(ip) {
        IpAddr::V4(addr) => {
            let [a, b, c, _] = addr.octets();
            format!("{a}.{b}.{c}.0/24")
        }
        IpAddr::V6(addr) => {
            let s = addr.segments();
            format!("{:x}:{:x}:{:x}:{:x}::/64", s[0], s[1], s[2], s[3])
        }
    }
}

/// Unwrap IPv4-mapped IPv6 (`::ffff:1.2.3.4`)
fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(addr) => addr
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(addr)),
        v4 => v4,
    }
}

/// Whether an address is globally routable and worth a geo lookup
pub fn is_public_ip(ip: IpAddr) -> bool {
    match canonical(ip) {
        IpAddr::V4(addr) => {
            !addr.is_broadcast() && !NON_PUBLIC_V4.iter().any(|net| net.contains(&addr))
        }
        IpAddr::V6(addr) => !NON_PUBLIC_V6.iter().any(|net| net.contains(&addr)),
    }
}
