//! Address classification for the origin guard.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Hostname suffixes that never name a public origin.
const INTERNAL_SUFFIXES: [&str; 4] = [".local", ".internal", ".localhost", ".localdomain"];

/// 10/8, 127/8, 169.254/16, 172.16/12, 192.168/16 and 0/8.
pub fn is_private_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    a == 10
        || a == 127
        || a == 0
        || (a == 169 && b == 254)
        || (a == 172 && (16..=31).contains(&b))
        || (a == 192 && b == 168)
}

/// `::1`, `::`, fc00::/7, fe80::/10; IPv4-mapped addresses use the IPv4 rules.
pub fn is_private_v6(ip: Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return true;
    }
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_private_v4(v4);
    }
    let first = ip.segments()[0];
    (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
}

pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => is_private_v6(v6),
    }
}

/// `localhost` and the internal-only suffixes (case-insensitive, trailing dot ignored).
pub fn is_internal_hostname(host: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    host == "localhost" || INTERNAL_SUFFIXES.iter().any(|s| host.ends_with(s))
}
