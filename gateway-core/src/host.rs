//! SSRF classification and allowlist matching (spec §4.2). Pure functions;
//! no I/O, no DNS resolution — callers pass the literal hostname or IP
//! already present in the parsed upstream URL.

use ipnet::Ipv4Net;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// True for private/loopback/link-local ranges and the literal `localhost`.
pub fn is_private(hostname: &str) -> bool {
    if hostname.eq_ignore_ascii_case("localhost") {
        return true;
    }
    match hostname.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => is_private_v4(ip),
        Ok(IpAddr::V6(ip)) => is_private_v6(ip),
        Err(_) => false,
    }
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    matches!(octets[0], 127 | 10 | 0)
        || (octets[0] == 172 && (16..=31).contains(&octets[1]))
        || (octets[0] == 192 && octets[1] == 168)
        || (octets[0] == 169 && octets[1] == 254)
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    if ip == Ipv6Addr::LOCALHOST {
        return true;
    }
    let segments = ip.segments();
    // fc00::/7
    if (segments[0] & 0xfe00) == 0xfc00 {
        return true;
    }
    // fe80::/10
    if (segments[0] & 0xffc0) == 0xfe80 {
        return true;
    }
    false
}

/// `SSRF_BLOCKED` unless `hostname` is public and (allowlist empty or a
/// pattern matches). Patterns: `*.d.example` matches `d.example` and any
/// subdomain; a plain pattern matches only exactly.
pub fn validate(hostname: &str, allowed_hosts: &[String]) -> Result<(), String> {
    if is_private(hostname) {
        return Err(hostname.to_string());
    }
    if allowed_hosts.is_empty() {
        return Ok(());
    }
    if allowed_hosts.iter().any(|pattern| host_pattern_matches(pattern, hostname)) {
        Ok(())
    } else {
        Err(hostname.to_string())
    }
}

fn host_pattern_matches(pattern: &str, hostname: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(suffix) => hostname.eq_ignore_ascii_case(suffix) || {
            let dotted_suffix = format!(".{suffix}");
            hostname.len() > dotted_suffix.len()
                && hostname[hostname.len() - dotted_suffix.len()..].eq_ignore_ascii_case(&dotted_suffix)
        },
        None => pattern.eq_ignore_ascii_case(hostname),
    }
}

/// `ip` against an allowlist entry that is either a plain IPv4 (exact
/// match) or a CIDR (`a.b.c.d/prefix`, bitmask compare). Accepts `/0` and
/// `/32`.
pub fn match_ip_allowlist(ip: Ipv4Addr, list: &[String]) -> bool {
    list.iter().any(|entry| ip_entry_matches(ip, entry))
}

fn ip_entry_matches(ip: Ipv4Addr, entry: &str) -> bool {
    if entry.contains('/') {
        entry.parse::<Ipv4Net>().map(|net| net.contains(&ip)).unwrap_or(false)
    } else {
        entry.parse::<Ipv4Addr>().map(|a| a == ip).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_private_v4_ranges() {
        assert!(is_private("127.0.0.1"));
        assert!(is_private("10.0.0.5"));
        assert!(is_private("172.16.0.1"));
        assert!(is_private("172.31.255.255"));
        assert!(!is_private("172.32.0.1"));
        assert!(is_private("192.168.1.1"));
        assert!(is_private("0.0.0.0"));
        assert!(is_private("169.254.1.1"));
        assert!(!is_private("8.8.8.8"));
    }

    #[test]
    fn classifies_private_v6_ranges_and_localhost_literal() {
        assert!(is_private("::1"));
        assert!(is_private("fc00::1"));
        assert!(is_private("fe80::1"));
        assert!(is_private("localhost"));
        assert!(is_private("LOCALHOST"));
        assert!(!is_private("2001:4860:4860::8888"));
    }

    #[test]
    fn wildcard_pattern_matches_subdomains_but_not_lookalikes() {
        let allowed = vec!["*.example.com".to_string()];
        assert!(validate("d.example.com", &allowed).is_ok());
        assert!(validate("example.com", &allowed).is_ok());
        assert!(validate("a.example.com", &allowed).is_ok());
        assert!(validate("x.y.example.com", &allowed).is_ok());
        assert!(validate("evil-example.com", &allowed).is_err());
        assert!(validate("notexample.com", &allowed).is_err());
    }

    #[test]
    fn empty_allowlist_passes_any_public_host() {
        assert!(validate("anything.example.org", &[]).is_ok());
    }

    #[test]
    fn private_host_always_rejected_even_if_allowlisted() {
        let allowed = vec!["127.0.0.1".to_string()];
        assert!(validate("127.0.0.1", &allowed).is_err());
    }

    #[test]
    fn cidr_allowlist_accepts_prefix_0_and_32() {
        let wide = vec!["1.2.3.4/0".to_string()];
        assert!(match_ip_allowlist("9.9.9.9".parse().unwrap(), &wide));

        let exact = vec!["1.2.3.4/32".to_string()];
        assert!(match_ip_allowlist("1.2.3.4".parse().unwrap(), &exact));
        assert!(!match_ip_allowlist("1.2.3.5".parse().unwrap(), &exact));
    }

    #[test]
    fn cidr_allowlist_matches_by_prefix() {
        let list = vec!["10.0.0.0/8".to_string()];
        assert!(match_ip_allowlist("10.1.2.3".parse().unwrap(), &list));
        assert!(!match_ip_allowlist("11.1.2.3".parse().unwrap(), &list));
    }
}
