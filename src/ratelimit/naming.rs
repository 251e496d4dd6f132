//! Identifier derivation for inbound HTTP requests.

use std::net::{IpAddr, Ipv6Addr};

use axum::http::HeaderMap;

/// Number of leading IPv6 bits used when none is configured.
pub const DEFAULT_IPV6_BITS: u32 = 64;

/// Header consulted when the server sits behind reverse proxies.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Assigns a limiter identifier to the remote host of an HTTP request.
///
/// IPv4 clients are named by their dotted address. IPv6 clients are named by
/// the leading `ipv6_bits` bits of their address written as `0`/`1`
/// characters, so every address in the same prefix shares one budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HttpRemoteNamer {
    /// How many leading bits of an IPv6 address identify a client.
    /// Zero selects [`DEFAULT_IPV6_BITS`]; values above 128 are clamped.
    pub ipv6_bits: u32,

    /// Number of trusted reverse proxies in front of the server.
    ///
    /// When non-zero, the client address is read from `X-Forwarded-For`,
    /// taking the entry `num_proxies` positions from the end (the address
    /// recorded by the outermost trusted proxy).
    pub num_proxies: usize,
}

impl HttpRemoteNamer {
    pub fn new(ipv6_bits: u32, num_proxies: usize) -> Self {
        Self {
            ipv6_bits,
            num_proxies,
        }
    }

    /// Name a request from its peer address (`"ip:port"` or `"[ip]:port"`)
    /// and headers.
    pub fn name(&self, remote_addr: &str, headers: &HeaderMap) -> String {
        let forwarded_for = headers
            .get(FORWARDED_FOR_HEADER)
            .and_then(|v| v.to_str().ok());
        self.name_for(remote_addr, forwarded_for)
    }

    /// Name a request from its peer address and raw `X-Forwarded-For` value.
    pub fn name_for(&self, remote_addr: &str, forwarded_for: Option<&str>) -> String {
        let raw = self.raw_ip(remote_addr, forwarded_for);
        match raw.parse::<IpAddr>() {
            Ok(IpAddr::V6(addr)) if addr.to_ipv4_mapped().is_none() => self.encode_ipv6(&addr),
            _ => raw.to_string(),
        }
    }

    fn prefix_bits(&self) -> usize {
        match self.ipv6_bits {
            0 => DEFAULT_IPV6_BITS as usize,
            bits => bits.min(128) as usize,
        }
    }

    fn encode_ipv6(&self, addr: &Ipv6Addr) -> String {
        let octets = addr.octets();
        (0..self.prefix_bits())
            .map(|bit| {
                if octets[bit / 8] & (0x80 >> (bit % 8)) == 0 {
                    '0'
                } else {
                    '1'
                }
            })
            .collect()
    }

    fn raw_ip<'a>(&self, remote_addr: &'a str, forwarded_for: Option<&'a str>) -> &'a str {
        if self.num_proxies > 0 {
            if let Some(header) = forwarded_for.filter(|h| !h.is_empty()) {
                let hosts: Vec<&str> = header.split(',').collect();
                if hosts.len() >= self.num_proxies {
                    return hosts[hosts.len() - self.num_proxies].trim();
                }
            }
        }
        ip_from_remote_addr(remote_addr)
    }
}

/// Strip the port from a peer address.
fn ip_from_remote_addr(addr: &str) -> &str {
    match addr.strip_prefix('[') {
        // "[IPv6Address]:port"
        Some(rest) => rest.split(']').next().unwrap_or(rest),
        // "IPv4Address:port"
        None => addr.split(':').next().unwrap_or(addr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const PREFIX_34: &str = "0010000000000001000011011011100010";
    const PREFIX_64: &str = "0010000000000001000011011011100010101100000100001111111000000001";

    fn forwarded(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR_HEADER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_remote_addr_naming() {
        let namer = HttpRemoteNamer::new(34, 0);
        let empty = HeaderMap::new();

        assert_eq!(namer.name("[2001:0db8:ac10:fe01::]:1234", &empty), PREFIX_34);
        assert_eq!(namer.name("123.76.192.1:1234", &empty), "123.76.192.1");
    }

    #[test]
    fn test_default_prefix_length() {
        let namer = HttpRemoteNamer::default();
        assert_eq!(
            namer.name_for("[2001:0db8:ac10:fe01::]:1234", None),
            PREFIX_64
        );
    }

    #[test]
    fn test_forwarded_for_naming() {
        let namer = HttpRemoteNamer::new(34, 1);

        assert_eq!(
            namer.name("10.0.0.1:443", &forwarded("2001:0db8:ac10:fe01::")),
            PREFIX_34
        );
        assert_eq!(
            namer.name("10.0.0.1:443", &forwarded("123.76.192.1")),
            "123.76.192.1"
        );
    }

    #[test]
    fn test_forwarded_for_uses_trusted_hop() {
        let namer = HttpRemoteNamer::new(0, 2);

        assert_eq!(
            namer.name_for("10.0.0.1:443", Some("6.6.6.6, 1.2.3.4 , 10.0.0.2")),
            "1.2.3.4"
        );
    }

    #[test]
    fn test_forwarded_for_ignored_without_proxies() {
        let namer = HttpRemoteNamer::default();
        assert_eq!(
            namer.name_for("10.0.0.1:443", Some("1.2.3.4")),
            "10.0.0.1"
        );
    }

    #[test]
    fn test_short_forwarded_for_falls_back_to_peer() {
        let namer = HttpRemoteNamer::new(0, 3);
        assert_eq!(
            namer.name_for("10.0.0.1:443", Some("1.2.3.4, 5.6.7.8")),
            "10.0.0.1"
        );
        assert_eq!(namer.name_for("10.0.0.1:443", Some("")), "10.0.0.1");
    }

    #[test]
    fn test_shared_prefix_collapses() {
        let namer = HttpRemoteNamer::new(48, 0);
        assert_eq!(
            namer.name_for("[2001:db8:1::1]:80", None),
            namer.name_for("[2001:db8:1:ffff::9]:80", None)
        );
        assert_ne!(
            namer.name_for("[2001:db8:1::1]:80", None),
            namer.name_for("[2001:db8:2::1]:80", None)
        );
    }

    #[test]
    fn test_unusual_addresses_pass_through() {
        let namer = HttpRemoteNamer::new(200, 0);

        assert_eq!(namer.name_for("[::ffff:1.2.3.4]:80", None), "::ffff:1.2.3.4");
        assert_eq!(namer.name_for("not-an-address", None), "not-an-address");
        assert_eq!(namer.name_for("[::1]:80", None).len(), 128);
    }
}
