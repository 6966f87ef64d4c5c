//! Parser for the requested relay target.
//! Accepts literal endpoints like `239.1.1.1:5000` or `[ff15::1]:5000`.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use percent_encoding::percent_decode_str;

use crate::error::{RelayError, Result};

/// Multicast group and port a relay joins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MulticastEndpoint {
    /// Group address (not checked to be in the multicast range)
    pub group: IpAddr,
    /// UDP port
    pub port: u16,
}

impl MulticastEndpoint {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.group, self.port)
    }
}

impl fmt::Display for MulticastEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

/// Parse a `host:port` string into a multicast endpoint.
///
/// Only IP literals are accepted. Whether the address is really a multicast
/// group is left to the socket layer, which fails the join otherwise.
pub fn resolve(address: &str) -> Result<MulticastEndpoint> {
    let invalid = |reason: String| RelayError::InvalidAddress {
        address: address.to_string(),
        reason,
    };

    let trimmed = address.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty address".to_string()));
    }

    let addr: SocketAddr = trimmed.parse().map_err(|_| {
        if trimmed.rfind(':').is_none() {
            invalid("missing port".to_string())
        } else {
            invalid("expected IP:PORT".to_string())
        }
    })?;

    if addr.port() == 0 {
        return Err(invalid("port must be non-zero".to_string()));
    }

    Ok(MulticastEndpoint {
        group: addr.ip(),
        port: addr.port(),
    })
}

/// Resolve the `{address}` segment of a request path.
///
/// `%XX` escapes are decoded first (clients commonly send the colon as
/// `%3A`). Malformed escapes are left as-is and then fail to parse, so every
/// failure on the segment is an `InvalidAddress`.
pub fn resolve_segment(segment: &str) -> Result<MulticastEndpoint> {
    let decoded = percent_decode_str(segment)
        .decode_utf8()
        .map_err(|_| RelayError::InvalidAddress {
            address: segment.to_string(),
            reason: "not UTF-8 after percent-decoding".to_string(),
        })?;
    resolve(&decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_resolve_ipv4() {
        let ep = resolve("239.1.1.1:5000").unwrap();
        assert_eq!(ep.group, IpAddr::V4(Ipv4Addr::new(239, 1, 1, 1)));
        assert_eq!(ep.port, 5000);
        assert_eq!(ep.to_string(), "239.1.1.1:5000");
    }

    #[test]
    fn test_resolve_ipv6() {
        let ep = resolve("[ff15::1]:1234").unwrap();
        assert_eq!(ep.group, IpAddr::V6(Ipv6Addr::new(0xff15, 0, 0, 0, 0, 0, 0, 1)));
        assert_eq!(ep.to_string(), "[ff15::1]:1234");
    }

    #[test]
    fn test_resolve_unicast_is_not_rejected() {
        // Range membership is the socket layer's problem
        assert!(resolve("10.0.0.1:5000").is_ok());
    }

    #[test]
    fn test_resolve_invalid() {
        let cases = [
            "not-an-address",
            "",
            "239.1.1.1",
            "239.1.1.1:abc",
            "239.1.1.1:0",
            "host:5000",
            "239.1.1.1:70000",
        ];
        for bad in cases {
            let err = resolve(bad).unwrap_err();
            assert!(matches!(err, RelayError::InvalidAddress { .. }), "{}", bad);
            assert_eq!(err.status(), 503);
        }
    }

    #[test]
    fn test_resolve_segment_decodes_escapes() {
        assert_eq!(resolve_segment("239.1.1.1%3A5000").unwrap().to_string(), "239.1.1.1:5000");
        let v6 = resolve_segment("%5Bff15%3a%3a1%5D%3a5000").unwrap();
        assert_eq!(v6.to_string(), "[ff15::1]:5000");
        assert_eq!(resolve_segment("239.1.1.1:5000").unwrap().port, 5000);
    }

    #[test]
    fn test_resolve_segment_bad_escapes() {
        for bad in ["239.1.1.1%zz5000", "239.1.1.1%3", "239.1.1.1%+A5000", "239.1.1.1:5000%FF"] {
            let err = resolve_segment(bad).unwrap_err();
            assert!(matches!(err, RelayError::InvalidAddress { .. }), "{}", bad);
            assert_eq!(err.status(), 503);
        }
    }
}
