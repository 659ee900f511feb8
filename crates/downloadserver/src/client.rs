// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Who a request came from, for logging.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use http::HeaderMap;

/// A per-request ID supplied by the caller (or a proxy in front of us), used
/// to follow a request through the logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    pub const FIELD: &'static str = "X-Request-ID";

    pub fn unknown() -> Self {
        Self("unknown".into())
    }
}

impl From<&HeaderMap> for RequestId {
    fn from(headers: &HeaderMap) -> Self {
        headers
            .get(Self::FIELD)
            .and_then(|v| v.to_str().ok())
            .map(|v| Self(v.to_owned()))
            .unwrap_or_else(Self::unknown)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The address a request originated from.
///
/// The first hop of `X-Forwarded-For` wins, then `CF-Connecting-IP`, then the socket peer.
pub fn client_addr(headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
    let header_ip = |name: &str, pick_first: bool| {
        let value = headers.get(name)?.to_str().ok()?;
        let value = if pick_first {
            value.split(',').next()?
        } else {
            value
        };
        value.trim().parse::<IpAddr>().ok()
    };
    header_ip("x-forwarded-for", true)
        .or_else(|| header_ip("cf-connecting-ip", false))
        .unwrap_or_else(|| peer.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn peer() -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], 4444))
    }

    #[test]
    fn request_id_from_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(RequestId::from(&headers), RequestId::unknown());
        headers.insert("x-request-id", HeaderValue::from_static("abc-123"));
        assert_eq!(RequestId::from(&headers).to_string(), "abc-123");
    }

    #[test]
    fn client_addr_precedence() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_addr(&headers, peer()), peer().ip());

        headers.insert("cf-connecting-ip", HeaderValue::from_static("2001:db8::1"));
        assert_eq!(
            client_addr(&headers, peer()),
            "2001:db8::1".parse::<IpAddr>().unwrap()
        );

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 198.51.100.2"),
        );
        assert_eq!(
            client_addr(&headers, peer()),
            "203.0.113.7".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn garbage_headers_fall_back_to_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("not an ip"));
        assert_eq!(client_addr(&headers, peer()), peer().ip());
    }
}
