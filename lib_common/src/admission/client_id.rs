//! Client identification for admission bucketing.
//!
//! Precedence: the first entry of `X-Forwarded-For`, then `X-Real-IP`, then
//! the TCP peer address. Callers with none of these fall into the shared
//! [`ClientKey::Anonymous`] bucket.

use std::fmt;
use std::net::IpAddr;

use http::HeaderMap;

/// Proxy header listing the originating address first.
pub const FORWARDED_FOR: &str = "x-forwarded-for";
/// Single-address proxy header used as a fallback.
pub const REAL_IP: &str = "x-real-ip";

/// Key under which requests are counted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientKey {
    /// A caller address, taken from a proxy header or the connection itself.
    Address(String),
    /// No usable identity; every such caller shares this bucket.
    Anonymous,
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientKey::Address(addr) => f.write_str(addr),
            ClientKey::Anonymous => f.write_str("<anonymous>"),
        }
    }
}

/// Resolves the bucket key for a request.
pub fn resolve_client_key(headers: &HeaderMap, peer: Option<IpAddr>) -> ClientKey {
    let forwarded = header_str(headers, FORWARDED_FOR)
        .and_then(|value| value.split(',').map(str::trim).find(|hop| !hop.is_empty()));

    forwarded
        .or_else(|| header_str(headers, REAL_IP))
        .map(|addr| ClientKey::Address(addr.to_string()))
        .or_else(|| peer.map(|ip| ClientKey::Address(ip.to_string())))
        .unwrap_or(ClientKey::Anonymous)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
