//! Client IP resolution with private-range awareness.

use std::net::IpAddr;
use std::sync::LazyLock;

use axum::http::HeaderMap;
use ipnet::IpNet;

use crate::error::{CastleError, Result};

/// Private and link-local blocks.
///
/// <https://en.wikipedia.org/wiki/Private_network>
/// <https://en.wikipedia.org/wiki/Link-local_address>
const PRIVATE_CIDR_BLOCKS: [&str; 8] = [
    "127.0.0.1/8",    // localhost
    "10.0.0.0/8",     // 24-bit block
    "172.16.0.0/12",  // 20-bit block
    "192.168.0.0/16", // 16-bit block
    "169.254.0.0/16", // link local address
    "::1/128",        // localhost IPv6
    "fc00::/7",       // unique local address IPv6
    "fe80::/10",      // link local address IPv6
];

static SHARED: LazyLock<PrivateRanges> = LazyLock::new(PrivateRanges::new);

/// Immutable table of private CIDR blocks.
#[derive(Debug, Clone)]
pub struct PrivateRanges {
    blocks: Vec<IpNet>,
}

impl Default for PrivateRanges {
    fn default() -> Self {
        Self::new()
    }
}

impl PrivateRanges {
    /// Parse the fixed block table.
    ///
    /// # Panics
    ///
    /// If a block literal fails to parse. The table is compiled in, so this
    /// is a build defect rather than a runtime condition.
    pub fn new() -> Self {
        let blocks = PRIVATE_CIDR_BLOCKS
            .iter()
            .map(|block| {
                block
                    .parse::<IpNet>()
                    .unwrap_or_else(|e| panic!("failed to parse CIDR block {block:?}: {e}"))
            })
            .collect();
        Self { blocks }
    }

    /// Process-wide table, built on first use.
    pub fn shared() -> &'static PrivateRanges {
        &SHARED
    }

    /// Whether `ip` falls in any private block.
    pub fn contains(&self, ip: IpAddr) -> bool {
        // ::ffff:10.0.0.1 is classified as 10.0.0.1
        let ip = ip.to_canonical();
        self.blocks.iter().any(|block| block.contains(&ip))
    }

    /// Whether the textual `address` is private.
    ///
    /// Fails with [`CastleError::InvalidAddress`] if `address` is not an IP literal.
    pub fn is_private(&self, address: &str) -> Result<bool> {
        let ip = address
            .parse::<IpAddr>()
            .map_err(|_| CastleError::InvalidAddress {
                address: address.to_string(),
            })?;
        Ok(self.contains(ip))
    }
}

/// Resolve the originating client IP.
///
/// Priority:
/// 1. `Cf-Connecting-Ip` (set by the Cloudflare edge)
/// 2. First public, well-formed entry in `X-Forwarded-For`
/// 3. `X-Real-Ip`
/// 4. `remote_addr` with any `:port` removed
///
/// The result is not validated; malformed header values pass through.
pub fn client_ip(headers: &HeaderMap, remote_addr: &str, ranges: &PrivateRanges) -> String {
    // https://developers.cloudflare.com/fundamentals/reference/http-request-headers/#cf-connecting-ip
    if let Some(ip) = header_str(headers, "cf-connecting-ip") {
        return ip.to_string();
    }

    if let Some(forwarded) = header_str(headers, "x-forwarded-for") {
        let public = forwarded
            .split(',')
            .map(str::trim)
            .find(|ip| matches!(ranges.is_private(ip), Ok(false)));
        if let Some(ip) = public {
            return ip.to_string();
        }
    }

    if let Some(ip) = header_str(headers, "x-real-ip") {
        return ip.to_string();
    }

    if remote_addr.contains(':') {
        if let Some((host, _port)) = split_host_port(remote_addr) {
            return host.to_string();
        }
    }
    remote_addr.to_string()
}

/// First value of `name`, if present, valid text and non-empty.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

/// Split `host:port` or `[host]:port`.
///
/// Returns `None` for a missing port, unbalanced brackets, or an unbracketed
/// host containing colons.
pub fn split_host_port(addr: &str) -> Option<(&str, &str)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        let port = after.strip_prefix(':')?;
        if host.contains('[') || host.contains(']') || port.contains(['[', ']', ':']) {
            return None;
        }
        return Some((host, port));
    }

    let (host, port) = addr.rsplit_once(':')?;
    if host.contains(':') || addr.contains(['[', ']']) {
        return None;
    }
    Some((host, port))
}
