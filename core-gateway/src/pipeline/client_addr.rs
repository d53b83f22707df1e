//! # Client Address Resolution
//!
//! Derives the real client address for a request, honoring
//! `X-Forwarded-For` only when the immediate TCP peer is a configured
//! trusted proxy — otherwise a client could simply set the header itself
//! and spoof its way past the network ACL or brute-force counter. An empty
//! trusted-proxy list means trust nobody's forwarded header, the opposite
//! of `core_auth::NetworkAcl`'s "empty allow-list means unrestricted"
//! convention, so this keeps its own small parsed list rather than reusing
//! that type for a different meaning.

use actix_web::dev::ConnectionInfo;
use ipnet::IpNet;
use std::net::IpAddr;
use std::str::FromStr;

/// Parsed trusted-proxy CIDRs. Invalid entries are dropped with a warning,
/// matching `NetworkAcl::new`'s tolerance for operator typos.
pub struct TrustedProxies(Vec<IpNet>);

impl TrustedProxies {
    pub fn new(cidrs: &[String]) -> Self {
        Self(
            cidrs
                .iter()
                .filter_map(|s| match IpNet::from_str(s) {
                    Ok(net) => Some(net),
                    Err(_) => {
                        tracing::warn!(network = %s, "ignoring unparsable trusted proxy network");
                        None
                    }
                })
                .collect(),
        )
    }

    fn contains(&self, addr: IpAddr) -> bool {
        self.0.iter().any(|net| net.contains(&addr))
    }
}

/// Resolves the address `core-auth`/`core-session` should treat as the
/// client's, given the raw peer address and the request's headers.
///
/// `peer_addr` is the actual TCP peer. `forwarded_for` is the raw
/// `X-Forwarded-For` header value, if present. The header's first entry is
/// only trusted when `peer_addr` is itself inside `trusted_proxies`;
/// otherwise `peer_addr` is used unconditionally.
pub fn resolve_client_addr(
    peer_addr: Option<IpAddr>,
    forwarded_for: Option<&str>,
    trusted_proxies: &TrustedProxies,
) -> Option<IpAddr> {
    let peer_addr = peer_addr?;
    if !trusted_proxies.contains(peer_addr) {
        return Some(peer_addr);
    }
    forwarded_for
        .and_then(|header| header.split(',').next())
        .map(str::trim)
        .and_then(|addr| addr.parse().ok())
        .or(Some(peer_addr))
}

/// Convenience wrapper over actix-web's `ConnectionInfo`, used by the
/// request-context middleware.
pub fn resolve_from_connection_info(info: &ConnectionInfo, trusted_proxies: &TrustedProxies) -> Option<IpAddr> {
    let peer_addr = info.peer_addr().and_then(|s| s.parse::<IpAddr>().ok());
    let forwarded = info.realip_remote_addr().filter(|addr| Some(*addr) != info.peer_addr());
    resolve_client_addr(peer_addr, forwarded, trusted_proxies)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untrusted_peer_is_used_directly_even_with_forwarded_header() {
        let proxies = TrustedProxies::new(&["10.0.0.0/8".to_string()]);
        let resolved = resolve_client_addr(Some("203.0.113.9".parse().unwrap()), Some("198.51.100.1"), &proxies);
        assert_eq!(resolved, Some("203.0.113.9".parse().unwrap()));
    }

    #[test]
    fn trusted_proxy_forwarded_header_is_honored() {
        let proxies = TrustedProxies::new(&["10.0.0.0/8".to_string()]);
        let resolved = resolve_client_addr(
            Some("10.0.0.5".parse().unwrap()),
            Some("198.51.100.1, 10.0.0.5"),
            &proxies,
        );
        assert_eq!(resolved, Some("198.51.100.1".parse().unwrap()));
    }

    #[test]
    fn no_trusted_proxies_configured_means_the_header_is_never_honored() {
        let proxies = TrustedProxies::new(&[]);
        let resolved = resolve_client_addr(Some("10.0.0.5".parse().unwrap()), Some("198.51.100.1"), &proxies);
        assert_eq!(resolved, Some("10.0.0.5".parse().unwrap()));
    }

    #[test]
    fn missing_peer_address_resolves_to_none() {
        let proxies = TrustedProxies::new(&[]);
        assert_eq!(resolve_client_addr(None, None, &proxies), None);
    }
}
