//! # Network ACL
//!
//! Coarse allow/deny gate applied before any session or credential work,
//! plus the admin-network membership check used by [`crate::gate::AccessGate`]
//! to decide whether an admin session gets to keep its privilege this
//! request. Grounded on `check_network`/the `admin_networks` check in
//! `original_source/opsiconfd/session.py`.

use ipnet::IpNet;
use std::net::IpAddr;
use std::str::FromStr;

/// Parsed network allow-lists. An empty `allowed` list means "no network
/// restriction" (matches the source's `if not config.networks: return`).
pub struct NetworkAcl {
    allowed: Vec<IpNet>,
    admin_networks: Vec<IpNet>,
}

impl NetworkAcl {
    /// Parses CIDR strings from config. Invalid entries are dropped with a
    /// warning rather than failing startup — a typo'd network shouldn't
    /// take the whole service down.
    pub fn new(allowed: &[String], admin_networks: &[String]) -> Self {
        Self { allowed: parse_networks(allowed), admin_networks: parse_networks(admin_networks) }
    }

    /// `true` if no network restriction is configured, or `addr` falls
    /// inside one of the allowed networks.
    pub fn is_allowed(&self, addr: IpAddr) -> bool {
        self.allowed.is_empty() || self.allowed.iter().any(|net| net.contains(&addr))
    }

    /// `true` if no admin-network restriction is configured, or `addr`
    /// falls inside one of the admin networks.
    pub fn is_admin_network(&self, addr: IpAddr) -> bool {
        self.admin_networks.is_empty() || self.admin_networks.iter().any(|net| net.contains(&addr))
    }

    /// `false` only when an admin-network list is configured and `addr`
    /// isn't in it — used to decide whether to demote an admin session.
    pub fn restricts_admin_networks(&self) -> bool {
        !self.admin_networks.is_empty()
    }
}

fn parse_networks(raw: &[String]) -> Vec<IpNet> {
    raw.iter()
        .filter_map(|s| match IpNet::from_str(s) {
            Ok(net) => Some(net),
            Err(_) => {
                tracing::warn!(network = %s, "ignoring unparsable network in config");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allow_list_permits_everything() {
        let acl = NetworkAcl::new(&[], &[]);
        assert!(acl.is_allowed("203.0.113.5".parse().unwrap()));
    }

    #[test]
    fn allow_list_restricts_to_configured_networks() {
        let acl = NetworkAcl::new(&["10.0.0.0/8".to_string()], &[]);
        assert!(acl.is_allowed("10.1.2.3".parse().unwrap()));
        assert!(!acl.is_allowed("203.0.113.5".parse().unwrap()));
    }

    #[test]
    fn admin_network_membership_is_independent_of_general_allow_list() {
        let acl = NetworkAcl::new(&[], &["192.168.0.0/16".to_string()]);
        assert!(acl.restricts_admin_networks());
        assert!(acl.is_admin_network("192.168.1.1".parse().unwrap()));
        assert!(!acl.is_admin_network("10.0.0.1".parse().unwrap()));
    }
}
