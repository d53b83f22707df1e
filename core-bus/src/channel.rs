//! # Channel Model & Access Rules
//!
//! Spec §3 "Channel" and §4.G.3's channel access table, grounded on
//! `_check_channel_access` in
//! `original_source/opsiconfd/messagebus/websocket.py`.

use core_shared::{ServiceError, ServiceResult};

/// Identity a channel-access decision is evaluated against. Deliberately
/// independent of `core_dispatch::CallerPrincipal`/`core_auth::VerifiedIdentity`
/// — this crate doesn't need either's full shape, only what routing needs.
#[derive(Debug, Clone)]
pub struct ChannelPrincipal {
    pub session_id: String,
    pub username: Option<String>,
    pub host_id: Option<String>,
    pub is_admin: bool,
    pub authenticated: bool,
}

impl ChannelPrincipal {
    /// The principal's own inbox channel: `user:<name>` for a human,
    /// `host:<id>` for a managed host.
    pub fn own_channel(&self) -> Option<String> {
        self.username
            .as_ref()
            .map(|u| format!("user:{u}"))
            .or_else(|| self.host_id.as_ref().map(|h| format!("host:{h}")))
    }

    pub fn session_channel(&self) -> String {
        format!("session:{}", self.session_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// The fixed service channels every deployment recognizes, beyond the
/// parametric `service:depot:<id>:{jsonrpc,terminal}` family.
const FIXED_SERVICE_CHANNELS: &[&str] = &["messagebus", "config:jsonrpc", "config:terminal"];

/// Expands the `$`/`@` shorthands (session channel / user channel) used in
/// subscription and send requests. Any other string passes through
/// unchanged — it names a concrete channel already.
pub fn expand_shorthand(raw: &str, principal: &ChannelPrincipal) -> ServiceResult<String> {
    match raw {
        "$" => Ok(principal.session_channel()),
        "@" => principal
            .own_channel()
            .ok_or_else(|| ServiceError::BadRequest { message: "no user/host channel for this principal".into() }),
        other => Ok(other.to_string()),
    }
}

/// `true` if `rest` (the part after `service:`) names a channel in the
/// `service:depot:<id>:{jsonrpc,terminal}` family — exactly four
/// colon-delimited parts once the `service:` prefix is counted.
fn is_depot_service_channel(rest: &str) -> bool {
    let parts: Vec<&str> = rest.split(':').collect();
    matches!(parts.as_slice(), ["depot", _id, "jsonrpc" | "terminal"])
}

/// Enforces the spec §4.G.3 channel access table. `channel` must already be
/// shorthand-expanded (see [`expand_shorthand`]).
pub fn check_channel_access(channel: &str, principal: &ChannelPrincipal, access: Access) -> ServiceResult<()> {
    if !principal.authenticated {
        return Err(ServiceError::MissingCredentials);
    }

    if let Some(sid) = channel.strip_prefix("session:") {
        return if sid == principal.session_id {
            Ok(())
        } else {
            Err(ServiceError::AccessDenied)
        };
    }

    if let Some(name) = channel.strip_prefix("user:") {
        return match access {
            Access::Read => {
                if principal.username.as_deref() == Some(name) {
                    Ok(())
                } else {
                    Err(ServiceError::AccessDenied)
                }
            }
            // "anyone with a write-ACL matching entry may write to it" —
            // narrowed here to any authenticated principal, since the
            // generic ACL-vector evaluation lives in core-dispatch and this
            // crate doesn't depend on it.
            Access::Write => Ok(()),
        };
    }

    if let Some(id) = channel.strip_prefix("host:") {
        return match access {
            Access::Read => {
                if principal.host_id.as_deref() == Some(id) {
                    Ok(())
                } else {
                    Err(ServiceError::AccessDenied)
                }
            }
            Access::Write => Ok(()),
        };
    }

    if let Some(rest) = channel.strip_prefix("service:") {
        let is_known = FIXED_SERVICE_CHANNELS.contains(&rest) || is_depot_service_channel(rest);
        if !is_known {
            return Err(ServiceError::BadRequest { message: format!("unknown service channel: {channel}") });
        }
        return match access {
            Access::Write => Ok(()),
            Access::Read => {
                if principal.is_admin {
                    Ok(())
                } else {
                    Err(ServiceError::PermissionDenied)
                }
            }
        };
    }

    if channel.strip_prefix("event:").is_some() {
        return match access {
            Access::Read => {
                if principal.is_admin {
                    Ok(())
                } else {
                    Err(ServiceError::PermissionDenied)
                }
            }
            // Event channels are written only by the service itself
            // (core-bus's own producer calls, not a client frame).
            Access::Write => Err(ServiceError::PermissionDenied),
        };
    }

    Err(ServiceError::BadRequest { message: format!("unrecognized channel: {channel}") })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> ChannelPrincipal {
        ChannelPrincipal {
            session_id: "sidA".into(),
            username: Some("admin".into()),
            host_id: None,
            is_admin: true,
            authenticated: true,
        }
    }

    fn plain_user() -> ChannelPrincipal {
        ChannelPrincipal {
            session_id: "sidB".into(),
            username: Some("bob".into()),
            host_id: None,
            is_admin: false,
            authenticated: true,
        }
    }

    #[test]
    fn dollar_expands_to_session_channel() {
        let principal = plain_user();
        assert_eq!(expand_shorthand("$", &principal).unwrap(), "session:sidB");
    }

    #[test]
    fn at_expands_to_user_channel() {
        let principal = plain_user();
        assert_eq!(expand_shorthand("@", &principal).unwrap(), "user:bob");
    }

    #[test]
    fn only_owning_session_may_access_its_channel() {
        let principal = plain_user();
        assert!(check_channel_access("session:sidB", &principal, Access::Read).is_ok());
        assert!(check_channel_access("session:sidA", &principal, Access::Read).is_err());
    }

    #[test]
    fn user_channel_readable_only_by_its_owner() {
        let principal = plain_user();
        assert!(check_channel_access("user:bob", &principal, Access::Read).is_ok());
        assert!(check_channel_access("user:carol", &principal, Access::Read).is_err());
        assert!(check_channel_access("user:carol", &principal, Access::Write).is_ok());
    }

    #[test]
    fn depot_service_channel_requires_exactly_four_parts() {
        assert!(is_depot_service_channel("depot:depotA:jsonrpc"));
        assert!(is_depot_service_channel("depot:depotA:terminal"));
        assert!(!is_depot_service_channel("depot:depotA:jsonrpc:extra"));
        assert!(!is_depot_service_channel("depot:jsonrpc"));
    }

    #[test]
    fn service_channel_readable_only_by_admin() {
        assert!(check_channel_access("service:messagebus", &admin(), Access::Read).is_ok());
        assert!(check_channel_access("service:messagebus", &plain_user(), Access::Read).is_err());
        assert!(check_channel_access("service:messagebus", &plain_user(), Access::Write).is_ok());
    }

    #[test]
    fn event_channel_never_writable_by_clients() {
        assert!(check_channel_access("event:host_connected", &admin(), Access::Write).is_err());
        assert!(check_channel_access("event:host_connected", &admin(), Access::Read).is_ok());
    }
}
