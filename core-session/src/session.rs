//! # Session Entity
//!
//! The in-memory representation of one client session, matching the shape
//! `SessionManager` persists to Redis.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One authenticated (or anonymous, pre-auth) client session.
///
/// Mirrors `OPSISession` from the reference implementation: an opaque id
/// tied to the originating client address, a role/group snapshot used by
/// the access gate, and a `version` bumped on every persisted mutation so
/// concurrent writers can detect a stale read (optimistic concurrency —
/// see [`crate::manager::SessionManager::store`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// 128-bit opaque id, rendered as a 32-character lowercase hex string.
    pub session_id: String,

    /// Address of the client this session was minted for. Sessions are
    /// scoped per-IP: a session id seen from a different address is
    /// rejected (see `SessionManager::load`).
    pub client_addr: String,

    /// `User-Agent` header captured at session creation.
    pub user_agent: Option<String>,

    /// Unix timestamp (seconds) the session was created.
    pub created_at: i64,

    /// Unix timestamp (seconds) of the last request that touched this
    /// session.
    pub last_used_at: i64,

    /// Unix timestamp (seconds) of the last message-bus activity on this
    /// session's websocket, tracked separately from `last_used_at` because
    /// a long-lived bus connection shouldn't expire an otherwise-idle HTTP
    /// session.
    pub messagebus_last_used_at: Option<i64>,

    /// Seconds of inactivity before this session expires. Clamped to the
    /// configured `[min_age_seconds, max_age_seconds]` bounds at creation.
    pub max_age_seconds: u64,

    /// `false` for short-lived, non-browser clients (detected by
    /// `User-Agent` prefix — e.g. `curl/`): never sets `Set-Cookie`, so a
    /// burst of CLI calls from one IP can't exhaust `max_sessions_per_ip`.
    pub persistent: bool,

    /// `true` once `SessionManager::delete` has run. A deleted session is
    /// never re-stored and never emits `Set-Cookie`.
    pub deleted: bool,

    /// `true` once credentials were verified for this session.
    pub authenticated: bool,

    /// `true` if the session's user belongs to the admin group. Cleared by
    /// the admin-network demotion rule (`core-auth`) when an admin session
    /// is used from outside the configured admin networks.
    pub is_admin: bool,

    /// `true` if the session is restricted to read-only backend operations.
    pub is_read_only: bool,

    /// Authenticated username, `None` until authentication succeeds.
    pub username: Option<String>,

    /// Snapshot of the user's group memberships at authentication time.
    pub user_groups: Vec<String>,

    /// Depot/host object id, when the session belongs to an opsi client
    /// rather than a human user.
    pub host: Option<String>,

    /// Bumped on every persisted mutation; used as the optimistic
    /// concurrency token.
    pub version: Uuid,

    /// `true` until the first successful `load`/`store` round-trip.
    #[serde(default)]
    pub is_new: bool,
}

/// `User-Agent` prefixes treated as non-persistent clients.
const NON_PERSISTENT_USER_AGENT_PREFIXES: &[&str] = &["curl/", "zsync2"];

impl Session {
    /// Creates a brand-new session for a client that presented no (or an
    /// unknown/expired) session id.
    pub fn new(client_addr: &str, user_agent: Option<&str>, max_age_seconds: u64, now: i64) -> Self {
        let persistent = !user_agent
            .map(|ua| NON_PERSISTENT_USER_AGENT_PREFIXES.iter().any(|p| ua.starts_with(p)))
            .unwrap_or(false);

        Self {
            session_id: Uuid::new_v4().simple().to_string(),
            client_addr: client_addr.to_string(),
            user_agent: user_agent.map(str::to_string),
            created_at: now,
            last_used_at: now,
            messagebus_last_used_at: None,
            max_age_seconds,
            persistent,
            deleted: false,
            authenticated: false,
            is_admin: false,
            is_read_only: false,
            username: None,
            user_groups: Vec::new(),
            host: None,
            version: Uuid::new_v4(),
            is_new: true,
        }
    }

    /// `true` once `last_used_at` is more than `max_age_seconds` in the past.
    pub fn is_expired(&self, now: i64) -> bool {
        now - self.last_used_at > self.max_age_seconds as i64
    }

    /// Refreshes `last_used_at` and bumps `version`, marking the session
    /// dirty so the next `store` call persists the change.
    pub fn touch(&mut self, now: i64) {
        self.last_used_at = now;
        self.version = Uuid::new_v4();
    }

    /// Records message-bus activity without touching the HTTP idle clock.
    pub fn touch_messagebus(&mut self, now: i64) {
        self.messagebus_last_used_at = Some(now);
    }

    /// `Set-Cookie` header value, if this session should emit one.
    /// Deleted or non-persistent sessions emit nothing — mirrors
    /// `OPSISession.get_headers()`.
    pub fn set_cookie_header(&self, cookie_name: &str) -> Option<String> {
        if self.deleted || !self.persistent {
            return None;
        }
        Some(format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
            cookie_name, self.session_id, self.max_age_seconds
        ))
    }

    /// Marks the session deleted. Idempotent.
    pub fn mark_deleted(&mut self) {
        self.deleted = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curl_user_agent_is_non_persistent() {
        let session = Session::new("10.0.0.5", Some("curl/8.4.0"), 3600, 0);
        assert!(!session.persistent);
        assert!(session.set_cookie_header("opsi-session").is_none());
    }

    #[test]
    fn browser_user_agent_is_persistent_and_emits_cookie() {
        let session = Session::new("10.0.0.5", Some("Mozilla/5.0"), 3600, 0);
        assert!(session.persistent);
        let cookie = session.set_cookie_header("opsi-session").unwrap();
        assert!(cookie.starts_with("opsi-session="));
        assert!(cookie.contains("Max-Age=3600"));
    }

    #[test]
    fn deleted_session_never_emits_cookie() {
        let mut session = Session::new("10.0.0.5", None, 3600, 0);
        session.mark_deleted();
        assert!(session.set_cookie_header("opsi-session").is_none());
    }

    #[test]
    fn expiry_is_relative_to_last_used() {
        let mut session = Session::new("10.0.0.5", None, 100, 0);
        assert!(!session.is_expired(50));
        assert!(session.is_expired(201));
        session.touch(150);
        assert!(!session.is_expired(201));
    }

    #[test]
    fn touch_bumps_version() {
        let mut session = Session::new("10.0.0.5", None, 100, 0);
        let before = session.version;
        session.touch(10);
        assert_ne!(before, session.version);
    }
}
