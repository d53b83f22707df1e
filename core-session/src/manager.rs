//! # Session Manager
//!
//! Redis-backed session store, grounded on `OPSISession`/`SessionMiddleware`
//! from the reference implementation: session state lives in Redis so any
//! worker task can service any request, keyed per client IP to bound the
//! number of concurrent sessions one address can hold.
//!
//! ## Storage shape
//!
//! | Key | Value | TTL |
//! |-----|-------|-----|
//! | `session:{ip}:{id}` | MessagePack-encoded [`Session`] | `max_age_seconds` |
//! | `session:{ip}:{id}:version` | Current `version` UUID, as a string | `max_age_seconds` |
//!
//! The version key backs optimistic concurrency: `store` only commits if
//! the version it read at load time still matches what's in Redis, so two
//! workers racing to persist the same session don't silently clobber each
//! other — the loser gets [`ServiceError::Conflict`] and must reload.

use core_shared::config::SessionConfig;
use core_shared::errors::ServiceError;
use core_shared::redis::{ip_address_to_redis_key, RedisFabric};
use core_shared::ServiceResult;
use std::time::Duration;
use tracing::{debug, warn};

use crate::session::Session;

const REDIS_KEY_PREFIX: &str = "session";

/// Owns the Redis fabric handle and session policy; cheap to `Clone` and
/// shared across all worker tasks via `web::Data`/`Arc`.
#[derive(Clone)]
pub struct SessionManager {
    fabric: RedisFabric,
    config: SessionConfig,
}

impl SessionManager {
    /// Builds a manager over an already-connected [`RedisFabric`].
    pub fn new(fabric: RedisFabric, config: SessionConfig) -> Self {
        Self { fabric, config }
    }

    /// Cookie name this manager expects/emits.
    pub fn cookie_name(&self) -> &str {
        &self.config.cookie_name
    }

    fn data_key(&self, client_addr: &str, session_id: &str) -> String {
        self.fabric.key(&format!(
            "{REDIS_KEY_PREFIX}:{}:{}",
            ip_address_to_redis_key(client_addr),
            session_id
        ))
    }

    fn version_key(&self, client_addr: &str, session_id: &str) -> String {
        format!("{}:version", self.data_key(client_addr, session_id))
    }

    fn ip_scan_pattern(&self, client_addr: &str) -> String {
        self.fabric.key(&format!("{REDIS_KEY_PREFIX}:{}:*", ip_address_to_redis_key(client_addr)))
    }

    /// Loads an existing session by id, scoped to the claiming client's
    /// address (a session id presented from a different IP is treated as
    /// not found, never reused). Returns `Ok(None)` if absent or expired;
    /// an expired session is also eagerly deleted.
    pub async fn load(
        &self,
        session_id: &str,
        client_addr: &str,
        now: i64,
    ) -> ServiceResult<Option<Session>> {
        let key = self.data_key(client_addr, session_id);
        let raw = match self.fabric.get_bytes(&key).await? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        let session: Session = rmp_serde::from_slice(&raw)
            .map_err(|e| ServiceError::Internal { message: format!("corrupt session: {e}") })?;

        if session.is_expired(now) {
            debug!(session_id, client_addr, "session expired, deleting");
            self.delete(&session).await?;
            return Ok(None);
        }

        Ok(Some(session))
    }

    /// Creates a fresh session, enforcing `max_sessions_per_ip` first.
    /// `requested_max_age` is the client-requested lifetime (e.g. from an
    /// `X-Opsi-Session-Lifetime` header), clamped to the configured bounds.
    pub async fn create(
        &self,
        client_addr: &str,
        user_agent: Option<&str>,
        requested_max_age: Option<u64>,
        now: i64,
    ) -> ServiceResult<Session> {
        if self.config.max_sessions_per_ip > 0 {
            let existing = self.fabric.scan_keys(&self.ip_scan_pattern(client_addr)).await?;
            let session_count = existing.iter().filter(|k| !k.ends_with(":version")).count();
            if session_count + 1 > self.config.max_sessions_per_ip as usize {
                warn!(
                    client_addr,
                    count = session_count,
                    limit = self.config.max_sessions_per_ip,
                    "too many sessions from this address"
                );
                return Err(ServiceError::Conflict {
                    resource: format!(
                        "too many sessions from {client_addr}, configured maximum is {}",
                        self.config.max_sessions_per_ip
                    ),
                });
            }
        }

        let max_age = requested_max_age
            .map(|requested| self.config.clamp_max_age(requested))
            .unwrap_or(self.config.max_age_seconds);

        let session = Session::new(client_addr, user_agent, max_age, now);
        debug!(session_id = %session.session_id, client_addr, "created new session");
        Ok(session)
    }

    /// Persists the session if it is persistent and not deleted. Enforces
    /// optimistic concurrency: `expected_version` must be the version the
    /// caller originally loaded (or `None` for a brand-new session); on a
    /// version mismatch the write is rejected with [`ServiceError::Conflict`]
    /// and the caller should reload and retry.
    pub async fn store(&self, session: &Session, expected_version: Option<&str>) -> ServiceResult<()> {
        if session.deleted || !session.persistent {
            return Ok(());
        }

        let payload = rmp_serde::to_vec(session)
            .map_err(|e| ServiceError::Internal { message: format!("session encode failed: {e}") })?;
        let data_key = self.data_key(&session.client_addr, &session.session_id);
        let version_key = format!("{data_key}:version");
        let ttl = Duration::from_secs(session.max_age_seconds);

        let committed = self
            .fabric
            .cas_set_bytes(
                &data_key,
                &version_key,
                expected_version,
                &session.version.to_string(),
                &payload,
                ttl,
            )
            .await?;

        if !committed {
            return Err(ServiceError::Conflict {
                resource: format!("session {} was modified concurrently", session.session_id),
            });
        }
        Ok(())
    }

    /// Deletes a session's Redis state. Safe to call on an already-deleted
    /// session.
    pub async fn delete(&self, session: &Session) -> ServiceResult<()> {
        let data_key = self.data_key(&session.client_addr, &session.session_id);
        let version_key = format!("{data_key}:version");
        self.fabric.delete(&data_key).await?;
        self.fabric.delete(&version_key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SessionConfig {
        SessionConfig {
            cookie_name: "opsi-session".into(),
            min_age_seconds: 1,
            max_age_seconds: 86400,
            max_sessions_per_ip: 5,
        }
    }

    #[test]
    fn clamp_max_age_respects_configured_bounds() {
        let config = test_config();
        assert_eq!(config.clamp_max_age(0), 1);
        assert_eq!(config.clamp_max_age(999_999), 86400);
        assert_eq!(config.clamp_max_age(120), 120);
    }
}
