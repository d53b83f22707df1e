//! # Access Gate
//!
//! The single `check_access` orchestration point: network ACL, brute-force
//! block, credential verification, and admin-network demotion, composed in
//! the same order as `check_network`/`check_blocked`/`authenticate`/
//! `check_access` in `original_source/opsiconfd/session.py`.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use core_shared::config::AuthConfig;
use core_shared::{ServiceError, ServiceResult};
use core_session::Session;
use tracing::{info, warn};

use crate::brute_force::BruteForceCheck;
use crate::credentials::{BasicAuth, CredentialVerifier};
use crate::network::NetworkAcl;

/// Fixed delay applied on every authentication failure, so a client can't
/// distinguish "bad username" from "bad password" (or measure backend
/// latency) by timing the response.
const AUTH_FAILURE_DELAY: Duration = Duration::from_millis(200);

/// The access level a request's path/method resolves to, set by
/// `core-gateway`'s routing table before the gate runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessRole {
    /// No authentication required at all.
    Public,
    /// Any authenticated session is sufficient.
    Authenticated,
    /// The session must currently hold admin privilege.
    Admin,
}

/// Outcome of a gate check that mutated the session (e.g. admin demotion),
/// so the caller knows to persist it even on a cache-hit request path.
pub struct GateOutcome {
    pub session_changed: bool,
}

/// Composes the network/brute-force/credential/role checks into one call.
pub struct AccessGate {
    network: NetworkAcl,
    brute_force: Arc<dyn BruteForceCheck>,
    config: AuthConfig,
    verifier: Arc<dyn CredentialVerifier>,
}

impl AccessGate {
    /// Builds a gate. `verifier` is the concrete backend credential check,
    /// supplied by `core-gateway`.
    pub fn new(
        network: NetworkAcl,
        brute_force: Arc<dyn BruteForceCheck>,
        config: AuthConfig,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Self {
        Self { network, brute_force, config, verifier }
    }

    /// `true` if `addr` is permitted to connect at all (the coarse
    /// pre-session network check).
    pub fn check_network(&self, addr: IpAddr) -> ServiceResult<()> {
        if self.network.is_allowed(addr) {
            Ok(())
        } else {
            Err(ServiceError::AccessDenied)
        }
    }

    /// Full access check for one request against a role requirement.
    /// Authenticates the session in place if it isn't already, applies the
    /// admin-network demotion rule, and enforces the final role
    /// requirement. Returns whether the session was mutated and must be
    /// persisted.
    pub async fn check_access(
        &self,
        session: &mut Session,
        client_addr: IpAddr,
        required_role: AccessRole,
        basic_auth: Option<BasicAuth>,
    ) -> ServiceResult<GateOutcome> {
        self.check_network(client_addr)?;

        if required_role == AccessRole::Public {
            return Ok(GateOutcome { session_changed: false });
        }

        let mut session_changed = false;

        if !session.authenticated {
            let client_addr_str = client_addr.to_string();
            if self.brute_force.is_blocked(&client_addr_str).await? {
                return Err(ServiceError::Blocked);
            }

            let basic_auth = basic_auth.ok_or(ServiceError::MissingCredentials)?;
            match self.verifier.verify(&basic_auth.username, &basic_auth.password).await {
                Ok(identity) => {
                    self.brute_force.record_success(&client_addr_str).await?;
                    session.authenticated = true;
                    session.username = Some(basic_auth.username.clone());
                    session.is_admin = identity.is_admin;
                    session.is_read_only = identity.is_read_only;
                    session.user_groups = identity.user_groups;
                    session.host = identity.host_id;

                    if self.config.monitoring_user.as_deref() == Some(basic_auth.username.as_str()) {
                        session.is_admin = false;
                        session.is_read_only = true;
                    }
                    session_changed = true;
                    info!(username = %basic_auth.username, "authenticated session");
                }
                Err(err) => {
                    warn!(client_addr = %client_addr_str, "authentication failed");
                    self.brute_force.record_failure(&client_addr_str).await?;
                    tokio::time::sleep(AUTH_FAILURE_DELAY).await;
                    return Err(err);
                }
            }

            if session.is_admin && self.network.restricts_admin_networks() {
                if !self.network.is_admin_network(client_addr) {
                    warn!(
                        username = ?session.username,
                        %client_addr,
                        "admin session used outside admin network, demoting"
                    );
                    session.is_admin = false;
                    session.user_groups.retain(|g| g != "opsiadmin");
                    session_changed = true;
                }
            }
        }

        if required_role == AccessRole::Admin && !session.is_admin {
            return Err(ServiceError::PermissionDenied);
        }

        Ok(GateOutcome { session_changed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::credentials::VerifiedIdentity;
    use std::collections::HashSet;
    use std::sync::Mutex;

    struct AlwaysAdmin;

    #[async_trait]
    impl CredentialVerifier for AlwaysAdmin {
        async fn verify(&self, _username: &str, _password: &str) -> ServiceResult<VerifiedIdentity> {
            Ok(VerifiedIdentity {
                is_admin: true,
                is_read_only: false,
                user_groups: vec!["opsiadmin".to_string()],
                host_id: None,
            })
        }
    }

    /// In-memory stand-in for [`BruteForceGuard`], so these tests don't
    /// require a live Redis. Panics if touched when a test asserts it
    /// shouldn't be (e.g. the `Public`-role short-circuit).
    #[derive(Default)]
    struct RecordingBruteForce {
        blocked: Mutex<HashSet<String>>,
        touched: Mutex<bool>,
    }

    impl RecordingBruteForce {
        fn was_touched(&self) -> bool {
            *self.touched.lock().unwrap()
        }
    }

    #[async_trait]
    impl BruteForceCheck for RecordingBruteForce {
        async fn is_blocked(&self, client_addr: &str) -> ServiceResult<bool> {
            *self.touched.lock().unwrap() = true;
            Ok(self.blocked.lock().unwrap().contains(client_addr))
        }

        async fn record_failure(&self, client_addr: &str) -> ServiceResult<()> {
            *self.touched.lock().unwrap() = true;
            self.blocked.lock().unwrap().insert(client_addr.to_string());
            Ok(())
        }

        async fn record_success(&self, client_addr: &str) -> ServiceResult<()> {
            *self.touched.lock().unwrap() = true;
            self.blocked.lock().unwrap().remove(client_addr);
            Ok(())
        }
    }

    fn test_config() -> AuthConfig {
        AuthConfig {
            basic_auth_realm: "opsi".into(),
            max_auth_failures: 10,
            failures_interval_seconds: 120,
            client_block_seconds: 120,
            monitoring_user: None,
        }
    }

    #[tokio::test]
    async fn public_role_never_touches_session() {
        let brute_force = Arc::new(RecordingBruteForce::default());
        let gate = AccessGate::new(
            NetworkAcl::new(&[], &[]),
            brute_force.clone(),
            test_config(),
            Arc::new(AlwaysAdmin),
        );
        let mut session = core_session::Session::new("10.0.0.1", None, 3600, 0);
        let outcome = gate
            .check_access(&mut session, "10.0.0.1".parse().unwrap(), AccessRole::Public, None)
            .await
            .unwrap();
        assert!(!outcome.session_changed);
        assert!(!session.authenticated);
        assert!(!brute_force.was_touched());
    }

    #[tokio::test]
    async fn admin_session_outside_admin_network_is_demoted() {
        let brute_force = Arc::new(RecordingBruteForce::default());
        let gate = AccessGate::new(
            NetworkAcl::new(&[], &["192.168.0.0/16".to_string()]),
            brute_force,
            test_config(),
            Arc::new(AlwaysAdmin),
        );
        let mut session = core_session::Session::new("10.0.0.5", None, 3600, 0);
        let basic_auth = BasicAuth { username: "admin".to_string(), password: "secret".to_string() };
        let outcome = gate
            .check_access(
                &mut session,
                "10.0.0.5".parse().unwrap(),
                AccessRole::Authenticated,
                Some(basic_auth),
            )
            .await
            .unwrap();
        assert!(outcome.session_changed);
        assert!(session.authenticated);
        assert!(!session.is_admin);
        assert!(!session.user_groups.contains(&"opsiadmin".to_string()));
    }

    #[tokio::test]
    async fn admin_session_inside_admin_network_keeps_privilege() {
        let brute_force = Arc::new(RecordingBruteForce::default());
        let gate = AccessGate::new(
            NetworkAcl::new(&[], &["192.168.0.0/16".to_string()]),
            brute_force,
            test_config(),
            Arc::new(AlwaysAdmin),
        );
        let mut session = core_session::Session::new("192.168.1.5", None, 3600, 0);
        let basic_auth = BasicAuth { username: "admin".to_string(), password: "secret".to_string() };
        gate.check_access(
            &mut session,
            "192.168.1.5".parse().unwrap(),
            AccessRole::Admin,
            Some(basic_auth),
        )
        .await
        .unwrap();
        assert!(session.is_admin);
    }

    #[test]
    fn admin_role_requires_admin_session() {
        let required = AccessRole::Admin;
        assert_ne!(required, AccessRole::Authenticated);
    }
}
