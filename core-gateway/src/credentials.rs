//! # Development Credential Verifier
//!
//! `core-auth::CredentialVerifier` is a seam over the backend's credential
//! store; the relational backend itself is out of scope (spec §4.J), so
//! this wires the seam to `core-dispatch::backend::InMemoryBackend`'s user
//! table instead of leaving it unimplemented. A production deployment would
//! swap this for a verifier backed by the real backend's user/host objects.

use async_trait::async_trait;
use core_auth::{CredentialVerifier, VerifiedIdentity};
use core_shared::{ServiceError, ServiceResult};
use std::collections::HashMap;

/// One registered account: password plus the role snapshot to hand back on
/// a successful verify.
#[derive(Debug, Clone)]
pub struct StaticAccount {
    pub password: String,
    pub is_admin: bool,
    pub is_read_only: bool,
    pub user_groups: Vec<String>,
    pub host_id: Option<String>,
}

/// In-memory account table, loaded once at startup. Stands in for the
/// backend's user/host store the way `InMemoryBackend` stands in for the
/// relational product/host store.
pub struct StaticCredentialVerifier {
    accounts: HashMap<String, StaticAccount>,
}

impl StaticCredentialVerifier {
    pub fn new(accounts: HashMap<String, StaticAccount>) -> Self {
        Self { accounts }
    }
}

#[async_trait]
impl CredentialVerifier for StaticCredentialVerifier {
    async fn verify(&self, username: &str, password: &str) -> ServiceResult<VerifiedIdentity> {
        let account = self.accounts.get(username).ok_or(ServiceError::InvalidCredentials)?;
        if account.password != password {
            return Err(ServiceError::InvalidCredentials);
        }
        Ok(VerifiedIdentity {
            is_admin: account.is_admin,
            is_read_only: account.is_read_only,
            user_groups: account.user_groups.clone(),
            host_id: account.host_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accounts() -> HashMap<String, StaticAccount> {
        let mut accounts = HashMap::new();
        accounts.insert(
            "admin".to_string(),
            StaticAccount {
                password: "secret".into(),
                is_admin: true,
                is_read_only: false,
                user_groups: vec!["opsiadmin".into()],
                host_id: None,
            },
        );
        accounts
    }

    #[tokio::test]
    async fn correct_password_verifies() {
        let verifier = StaticCredentialVerifier::new(accounts());
        let identity = verifier.verify("admin", "secret").await.unwrap();
        assert!(identity.is_admin);
    }

    #[tokio::test]
    async fn wrong_password_is_invalid_credentials() {
        let verifier = StaticCredentialVerifier::new(accounts());
        let err = verifier.verify("admin", "wrong").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidCredentials));
    }

    #[tokio::test]
    async fn unknown_user_is_invalid_credentials() {
        let verifier = StaticCredentialVerifier::new(accounts());
        let err = verifier.verify("ghost", "anything").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidCredentials));
    }
}
