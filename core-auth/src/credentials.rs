//! # Credential Extraction and Verification
//!
//! HTTP Basic-Auth parsing (`get_basic_auth`) plus the [`CredentialVerifier`]
//! seam a concrete backend plugs into. Kept as a trait rather than a direct
//! dependency on `core-dispatch::backend` so `core-auth` doesn't need to know
//! about the JSON-RPC dispatcher — `core-gateway` wires the two together.

use async_trait::async_trait;
use base64::Engine;
use core_shared::{ServiceError, ServiceResult};

/// Username/password pair decoded from an `Authorization: Basic` header.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// Parses an `Authorization` header value. Mirrors `get_basic_auth` from
/// the reference implementation: missing header or wrong scheme both fail
/// with [`ServiceError::MissingCredentials`] so the caller can attach the
/// `WWW-Authenticate` challenge uniformly.
pub fn parse_basic_auth(header_value: Option<&str>) -> ServiceResult<BasicAuth> {
    let header_value = header_value.ok_or(ServiceError::MissingCredentials)?;
    let encoded = header_value.strip_prefix("Basic ").ok_or(ServiceError::MissingCredentials)?;

    let decoded =
        base64::engine::general_purpose::STANDARD.decode(encoded).map_err(|_| ServiceError::InvalidCredentials)?;
    let decoded = String::from_utf8(decoded).map_err(|_| ServiceError::InvalidCredentials)?;
    let (username, password) =
        decoded.split_once(':').ok_or(ServiceError::InvalidCredentials)?;

    Ok(BasicAuth { username: username.to_string(), password: password.to_string() })
}

/// What a successful credential check resolves to: the role snapshot
/// [`crate::gate::AccessGate`] writes into the session.
#[derive(Debug, Clone, Default)]
pub struct VerifiedIdentity {
    pub is_admin: bool,
    pub is_read_only: bool,
    pub user_groups: Vec<String>,
    /// Set when the credential belongs to an opsi client/depot host rather
    /// than a human user.
    pub host_id: Option<String>,
}

/// Seam to the backend's credential store. `core-gateway` implements this
/// over the concrete `BackendFacade`.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Verifies a username/password pair, or a host key when `auth_type`
    /// indicates host-key-only authentication (no separate username).
    async fn verify(&self, username: &str, password: &str) -> ServiceResult<VerifiedIdentity>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_basic_auth_header() {
        // "admin:secret" base64-encoded.
        let header = "Basic YWRtaW46c2VjcmV0";
        let auth = parse_basic_auth(Some(header)).unwrap();
        assert_eq!(auth.username, "admin");
        assert_eq!(auth.password, "secret");
    }

    #[test]
    fn missing_header_is_missing_credentials() {
        let err = parse_basic_auth(None).unwrap_err();
        assert!(matches!(err, ServiceError::MissingCredentials));
    }

    #[test]
    fn wrong_scheme_is_missing_credentials() {
        let err = parse_basic_auth(Some("Bearer abc")).unwrap_err();
        assert!(matches!(err, ServiceError::MissingCredentials));
    }

    #[test]
    fn malformed_base64_is_invalid_credentials() {
        let err = parse_basic_auth(Some("Basic not-base64!!")).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidCredentials));
    }
}
