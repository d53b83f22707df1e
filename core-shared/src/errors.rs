//! # Service Error Types
//!
//! Unified error handling for every crate in the workspace, with automatic
//! HTTP and WebSocket-close-code mapping.
//!
//! ## Error Categories
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          ServiceError Categories                         │
//! ├─────────────────────────┬───────────────────┬────────────────────────────┤
//! │ Authentication (401)    │ Permission (401/403)│ Bad input (400/422)      │
//! ├─────────────────────────┼───────────────────┼────────────────────────────┤
//! │ MissingCredentials      │ PermissionDenied  │ BadRequest                 │
//! │ InvalidCredentials      │ AccessDenied      │ UnknownMethod              │
//! │ Blocked                 │                   │ MalformedEnvelope          │
//! ├─────────────────────────┴───────────────────┴────────────────────────────┤
//! │ Resources (404, 409)    │ Overload (503)    │ Server (500)               │
//! ├─────────────────────────┼───────────────────┼────────────────────────────┤
//! │ NotFound                │ Overloaded        │ RedisError                 │
//! │ Conflict                │                   │ Internal                  │
//! │ Unaccomplishable        │                   │ Transient                  │
//! └─────────────────────────┴───────────────────┴────────────────────────────┘
//! ```
//!
//! Every variant maps to both an HTTP status (for the RPC/REST surface) and a
//! WebSocket close code (for the message bus), matching spec §7's error
//! kinds. Server errors never leak internal detail to non-admin sessions;
//! see [`ServiceError::client_message`].

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias used throughout the workspace.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Unified error type with automatic HTTP/WebSocket mapping.
#[derive(Debug, Error)]
pub enum ServiceError {
    // -- Authentication (§7 "Authentication") --------------------------------
    /// No `Authorization` header and no usable session cookie.
    #[error("Authentication required")]
    MissingCredentials,

    /// Basic-auth credentials or host-key did not validate.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Peer address is currently within a brute-force cool-down.
    #[error("Client is blocked")]
    Blocked,

    // -- Permission (§7 "Permission") ----------------------------------------
    /// Authenticated, but the ACL vector for this method/endpoint denied it.
    #[error("Permission denied")]
    PermissionDenied,

    /// Authenticated, but the network/admin-network check failed.
    #[error("Access denied from this network")]
    AccessDenied,

    // -- Bad input (§7 "Bad input") -------------------------------------------
    /// Generic malformed request.
    #[error("Bad request: {message}")]
    BadRequest {
        /// Human-readable description.
        message: String,
    },

    /// JSON-RPC method name not found in the backend interface table.
    #[error("Method not found: {method}")]
    UnknownMethod {
        /// The method name the caller requested.
        method: String,
    },

    /// A JSON-RPC envelope mixed 1.0-only and 2.0-only fields, or was
    /// otherwise self-contradictory. Per spec §9, ambiguous envelopes are
    /// rejected rather than guessed.
    #[error("Malformed or ambiguous JSON-RPC envelope")]
    MalformedEnvelope,

    // -- Resources (§7 "Not found" / "Conflict/Unaccomplishable") -------------
    /// Requested object does not exist in the backend.
    #[error("Not found: {resource}")]
    NotFound {
        /// Identifier of the missing resource.
        resource: String,
    },

    /// Would violate a uniqueness constraint or existing state.
    #[error("Conflict: {resource}")]
    Conflict {
        /// Description of the conflicting resource/state.
        resource: String,
    },

    /// A business-rule violation that is not a not-found or a conflict.
    #[error("Cannot be accomplished: {reason}")]
    Unaccomplishable {
        /// Explanation for the caller (never the admin-only stack trace).
        reason: String,
    },

    // -- Overload (§7 "Overload") ----------------------------------------------
    /// Session manager has been marked overloaded; client should retry later.
    #[error("Service overloaded, retry after {retry_after_secs}s")]
    Overloaded {
        /// Seconds until the overload window ends.
        retry_after_secs: u64,
    },

    // -- Transient / Server (§7 "Transient Redis/backend" / "Fatal") ----------
    /// Redis operation failed after exhausting its retry budget.
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    /// Transient failure elsewhere (backend call, thread-pool task) that was
    /// retried and still failed.
    #[error("Transient failure: {message}")]
    Transient {
        /// Internal detail, logged but not echoed to non-admin callers.
        message: String,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {message}")]
    Internal {
        /// Internal detail, logged but not echoed to non-admin callers.
        message: String,
    },
}

impl ServiceError {
    /// Machine-readable error code, stable across releases.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "MISSING_CREDENTIALS",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::Blocked => "BLOCKED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::BadRequest { .. } => "BAD_REQUEST",
            Self::UnknownMethod { .. } => "UNKNOWN_METHOD",
            Self::MalformedEnvelope => "MALFORMED_ENVELOPE",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            Self::Unaccomplishable { .. } => "UNACCOMPLISHABLE",
            Self::Overloaded { .. } => "OVERLOADED",
            Self::RedisError(_) => "REDIS_ERROR",
            Self::Transient { .. } => "TRANSIENT",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// HTTP status code for this error. Single source of truth for the REST
    /// and JSON-RPC envelope error mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingCredentials | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::Blocked | Self::AccessDenied => StatusCode::FORBIDDEN,
            // Legacy reason: permission errors historically returned 401, not 403.
            Self::PermissionDenied => StatusCode::UNAUTHORIZED,
            Self::BadRequest { .. } | Self::MalformedEnvelope => StatusCode::BAD_REQUEST,
            Self::UnknownMethod { .. } | Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict { .. } | Self::Unaccomplishable { .. } => StatusCode::CONFLICT,
            Self::Overloaded { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::RedisError(_) | Self::Transient { .. } | Self::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// WebSocket close code for the message bus upgrade path.
    pub fn ws_close_code(&self) -> u16 {
        match self {
            Self::MissingCredentials | Self::InvalidCredentials => 4401,
            Self::Blocked | Self::AccessDenied | Self::PermissionDenied => 4403,
            Self::Overloaded { .. } => 1013,
            Self::BadRequest { .. } | Self::MalformedEnvelope => 4400,
            _ => 1011,
        }
    }

    /// `true` for 5xx-class errors: logged at error level and never detailed
    /// to non-admin callers.
    pub fn is_server_error(&self) -> bool {
        self.status_code().as_u16() >= 500
    }

    /// Message safe to return to a non-admin caller. Server-side errors are
    /// flattened to a generic phrase; everything else echoes its own display
    /// message, since it was already phrased for the caller.
    pub fn client_message(&self) -> String {
        if self.is_server_error() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        }
    }
}

/// JSON body shape returned for REST-style (non-RPC) error responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code.
    pub code: String,
    /// Caller-safe message (detail withheld for server errors unless admin).
    pub message: String,
    /// Present only when `detail_for_admin` was passed and is server-side.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// When the error occurred.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ErrorResponse {
    /// Builds a response body. `is_admin` controls whether the raw,
    /// non-sanitized message is also attached as `details`.
    pub fn new(error: &ServiceError, is_admin: bool) -> Self {
        let details = if is_admin && error.is_server_error() {
            Some(error.to_string())
        } else {
            None
        };
        Self {
            code: error.error_code().to_string(),
            message: error.client_message(),
            details,
            timestamp: chrono::Utc::now(),
        }
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        ServiceError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        if self.is_server_error() {
            tracing::error!(error = %self, code = self.error_code(), "server error");
        } else {
            tracing::warn!(error = %self, code = self.error_code(), "client error");
        }
        let response = ErrorResponse::new(self, false);
        HttpResponse::build(self.status_code()).json(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_errors_map_to_401() {
        assert_eq!(ServiceError::MissingCredentials.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ServiceError::InvalidCredentials.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn permission_denied_uses_legacy_401() {
        assert_eq!(ServiceError::PermissionDenied.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn blocked_is_403() {
        assert_eq!(ServiceError::Blocked.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn overload_is_503_with_ws_1013() {
        let err = ServiceError::Overloaded { retry_after_secs: 5 };
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.ws_close_code(), 1013);
    }

    #[test]
    fn server_errors_hide_detail_from_non_admins() {
        let err = ServiceError::Internal { message: "disk on fire".into() };
        assert_eq!(err.client_message(), "Internal server error");
        let resp = ErrorResponse::new(&err, false);
        assert!(resp.details.is_none());
        let resp_admin = ErrorResponse::new(&err, true);
        assert!(resp_admin.details.unwrap().contains("disk on fire"));
    }

    #[test]
    fn client_errors_echo_their_own_message() {
        let err = ServiceError::NotFound { resource: "host:abc".into() };
        assert_eq!(err.client_message(), "Not found: host:abc");
    }
}
