//! # Centralized Error Mapping
//!
//! Spec §4.E/§7: every route funnels its `ServiceResult` through one of
//! these two functions rather than each handler building its own error
//! response, so the HTTP-status/close-code/detail-visibility rules in
//! `core_shared::errors::ServiceError` stay the single source of truth.

use actix_web::http::header;
use actix_web::HttpResponse;
use core_shared::errors::ErrorResponse;
use core_shared::ServiceError;

/// Builds the HTTP error response for a REST/JSON-RPC-surface failure.
/// `is_admin` controls whether server-error detail is attached.
pub fn http_error_response(error: &ServiceError, is_admin: bool) -> HttpResponse {
    let mut builder = HttpResponse::build(error.status_code());
    if let ServiceError::MissingCredentials = error {
        builder.insert_header((header::WWW_AUTHENTICATE, "Basic realm=\"opsi\""));
    }
    if let ServiceError::Overloaded { retry_after_secs } = error {
        builder.insert_header((header::RETRY_AFTER, retry_after_secs.to_string()));
    }
    builder.json(ErrorResponse::new(error, is_admin))
}

/// WebSocket close frame for a message-bus-surface failure (spec §4.G.3).
pub fn ws_close_reason(error: &ServiceError) -> actix_ws::CloseReason {
    actix_ws::CloseReason {
        code: actix_ws::CloseCode::Other(error.ws_close_code()),
        description: Some(error.client_message()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credentials_attaches_www_authenticate() {
        let response = http_error_response(&ServiceError::MissingCredentials, false);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
    }

    #[test]
    fn overloaded_attaches_retry_after() {
        let response = http_error_response(&ServiceError::Overloaded { retry_after_secs: 7 }, false);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "7");
    }

    #[test]
    fn ws_close_reason_echoes_the_error_kind() {
        let reason = ws_close_reason(&ServiceError::PermissionDenied);
        assert!(matches!(reason.code, actix_ws::CloseCode::Other(4403)));
    }
}
