//! # Request Context
//!
//! Spec §9's explicit design note: rather than threading per-request state
//! through task-local storage (the reference implementation's contextvars
//! model), every pipeline stage reads and writes one plain struct carried
//! through `actix_web::HttpMessage` extensions. Easier to test, and every
//! dependency is visible at the call site instead of implicit.

use core_session::Session;
use std::net::IpAddr;
use std::time::Instant;
use uuid::Uuid;

/// Per-request bookkeeping threaded through the middleware stack and into
/// route handlers via `HttpRequest::extensions()`.
#[derive(Clone)]
pub struct RequestContext {
    /// Correlation id, generated once per request and echoed back as
    /// `X-Request-Id`.
    pub request_id: Uuid,

    /// The caller's real address, resolved from `X-Forwarded-For` only when
    /// the immediate peer is a configured trusted proxy.
    pub client_addr: IpAddr,

    /// Loaded/created session, attached once the session-resolution stage
    /// runs. `None` only before that stage executes.
    pub session: Option<Session>,

    /// The session's version token at load time, needed by
    /// `SessionManager::store`'s optimistic-concurrency check.
    pub session_version: Option<String>,

    /// When request handling began, for the `Server-Timing` response header.
    pub started_at: Instant,
}

impl RequestContext {
    pub fn new(client_addr: IpAddr) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            client_addr,
            session: None,
            session_version: None,
            started_at: Instant::now(),
        }
    }

    /// Value for the `Server-Timing` response header.
    pub fn server_timing_header(&self) -> String {
        format!("total;dur={:.2}", self.started_at.elapsed().as_secs_f64() * 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_timing_header_reports_milliseconds() {
        let ctx = RequestContext::new("127.0.0.1".parse().unwrap());
        let header = ctx.server_timing_header();
        assert!(header.starts_with("total;dur="));
    }
}
