//! # Session / Context / Overload Middleware
//!
//! Runs once per request, ahead of every route handler (spec §4.E):
//!
//! 1. Overload shedding — a 503 (or, for a WebSocket upgrade, a refused
//!    upgrade) for any non-exempt address while `OverloadState` is active.
//! 2. Client-address resolution, attached to the request as a
//!    [`RequestContext`].
//! 3. Session resolution from the configured cookie, attached to the same
//!    context. Route handlers call `core_auth::AccessGate::check_access`
//!    themselves with the role their endpoint requires — the role isn't
//!    known generically at this layer, only the path-specific handler
//!    knows it.
//! 4. On the way out: `Set-Cookie`, `X-Request-Id`, and `Server-Timing`
//!    response headers, and persisting the session if a handler mutated it.
//!
//! Written against `actix_web::middleware::from_fn` (stabilized in
//! actix-web 4.3); there is no custom `Transform`/`Service` middleware
//! anywhere in the example pack to crib a pattern from.

use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::middleware::Next;
use actix_web::{Error, HttpMessage};
use chrono::Utc;

use crate::pipeline::client_addr::{resolve_from_connection_info, TrustedProxies};
use crate::pipeline::context::RequestContext;
use crate::pipeline::error_mapping::http_error_response;
use crate::state::AppState;

/// `actix_web::middleware::from_fn` entry point. Registered once per worker
/// in `App::new().wrap(from_fn(session_stage))`.
pub async fn session_stage(
    mut req: ServiceRequest,
    next: Next<impl MessageBody + 'static>,
) -> Result<ServiceResponse<actix_web::body::BoxBody>, Error> {
    let state = req
        .app_data::<actix_web::web::Data<AppState>>()
        .expect("AppState missing")
        .clone();

    let trusted_proxies = TrustedProxies::new(&state.config.network.trusted_proxies);
    let client_addr = resolve_from_connection_info(&req.connection_info(), &trusted_proxies)
        .unwrap_or_else(|| "0.0.0.0".parse().unwrap());

    if let Some(retry_after) = state.overload.retry_after_secs() {
        if !crate::overload::is_overload_exempt(client_addr) {
            let error = core_shared::ServiceError::Overloaded { retry_after_secs: retry_after };
            let response = http_error_response(&error, false).map_into_boxed_body();
            return Ok(req.into_response(response));
        }
    }

    let mut ctx = RequestContext::new(client_addr);

    let cookie_name = state.sessions.cookie_name().to_string();
    if let Some(cookie) = req.cookie(&cookie_name) {
        let now = Utc::now().timestamp();
        if let Ok(Some(mut session)) = state.sessions.load(cookie.value(), &client_addr.to_string(), now).await {
            ctx.session_version = Some(session.version.to_string());
            session.touch(now);
            ctx.session = Some(session);
        }
    }

    let request_id = ctx.request_id;
    req.extensions_mut().insert(ctx);

    let mut response = next.call(req).await?;

    let extensions = response.request().extensions();
    let ctx = extensions.get::<RequestContext>().cloned();
    drop(extensions);

    if let Some(ctx) = ctx {
        let headers = response.headers_mut();
        headers.insert(
            HeaderName::from_static("x-request-id"),
            HeaderValue::from_str(&request_id.to_string()).unwrap(),
        );
        if let Ok(value) = HeaderValue::from_str(&ctx.server_timing_header()) {
            headers.insert(HeaderName::from_static("server-timing"), value);
        }
        if let Some(session) = &ctx.session {
            if let Some(cookie_value) = session.set_cookie_header(&cookie_name) {
                if let Ok(value) = HeaderValue::from_str(&cookie_value) {
                    headers.insert(actix_web::http::header::SET_COOKIE, value);
                }
            }
            if let Err(e) = state.sessions.store(session, ctx.session_version.as_deref()).await {
                tracing::warn!(error = %e, "failed to persist session after request");
            }
        }
    }

    Ok(response.map_into_boxed_body())
}
