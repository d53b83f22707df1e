//! # Session Routes
//!
//! `/session/login`, `/session/logout`, `/session/authenticated` (spec §6):
//! the thin REST surface over `core_session`/`core_auth` for clients that
//! want to authenticate once up front rather than on every `/rpc` call.

use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use core_auth::AccessRole;
use serde::Serialize;

use crate::pipeline::context::RequestContext;
use crate::pipeline::error_mapping::http_error_response;
use crate::state::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/session/login", web::get().to(login))
        .route("/session/login", web::post().to(login))
        .route("/session/logout", web::get().to(logout))
        .route("/session/logout", web::post().to(logout))
        .route("/session/authenticated", web::get().to(authenticated));
}

#[derive(Serialize)]
struct LoginResponse {
    session_id: String,
    username: Option<String>,
    is_admin: bool,
}

async fn login(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let Some(mut ctx) = req.extensions().get::<RequestContext>().cloned() else {
        return http_error_response(&core_shared::ServiceError::Internal { message: "request context missing".into() }, false);
    };

    let basic_auth = header_str(&req, "authorization").and_then(|h| core_auth::parse_basic_auth(Some(h)).ok());
    let mut session = match ctx.session.take() {
        Some(session) => session,
        None => {
            let requested_max_age = header_str(&req, "x-opsi-session-lifetime").and_then(|v| v.parse().ok());
            match state
                .sessions
                .create(
                    &ctx.client_addr.to_string(),
                    header_str(&req, "user-agent"),
                    requested_max_age,
                    chrono::Utc::now().timestamp(),
                )
                .await
            {
                Ok(session) => session,
                Err(error) => return http_error_response(&error, false),
            }
        }
    };

    if let Err(error) = state.gate.check_access(&mut session, ctx.client_addr, AccessRole::Authenticated, basic_auth).await {
        ctx.session = Some(session);
        req.extensions_mut().insert(ctx);
        return http_error_response(&error, false);
    }

    let response = LoginResponse {
        session_id: session.session_id.clone(),
        username: session.username.clone(),
        is_admin: session.is_admin,
    };
    ctx.session = Some(session);
    req.extensions_mut().insert(ctx);
    HttpResponse::Ok().json(response)
}

async fn logout(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let Some(mut ctx) = req.extensions().get::<RequestContext>().cloned() else {
        return http_error_response(&core_shared::ServiceError::Internal { message: "request context missing".into() }, false);
    };

    if let Some(mut session) = ctx.session.take() {
        session.mark_deleted();
        if let Err(e) = state.sessions.delete(&session).await {
            tracing::warn!(error = %e, "failed to delete session on logout");
        }
        ctx.session = Some(session);
    }
    req.extensions_mut().insert(ctx);
    HttpResponse::NoContent().finish()
}

#[derive(Serialize)]
struct AuthenticatedResponse {
    authenticated: bool,
    username: Option<String>,
}

async fn authenticated(req: HttpRequest) -> HttpResponse {
    let ctx = req.extensions().get::<RequestContext>().cloned();
    let (authenticated, username) = ctx
        .and_then(|c| c.session)
        .map(|s| (s.authenticated, s.username))
        .unwrap_or((false, None));
    HttpResponse::Ok().json(AuthenticatedResponse { authenticated, username })
}

fn header_str<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}
