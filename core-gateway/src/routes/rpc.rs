//! # JSON-RPC Routes
//!
//! `/rpc` and `/rpc/rpc` (spec §6 carries both paths — the reference
//! implementation mounts the same handler twice for a legacy client base).
//! Accepts single calls and batches, GET (query-string `rpc`) and POST
//! (body), negotiates content-type/compression via `core_dispatch::codec`.

use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use core_auth::AccessRole;
use core_dispatch::backend::CallerPrincipal;
use core_dispatch::codec::{decode_request, encode_response, Compression, ContentType};
use core_shared::ServiceError;
use serde::Deserialize;

use crate::pipeline::context::RequestContext;
use crate::pipeline::error_mapping::http_error_response;
use crate::state::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/rpc", web::post().to(post_rpc))
        .route("/rpc", web::get().to(get_rpc))
        .route("/rpc/rpc", web::post().to(post_rpc))
        .route("/rpc/rpc", web::get().to(get_rpc));
}

#[derive(Deserialize)]
struct RpcQuery {
    rpc: String,
}

async fn get_rpc(req: HttpRequest, state: web::Data<AppState>, query: web::Query<RpcQuery>) -> HttpResponse {
    let body = match serde_json::from_str(&query.rpc) {
        Ok(value) => value,
        Err(e) => return http_error_response(&ServiceError::BadRequest { message: e.to_string() }, false),
    };
    dispatch(req, state, body, ContentType::Json, Compression::None).await
}

async fn post_rpc(req: HttpRequest, state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    let content_type = ContentType::from_header(header_str(&req, "content-type"));
    let content_encoding = Compression::from_content_encoding(header_str(&req, "content-encoding"));

    let parsed = match decode_request(&body, content_type, content_encoding) {
        Ok(value) => value,
        Err(e) => return http_error_response(&e, false),
    };

    dispatch(req, state, parsed, content_type, content_encoding).await
}

async fn dispatch(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: serde_json::Value,
    content_type: ContentType,
    _content_encoding: Compression,
) -> HttpResponse {
    let ctx = req.extensions().get::<RequestContext>().cloned();
    let Some(mut ctx) = ctx else {
        return http_error_response(&ServiceError::Internal { message: "request context missing".into() }, false);
    };

    let basic_auth = header_str(&req, "authorization").and_then(|h| core_auth::parse_basic_auth(Some(h)).ok());
    let mut session = match ctx.session.take() {
        Some(session) => session,
        None => {
            let requested_max_age = header_str(&req, "x-opsi-session-lifetime").and_then(|v| v.parse().ok());
            match state
                .sessions
                .create(&ctx.client_addr.to_string(), header_str(&req, "user-agent"), requested_max_age, now_secs())
                .await
            {
                Ok(session) => session,
                Err(error) => return http_error_response(&error, false),
            }
        }
    };

    let outcome = state.gate.check_access(&mut session, ctx.client_addr, AccessRole::Authenticated, basic_auth).await;
    let is_admin = session.is_admin;

    if let Err(error) = outcome {
        ctx.session = Some(session);
        req.extensions_mut().insert(ctx);
        return http_error_response(&error, is_admin);
    }

    let principal = CallerPrincipal {
        username: session.username.clone(),
        is_admin,
        is_read_only: session.is_read_only,
        user_groups: session.user_groups.clone(),
        host_id: session.host.clone(),
    };

    let client_addr_str = ctx.client_addr.to_string();
    ctx.session = Some(session);
    req.extensions_mut().insert(ctx);
    let user_agent = header_str(&req, "user-agent").map(str::to_string);

    let result = state
        .dispatcher
        .dispatch_body(&body, &principal, &client_addr_str, user_agent.as_deref(), now_ms())
        .await;

    let response_value = match result {
        Ok(value) => value,
        Err(error) => return http_error_response(&error, is_admin),
    };

    let accept_encoding = header_str(&req, "accept-encoding");
    match encode_response(&response_value, content_type, accept_encoding) {
        Ok((bytes, encoding)) => {
            let mut builder = HttpResponse::Ok();
            builder.content_type(content_type.as_header_value());
            if let Some(encoding_header) = encoding.as_header_value() {
                builder.insert_header(("content-encoding", encoding_header));
            }
            builder.body(bytes)
        }
        Err(error) => http_error_response(&error, is_admin),
    }
}

fn header_str<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
