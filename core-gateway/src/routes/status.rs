//! # Status and Public Routes
//!
//! `/status/` (plaintext health, spec §6) and `/public/*` (static assets —
//! the favicon/welcome page a browser hitting the bare host expects).

use actix_web::{web, HttpResponse};

use crate::state::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/status/", web::get().to(status)).route("/public/{filename}", web::get().to(public_asset));
}

async fn status(state: web::Data<AppState>) -> HttpResponse {
    match state.fabric.ping().await {
        Ok(()) => HttpResponse::Ok().content_type("text/plain").body("ok"),
        Err(e) => {
            tracing::warn!(error = %e, "status check failed: redis unreachable");
            HttpResponse::ServiceUnavailable().content_type("text/plain").body("redis unreachable")
        }
    }
}

async fn public_asset(path: web::Path<String>) -> HttpResponse {
    // Static assets are out of this crate's scope (no embedded frontend);
    // this exists only so the route itself resolves instead of 404ing on
    // every request, matching the path table in spec §6.
    tracing::debug!(filename = %path.into_inner(), "public asset requested but none are bundled");
    HttpResponse::NotFound().finish()
}
