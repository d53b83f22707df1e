//! # Grafana Query Route
//!
//! `/metrics/grafana/query` (spec §4.H, §6): the simple-json-datasource
//! style panel query a Grafana dashboard polls, shaped by
//! `core_telemetry::query::query_range`.

use actix_web::{web, HttpRequest, HttpResponse};
use core_auth::AccessRole;
use core_shared::ServiceError;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::pipeline::context::RequestContext;
use crate::pipeline::error_mapping::http_error_response;
use crate::state::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/metrics/grafana/query", web::get().to(query));
}

#[derive(Deserialize)]
struct GrafanaQuery {
    metric: String,
    #[serde(default)]
    node_name: Option<String>,
    #[serde(default)]
    worker_num: Option<String>,
    start_ms: i64,
    end_ms: i64,
    #[serde(default)]
    interval_ms: i64,
    #[serde(default)]
    is_rate_metric: bool,
}

async fn query(req: HttpRequest, state: web::Data<AppState>, params: web::Query<GrafanaQuery>) -> HttpResponse {
    let Some(ctx) = req.extensions().get::<RequestContext>().cloned() else {
        return http_error_response(&ServiceError::Internal { message: "request context missing".into() }, false);
    };
    let Some(mut session) = ctx.session.clone() else {
        return http_error_response(&ServiceError::MissingCredentials, false);
    };
    if let Err(error) =
        state.gate.check_access(&mut session, ctx.client_addr, AccessRole::Admin, None).await
    {
        return http_error_response(&error, false);
    }

    let Some(metric) = state.metrics.find_metric(&params.metric) else {
        return http_error_response(&ServiceError::BadRequest { message: format!("unknown metric: {}", params.metric) }, true);
    };

    let mut labels = BTreeMap::new();
    if let Some(node_name) = &params.node_name {
        labels.insert("node_name", node_name.clone());
    }
    if let Some(worker_num) = &params.worker_num {
        labels.insert("worker_num", worker_num.clone());
    }

    let result = core_telemetry::query_range(
        &state.fabric,
        state.metrics.key_prefix(),
        metric,
        &labels,
        params.start_ms,
        params.end_ms,
        params.interval_ms,
        params.is_rate_metric,
    )
    .await;

    match result {
        Ok(points) => HttpResponse::Ok().json(points),
        Err(error) => http_error_response(&error, true),
    }
}
