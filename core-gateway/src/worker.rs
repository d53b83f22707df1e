//! # Worker Process
//!
//! One worker hosts the actix-web `HttpServer` plus the background tasks
//! scoped to its own `AppState` (telemetry flush, message-bus reader
//! bookkeeping lives per-connection in `routes::messagebus`). The arbiter
//! spawns `process.workers` of these as separate OS processes in a full
//! deployment; here, since there is no multi-process supervision pattern
//! anywhere in the example pack to crib from, a worker is instead the
//! single `actix_web::dev::Server` `build` hands back, supervised in-process
//! by the arbiter via its `ServerHandle` — see `DESIGN.md`.

use std::sync::Arc;

use actix_web::{middleware, web, App, HttpServer};
use core_shared::tracing_config::redis_log_layer;
use core_shared::{AppConfig, ServiceResult};
use tokio::sync::mpsc;

use crate::pipeline::session_stage::session_stage;
use crate::routes::configure_routes;
use crate::state::AppState;

/// Builds one worker's `AppState`, starts its background telemetry flush
/// task, and returns the bound-but-not-yet-run `actix_web::dev::Server`.
/// Returning the server itself (rather than awaiting it here) lets the
/// arbiter hold a `ServerHandle` for graceful/immediate shutdown.
pub async fn build(config: Arc<AppConfig>) -> ServiceResult<actix_web::dev::Server> {
    let state = AppState::new((*config).clone()).await?;
    let state_data = web::Data::new(state.clone());

    let metrics = state.metrics.clone();
    let fabric_for_flush = state.fabric.clone();
    tokio::spawn(async move {
        metrics.run_flush_loop(&fabric_for_flush).await;
    });

    spawn_rollup_loops(&state, config.as_ref());

    let bind_address = format!("{}:{}", config.network.host, config.network.port);
    tracing::info!(address = %bind_address, "starting worker http server");

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state_data.clone())
            .wrap(actix_web::middleware::from_fn(session_stage))
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .configure(configure_routes)
    })
    .bind(&bind_address)
    .map_err(|e| core_shared::ServiceError::Internal { message: format!("failed to bind {bind_address}: {e}") })?
    .run();

    Ok(server)
}

/// Spawns one periodic task per downsampling-ladder tier per registered
/// metric, each firing on its own tier's bucket width, analogous to the
/// flush loop above. A single-worker deployment has one label-set per
/// metric (this process's own `node_name`/`worker_num`), so that's the
/// only series each rollup maintains.
fn spawn_rollup_loops(state: &AppState, config: &AppConfig) {
    let node_name = config.service_name.clone();
    for metric in state.metrics.registered_metrics().to_vec() {
        for (tier_name, tier) in metric.ladder.clone() {
            let fabric = state.fabric.clone();
            let key_prefix = config.redis.key_prefix.clone();
            let node_name = node_name.clone();
            let metric = metric.clone();
            tokio::spawn(async move {
                let mut labels = std::collections::BTreeMap::new();
                labels.insert("node_name", node_name.clone());
                labels.insert("worker_num", "0".to_string());
                let mut ticker = tokio::time::interval(tier.bucket);
                loop {
                    ticker.tick().await;
                    let now_ms = chrono::Utc::now().timestamp_millis();
                    if let Err(error) =
                        core_telemetry::rollup_tier(&fabric, &key_prefix, &metric, &labels, tier_name, tier.bucket, now_ms).await
                    {
                        tracing::warn!(%error, metric = %metric.id, tier = tier_name, "rollup tick failed");
                    }
                }
            });
        }
    }
}

/// Builds the log-fabric consumer task for this worker: a `RedisLogLayer`
/// feeding `core-logfabric::run_log_consumer`, which fans records out to
/// the central Redis stream and per-client rotating files. Returns the
/// layer for `init_tracing` and the join handle for the consumer task.
pub fn spawn_log_fabric(
    config: &AppConfig,
    fabric: core_shared::RedisFabric,
) -> (core_shared::tracing_config::RedisLogLayer, tokio::task::JoinHandle<()>) {
    let (layer, receiver) = redis_log_layer(1024);
    let log_dir = std::path::PathBuf::from(&config.logging.log_directory);
    let files = core_logfabric::FileLogWriter::new(log_dir, 10 * 1024 * 1024, 5, std::time::Duration::from_secs(600));
    let node_name = config.service_name.clone();

    let handle = tokio::spawn(run_log_fabric(receiver, fabric, node_name, files));
    (layer, handle)
}

async fn run_log_fabric(
    receiver: mpsc::Receiver<core_shared::tracing_config::LogRecord>,
    fabric: core_shared::RedisFabric,
    node_name: String,
    files: core_logfabric::FileLogWriter,
) {
    if let Err(e) = core_logfabric::run_log_consumer(receiver, fabric, node_name, files).await {
        tracing::error!(error = %e, "log fabric consumer exited");
    }
}
