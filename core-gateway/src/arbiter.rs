//! # Arbiter
//!
//! The supervisor process (spec §4.D): owns signal handling (graceful
//! stop, double-signal force-stop, config/log reload on `SIGHUP`), the
//! periodic certificate-validity check, and the periodic Redis memory
//! snapshot. In a full deployment the arbiter forks `process.workers`
//! worker processes and restarts ones that die; here, since there is no
//! multi-process supervision pattern anywhere in the example pack, a
//! worker is the single `actix_web::dev::Server` built by `worker::build`,
//! supervised in-process via its `ServerHandle` — the signal handling
//! below is written from `tokio::signal`'s and actix-web's documented
//! APIs rather than a directly-grounded usage pattern (see `DESIGN.md`).

use std::sync::Arc;
use std::time::Duration;

use core_shared::tracing_config::init_tracing;
use core_shared::{AppConfig, RedisFabric, ServiceResult};
use tokio::signal::unix::{signal, SignalKind};

use crate::worker;

/// Redis memory-use threshold above which the periodic health snapshot
/// logs a warning (spec §4.D: "warn if a key-type uses more than 100MB").
const REDIS_MEMORY_WARN_BYTES: u64 = 100 * 1024 * 1024;

/// Runs the arbiter until a stop signal has been fully handled.
pub async fn run(config: AppConfig) -> ServiceResult<()> {
    let log_fabric = RedisFabric::new(&config.redis).await?;
    let (log_layer, log_consumer) = worker::spawn_log_fabric(&config, log_fabric.clone());
    init_tracing(&config.service_name, config.is_production(), log_layer);
    tracing::info!(service = %config.service_name, "arbiter starting");

    let mut config = Arc::new(config);
    let server = worker::build(config.clone()).await?;
    let handle = server.handle();
    let mut worker_task = tokio::spawn(server);

    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| signal_error("SIGTERM", e))?;
    let mut sigint = signal(SignalKind::interrupt()).map_err(|e| signal_error("SIGINT", e))?;
    let mut sighup = signal(SignalKind::hangup()).map_err(|e| signal_error("SIGHUP", e))?;

    let mut cert_check = tokio::time::interval(Duration::from_secs(config.tls.cert_check_interval_seconds));
    let mut redis_health = tokio::time::interval(Duration::from_secs(60));
    let mut stop_requested = false;

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                stop_requested = handle_stop_signal("sigterm", stop_requested, &handle).await;
            }
            _ = sigint.recv() => {
                stop_requested = handle_stop_signal("sigint", stop_requested, &handle).await;
            }
            _ = sighup.recv() => {
                tracing::info!("sighup received, reloading configuration");
                match AppConfig::from_env() {
                    Ok(reloaded) => {
                        config = Arc::new(reloaded);
                        cert_check = tokio::time::interval(Duration::from_secs(config.tls.cert_check_interval_seconds));
                        tracing::info!("configuration reloaded");
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to reload configuration, keeping previous"),
                }
            }
            _ = cert_check.tick() => check_certificate(&config),
            _ = redis_health.tick() => check_redis_health(&log_fabric).await,
            result = &mut worker_task => {
                match result {
                    Ok(Ok(())) => tracing::info!("worker stopped"),
                    Ok(Err(e)) => tracing::error!(error = %e, "worker exited with an error"),
                    Err(e) => tracing::error!(error = %e, "worker task panicked"),
                }
                break;
            }
        }
    }

    log_consumer.abort();
    Ok(())
}

/// Handles one incoming stop signal. The first asks the server to drain
/// connections gracefully (`stop(true)`); a second, received while the
/// first is still draining, forces an immediate stop (`stop(false)`).
/// Returns the updated `stop_requested` flag.
async fn handle_stop_signal(name: &str, already_stopping: bool, handle: &actix_web::dev::ServerHandle) -> bool {
    if already_stopping {
        tracing::warn!(signal = name, "second stop signal received, forcing shutdown");
        handle.stop(false).await;
    } else {
        tracing::info!(signal = name, "stop signal received, starting graceful shutdown");
        let handle = handle.clone();
        tokio::spawn(async move { handle.stop(true).await });
    }
    true
}

fn signal_error(signal_name: &str, error: std::io::Error) -> core_shared::ServiceError {
    core_shared::ServiceError::Internal { message: format!("failed to install {signal_name} handler: {error}") }
}

/// Logs a warning when the configured certificate is missing. Full X.509
/// expiry parsing is out of scope (no TLS crate is wired into this crate's
/// dependency table) — this only checks the file still exists.
fn check_certificate(config: &AppConfig) {
    let Some(cert_path) = &config.tls.cert_path else { return };
    if !std::path::Path::new(cert_path).exists() {
        tracing::warn!(cert_path, "configured certificate file is missing");
    }
}

async fn check_redis_health(fabric: &RedisFabric) {
    match fabric.redis_info().await {
        Ok(info) if info.used_memory_bytes > REDIS_MEMORY_WARN_BYTES => {
            tracing::warn!(used_memory_bytes = info.used_memory_bytes, "redis memory use above warning threshold");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "redis health check failed"),
    }
}
