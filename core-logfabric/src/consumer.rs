//! # Log Stream Consumer
//!
//! Drains the `mpsc::Receiver<LogRecord>` produced by
//! `core_shared::tracing_config::redis_log_layer`, forwarding each record
//! to the central Redis stream (`log:<node>`) and, when a client address is
//! attached, to that client's rotating file (spec §4.I). Runs in the
//! arbiter, or standalone under the `log-viewer` CLI subcommand.

use crate::file_writer::FileLogWriter;
use core_shared::tracing_config::LogRecord;
use core_shared::{RedisFabric, ServiceResult};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

/// Cap applied to the central log stream via `XADD ... MAXLEN ~`.
pub const LOG_STREAM_MAXLEN: usize = 50_000;

/// How often idle per-client file handles are swept, independent of the
/// per-handle idle window itself.
const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

fn render_line(record: &LogRecord) -> String {
    format!(
        "{} {:>5} {} {}{}",
        record.timestamp.to_rfc3339(),
        record.level,
        record.target,
        record.message,
        if record.fields.as_object().is_some_and(|m| !m.is_empty()) {
            format!(" {}", record.fields)
        } else {
            String::new()
        }
    )
}

/// Consumes `receiver` until the channel closes (process shutdown),
/// fanning each record out to Redis and, when tagged with a client
/// address, to that client's rotating file.
pub async fn run_log_consumer(
    mut receiver: mpsc::Receiver<LogRecord>,
    fabric: RedisFabric,
    node_name: String,
    mut files: FileLogWriter,
) -> ServiceResult<()> {
    let stream_key = fabric.key(&format!("log:{node_name}"));
    let mut eviction_ticker = tokio::time::interval(EVICTION_INTERVAL);

    loop {
        tokio::select! {
            record = receiver.recv() => {
                let Some(record) = record else { break };
                if let Err(e) = forward_to_redis(&fabric, &stream_key, &record).await {
                    warn!(error = %e, "failed to append log record to redis stream");
                }
                if let Some(client) = &record.client_address {
                    if let Err(e) = files.write_line(client, &render_line(&record)) {
                        warn!(client, error = %e, "failed to write client log file");
                    }
                }
            }
            _ = eviction_ticker.tick() => {
                files.evict_idle();
            }
        }
    }
    Ok(())
}

async fn forward_to_redis(fabric: &RedisFabric, stream_key: &str, record: &LogRecord) -> ServiceResult<()> {
    let payload = rmp_serde::to_vec_named(record)
        .map_err(|e| core_shared::ServiceError::Internal { message: format!("failed to encode log record: {e}") })?;
    fabric.xadd(stream_key, &[("record", payload)], Some(LOG_STREAM_MAXLEN)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_line_includes_message_and_level() {
        let record = LogRecord {
            timestamp: chrono::Utc::now(),
            level: "INFO".into(),
            target: "core_bus".into(),
            message: "session opened".into(),
            fields: serde_json::json!({}),
            client_address: Some("10.0.0.1".into()),
        };
        let line = render_line(&record);
        assert!(line.contains("INFO"));
        assert!(line.contains("session opened"));
    }
}
