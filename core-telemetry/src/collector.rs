//! # Per-Worker Metrics Collector
//!
//! Buffers observations in memory and flushes to Redis once a second
//! (spec §4.H), grounded on the collector described in
//! `original_source/opsiconfd/statistics.py`. Each worker process owns one
//! `MetricCollector`; labels (`node_name`, `worker_num`, `client_addr?`)
//! are attached at observation time, not registration time, since they
//! vary per request.

use crate::metric::Metric;
use core_shared::{RedisFabric, ServiceResult};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
struct Observation {
    metric_id: String,
    labels: BTreeMap<&'static str, String>,
    value: f64,
    timestamp_ms: i64,
}

/// Buffers samples recorded via [`MetricCollector::observe`] and flushes
/// them to Redis on a fixed interval. `Send + Sync`; one instance is
/// shared across a worker's async tasks.
pub struct MetricCollector {
    metrics: Vec<Metric>,
    buffer: Mutex<Vec<Observation>>,
    key_prefix: String,
}

impl MetricCollector {
    pub fn new(metrics: Vec<Metric>, key_prefix: impl Into<String>) -> Self {
        Self { metrics, buffer: Mutex::new(Vec::new()), key_prefix: key_prefix.into() }
    }

    /// Records one observation, buffered until the next flush.
    pub fn observe(&self, metric_id: &str, labels: BTreeMap<&'static str, String>, value: f64, now_ms: i64) {
        self.buffer.lock().unwrap().push(Observation {
            metric_id: metric_id.to_string(),
            labels,
            value,
            timestamp_ms: now_ms,
        });
    }

    fn metric(&self, id: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.id == id)
    }

    /// Looks up a registered metric by id, for the Grafana query endpoint.
    pub fn find_metric(&self, id: &str) -> Option<&Metric> {
        self.metric(id)
    }

    /// All registered metrics, for the rollup-ladder maintenance task.
    pub fn registered_metrics(&self) -> &[Metric] {
        &self.metrics
    }

    /// Key prefix this collector's series are written under.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Drains the buffer and writes each observation to its base series.
    /// Called on a 1-second tick by the collector's owning task.
    pub async fn flush(&self, fabric: &RedisFabric) -> ServiceResult<()> {
        let drained: Vec<Observation> = std::mem::take(&mut *self.buffer.lock().unwrap());
        if drained.is_empty() {
            return Ok(());
        }
        debug!(count = drained.len(), "flushing telemetry buffer");
        for obs in drained {
            let Some(metric) = self.metric(&obs.metric_id) else { continue };
            let key = metric.series_key(&self.key_prefix, &obs.labels, None);
            let retention_ms = metric.base_retention.as_millis() as i64;
            fabric.ts_add(&key, obs.timestamp_ms, obs.value, retention_ms).await?;
        }
        Ok(())
    }

    /// Runs `flush` on a one-second interval until cancelled. Intended to
    /// be spawned once per worker alongside the arbiter's other
    /// background tasks.
    pub async fn run_flush_loop(&self, fabric: &RedisFabric) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            if let Err(e) = self.flush(fabric).await {
                tracing::warn!(error = %e, "telemetry flush failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::default_metrics;

    #[test]
    fn observations_buffer_until_flushed() {
        let collector = MetricCollector::new(default_metrics(), "svc");
        let mut labels = BTreeMap::new();
        labels.insert("node_name", "n1".to_string());
        collector.observe("worker:avg_rpc_number", labels, 3.0, 1_000);
        assert_eq!(collector.buffer.lock().unwrap().len(), 1);
    }
}
