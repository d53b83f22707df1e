//! # Grafana Query Endpoint Shaping
//!
//! Answers `/metrics/grafana/query` (spec §4.H), grounded on the query
//! endpoint shape in `original_source/opsiconfd/application/metrics.py`:
//! pick the coarsest downsampling tier whose retention still covers the
//! requested range, re-bucket to the caller's requested interval, and
//! normalize time-relative (rate) metrics by dividing by 5 since raw
//! points are pre-aggregated in 5-second windows.

use crate::metric::Metric;
use core_shared::{RedisFabric, ServiceResult};
use std::collections::BTreeMap;

/// One point in a Grafana time-series response: milliseconds since epoch
/// and the bucketed value.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct DataPoint {
    pub timestamp_ms: i64,
    pub value: f64,
}

/// Raw request counters are pre-aggregated into 5-second windows before
/// ever reaching a series; dividing by this normalizes them to per-second
/// rates for display.
const RATE_WINDOW_SECS: f64 = 5.0;

/// Executes a Grafana panel query against `metric`'s series.
pub async fn query_range(
    fabric: &RedisFabric,
    key_prefix: &str,
    metric: &Metric,
    labels: &BTreeMap<&'static str, String>,
    start_ms: i64,
    end_ms: i64,
    interval_ms: i64,
    is_rate_metric: bool,
) -> ServiceResult<Vec<DataPoint>> {
    let requested_range = std::time::Duration::from_millis((end_ms - start_ms).max(0) as u64);
    let tier = metric.best_tier_for_range(requested_range);
    let key = metric.series_key(key_prefix, labels, tier);

    let samples = fabric.ts_range(&key, start_ms, end_ms).await?;
    Ok(bucket_and_normalize(&samples, start_ms, interval_ms, is_rate_metric))
}

fn bucket_and_normalize(samples: &[(i64, f64)], start_ms: i64, interval_ms: i64, is_rate_metric: bool) -> Vec<DataPoint> {
    if interval_ms <= 0 || samples.is_empty() {
        return samples
            .iter()
            .map(|(ts, v)| DataPoint { timestamp_ms: *ts, value: normalize(*v, is_rate_metric) })
            .collect();
    }

    let mut buckets: BTreeMap<i64, (f64, usize)> = BTreeMap::new();
    for (ts, value) in samples {
        let bucket = start_ms + ((ts - start_ms) / interval_ms) * interval_ms;
        let entry = buckets.entry(bucket).or_insert((0.0, 0));
        entry.0 += value;
        entry.1 += 1;
    }

    buckets
        .into_iter()
        .map(|(bucket, (sum, count))| DataPoint {
            timestamp_ms: bucket,
            value: normalize(sum / count as f64, is_rate_metric),
        })
        .collect()
}

fn normalize(value: f64, is_rate_metric: bool) -> f64 {
    if is_rate_metric {
        value / RATE_WINDOW_SECS
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_metrics_are_divided_by_the_preaggregation_window() {
        let points = bucket_and_normalize(&[(0, 10.0)], 0, 1_000, true);
        assert_eq!(points[0].value, 2.0);
    }

    #[test]
    fn samples_within_the_same_interval_are_averaged() {
        let points = bucket_and_normalize(&[(0, 2.0), (500, 4.0)], 0, 1_000, false);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 3.0);
    }
}
