//! # Downsampling Ladder Maintenance
//!
//! Without a native `TS.CREATERULE`, each ladder rung is kept current by a
//! periodic rollup: average the base series over the completed bucket and
//! write one point per bucket into the tier's series. Grounded on the
//! ladder description in spec §4.H (`minute→24h, hour→60d, day→4y`).

use crate::metric::Metric;
use core_shared::{RedisFabric, ServiceResult};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

/// Averages the base series over the most recently completed bucket for
/// every ladder tier and writes the aggregate into that tier's series.
/// Called once per metric per label-set on each tier's own bucket
/// interval (e.g. the `minute` tier's rollup runs once a minute).
pub async fn rollup_tier(
    fabric: &RedisFabric,
    key_prefix: &str,
    metric: &Metric,
    labels: &BTreeMap<&'static str, String>,
    tier_name: &str,
    bucket: Duration,
    now_ms: i64,
) -> ServiceResult<()> {
    let bucket_ms = bucket.as_millis() as i64;
    let bucket_start = (now_ms / bucket_ms - 1) * bucket_ms;
    let bucket_end = bucket_start + bucket_ms - 1;

    let base_key = metric.series_key(key_prefix, labels, None);
    let samples = fabric.ts_range(&base_key, bucket_start, bucket_end).await?;
    if samples.is_empty() {
        return Ok(());
    }

    let average = samples.iter().map(|(_, v)| v).sum::<f64>() / samples.len() as f64;
    let tier_key = metric.series_key(key_prefix, labels, Some(tier_name));
    let Some((_, tier)) = metric.ladder.iter().find(|(name, _)| *name == tier_name) else {
        warn!(tier = tier_name, metric = %metric.id, "rollup requested for unknown tier");
        return Ok(());
    };
    fabric
        .ts_add(&tier_key, bucket_start, average, tier.retention.as_millis() as i64)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::default_metrics;

    #[test]
    fn bucket_boundaries_align_to_bucket_width() {
        let bucket_ms = Duration::from_secs(60).as_millis() as i64;
        let now_ms: i64 = 123_456_789;
        let bucket_start = (now_ms / bucket_ms - 1) * bucket_ms;
        assert_eq!(bucket_start % bucket_ms, 0);
        assert!(bucket_start < now_ms);
    }

    #[test]
    fn default_metrics_carry_a_minute_tier() {
        let metric = default_metrics().remove(0);
        assert!(metric.ladder.iter().any(|(name, _)| *name == "minute"));
    }
}
