//! # Metric Registration
//!
//! `Metric`/downsampling-ladder definitions (spec §4.H), grounded on the
//! `Metric`/`GrafanaPanelConfig` conventions described in
//! `original_source/opsiconfd/statistics.py`. A metric declares its own
//! retention per bucket width; `core-telemetry` flattens that into the set
//! of sorted-set keys the collector writes and the query layer reads.

use std::collections::BTreeMap;
use std::time::Duration;

/// One rung of a metric's downsampling ladder: a bucket width and how long
/// samples at that width are retained before being dropped.
#[derive(Debug, Clone, Copy)]
pub struct DownsampleTier {
    pub bucket: Duration,
    pub retention: Duration,
}

impl DownsampleTier {
    pub const fn new(bucket: Duration, retention: Duration) -> Self {
        Self { bucket, retention }
    }
}

/// A metric's identity and its downsampling ladder. Redis key suffixes are
/// the tier's bucket label (`minute`, `hour`, `day`); the base (unaggregated)
/// series has no suffix.
#[derive(Debug, Clone)]
pub struct Metric {
    /// Stable id, e.g. `worker:avg_rpc_duration`.
    pub id: String,
    /// Label names this metric is keyed by in addition to its id —
    /// `node_name`, `worker_num`, and optionally `client_addr`.
    pub labels: Vec<&'static str>,
    /// Retention of the raw (unaggregated) series.
    pub base_retention: Duration,
    /// Ladder rungs in ascending bucket width, e.g.
    /// `minute→24h, hour→60d, day→4y`.
    pub ladder: Vec<(&'static str, DownsampleTier)>,
}

impl Metric {
    pub fn new(id: impl Into<String>, labels: Vec<&'static str>, base_retention: Duration) -> Self {
        Self { id: id.into(), labels, base_retention, ladder: Vec::new() }
    }

    pub fn with_tier(mut self, name: &'static str, bucket: Duration, retention: Duration) -> Self {
        self.ladder.push((name, DownsampleTier::new(bucket, retention)));
        self
    }

    /// Redis key for this metric's series at a given label set and tier
    /// (`None` = base/unaggregated series).
    pub fn series_key(&self, prefix: &str, label_values: &BTreeMap<&str, String>, tier: Option<&str>) -> String {
        let labels = label_values
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        match tier {
            Some(t) => format!("{prefix}:ts:{}:{{{labels}}}:{t}", self.id),
            None => format!("{prefix}:ts:{}:{{{labels}}}", self.id),
        }
    }

    /// Picks the coarsest tier whose retention still covers
    /// `requested_range`, falling back to the base series when the ladder
    /// is empty or no tier covers the range (the base series always holds
    /// at least `base_retention`).
    pub fn best_tier_for_range(&self, requested_range: Duration) -> Option<&'static str> {
        self.ladder
            .iter()
            .filter(|(_, tier)| tier.retention >= requested_range)
            .min_by_key(|(_, tier)| tier.bucket)
            .map(|(name, _)| *name)
    }
}

/// Builds the two concrete dispatcher metrics the spec names as the
/// worked example of the registration API:
/// `worker:avg_rpc_number` and `worker:avg_rpc_duration`, both on the
/// `minute→24h, hour→60d, day→4y` ladder.
pub fn default_metrics() -> Vec<Metric> {
    let day = Duration::from_secs(86_400);
    vec!["worker:avg_rpc_number", "worker:avg_rpc_duration"]
        .into_iter()
        .map(|id| {
            Metric::new(id, vec!["node_name", "worker_num"], day)
                .with_tier("minute", Duration::from_secs(60), day)
                .with_tier("hour", Duration::from_secs(3_600), day * 60)
                .with_tier("day", day, day * 365 * 4)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_tier_picks_coarsest_sufficient_ladder_rung() {
        let metric = default_metrics().remove(0);
        assert_eq!(metric.best_tier_for_range(Duration::from_secs(3_600 * 12)), Some("minute"));
        assert_eq!(metric.best_tier_for_range(Duration::from_secs(86_400 * 30)), Some("hour"));
    }

    #[test]
    fn series_key_embeds_sorted_labels() {
        let metric = default_metrics().remove(0);
        let mut labels = BTreeMap::new();
        labels.insert("node_name", "node-a".to_string());
        labels.insert("worker_num", "1".to_string());
        let key = metric.series_key("svc", &labels, Some("minute"));
        assert_eq!(key, "svc:ts:worker:avg_rpc_number:{node_name=node-a,worker_num=1}:minute");
    }
}
