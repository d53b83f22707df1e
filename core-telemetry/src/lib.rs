//! # Telemetry Pipeline
//!
//! Per-worker metrics collection, Redis-backed time-series storage, the
//! downsampling ladder, and Grafana query-endpoint shaping (spec §4.H).

pub mod collector;
pub mod metric;
pub mod query;
pub mod rollup;

pub use collector::MetricCollector;
pub use metric::{default_metrics, DownsampleTier, Metric};
pub use query::{query_range, DataPoint};
pub use rollup::rollup_tier;
