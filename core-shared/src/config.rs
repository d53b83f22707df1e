//! # Application Configuration
//!
//! Centralized configuration management using environment variables.
//!
//! ## How It Works
//!
//! Configuration is loaded from multiple sources in order of precedence:
//!
//! 1. **Default values** - Sensible defaults for development
//! 2. **`.env` file** - Local overrides (git-ignored)
//! 3. **Environment variables** - Docker/K8s configuration
//!
//! ## Environment Variable Format
//!
//! Variables use the `APP_` prefix with `__` as nested separator:
//!
//! ```bash
//! APP_NETWORK__HOST=0.0.0.0
//! APP_NETWORK__PORT=4447
//!
//! APP_REDIS__URL=redis://localhost:6379/0
//! # or simply:
//! REDIS_URL=redis://localhost:6379/0
//!
//! APP_SESSION__MAX_AGE_SECONDS=120
//! ```
//!
//! ## Configuration Sections
//!
//! | Section | Purpose |
//! |---------|---------|
//! | `process` | Worker/arbiter process model (worker count, restart policy) |
//! | `network` | HTTP/WS bind address, trusted proxies |
//! | `tls` | Server certificate paths, cert re-check interval |
//! | `session` | Session TTL bounds, per-IP cap, cookie name |
//! | `redis` | Redis connection and keyspace prefix |
//! | `dispatcher` | JSON-RPC cache TTLs, RPC list cap |
//! | `bus` | Message bus stream retention, consumer group defaults |
//! | `telemetry` | Metrics flush interval, downsampling ladder |
//! | `logging` | Log level, log directory, Redis log stream name |
//!
//! There is no `database`/`jwt` section: the relational backend and
//! JWT-based auth are out of this repository's scope (see `DESIGN.md`).

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

/// Main application configuration, constructed once at startup and shared
/// via `Arc` across the worker tasks.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Service name used in logs and the Grafana datasource label.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Runtime environment (development/staging/production).
    #[serde(default)]
    pub environment: AppEnvironment,

    /// Worker/arbiter process model.
    pub process: ProcessConfig,

    /// HTTP/WS network binding.
    pub network: NetworkConfig,

    /// Server TLS.
    pub tls: TlsConfig,

    /// Session manager tuning.
    pub session: SessionConfig,

    /// Redis connection and keyspace.
    pub redis: RedisConfig,

    /// Authentication and brute-force protection tuning.
    pub auth: AuthConfig,

    /// JSON-RPC dispatcher tuning.
    pub dispatcher: DispatcherConfig,

    /// Message bus tuning.
    pub bus: BusConfig,

    /// Telemetry pipeline tuning.
    pub telemetry: TelemetryConfig,

    /// Logging/tracing configuration.
    pub logging: LoggingConfig,
}

/// Worker/arbiter process model (spec §4.D).
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessConfig {
    /// Number of worker tasks the arbiter supervises.
    /// `0` means auto-detect based on CPU cores.
    #[serde(default)]
    pub workers: usize,

    /// Grace period given to a worker after SIGTERM before SIGKILL-equivalent
    /// force-stop, in seconds.
    #[serde(default = "default_graceful_shutdown_seconds")]
    pub graceful_shutdown_seconds: u64,

    /// Interval, in seconds, between worker memory-trim passes.
    #[serde(default = "default_memory_trim_interval_seconds")]
    pub memory_trim_interval_seconds: u64,

    /// RSS threshold in megabytes above which a worker is recycled.
    #[serde(default = "default_max_worker_rss_mb")]
    pub max_worker_rss_mb: u64,
}

/// HTTP/WS network binding (spec §4.E).
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// IP address to bind to. Default: `0.0.0.0`.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Proxy addresses/CIDRs trusted to set `X-Forwarded-For`.
    #[serde(default)]
    pub trusted_proxies: Vec<String>,

    /// General network allow-list; empty means no restriction. Distinct
    /// from `trusted_proxies`, which only governs `X-Forwarded-For` trust.
    #[serde(default)]
    pub networks: Vec<String>,

    /// CIDRs allowed unrestricted access regardless of session role.
    #[serde(default)]
    pub admin_networks: Vec<String>,
}

/// Server TLS configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    /// Path to the server certificate (PEM).
    pub cert_path: Option<String>,

    /// Path to the server private key (PEM).
    pub key_path: Option<String>,

    /// Interval, in seconds, between certificate validity re-checks.
    #[serde(default = "default_cert_check_interval_seconds")]
    pub cert_check_interval_seconds: u64,
}

/// Session manager tuning (spec §4.B).
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Cookie name used for the session id.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Minimum accepted `max_age`, in seconds. Spec clamps to `[1, 86400]`.
    #[serde(default = "default_session_min_age")]
    pub min_age_seconds: u64,

    /// Maximum accepted `max_age`, in seconds.
    #[serde(default = "default_session_max_age")]
    pub max_age_seconds: u64,

    /// Maximum concurrent sessions allowed per source IP.
    #[serde(default = "default_max_sessions_per_ip")]
    pub max_sessions_per_ip: u32,
}

impl SessionConfig {
    /// Clamps a client-requested session lifetime to `[min_age, max_age]`.
    pub fn clamp_max_age(&self, requested_seconds: u64) -> u64 {
        requested_seconds.clamp(self.min_age_seconds, self.max_age_seconds)
    }
}

/// Redis connection and keyspace configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL. Format: `redis://[:password@]host:port[/db]`.
    pub url: String,

    /// Prefix prepended to every key this service writes.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Blocking-pool size used by CLI subcommands.
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: u32,
}

/// Authentication and brute-force protection tuning (spec §4.C), constants
/// recovered from `original_source/opsiconfd/session.py::check_blocked`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Realm sent in the `WWW-Authenticate` header on a 401.
    #[serde(default = "default_basic_auth_realm")]
    pub basic_auth_realm: String,

    /// Failed-auth attempts within `failures_interval_seconds` before a
    /// client address is blocked. Source: `max_auth_failures`.
    #[serde(default = "default_max_auth_failures")]
    pub max_auth_failures: u32,

    /// Rolling window, in seconds, the failure count is evaluated over.
    /// Source: `auth_failures_interval`.
    #[serde(default = "default_auth_failures_interval_seconds")]
    pub failures_interval_seconds: u64,

    /// How long, in seconds, a blocked client address stays blocked.
    /// Source: `client_block_time`.
    #[serde(default = "default_client_block_seconds")]
    pub client_block_seconds: u64,

    /// Username treated as the dedicated monitoring account: authenticates
    /// normally but is forced non-admin/read-only regardless of group
    /// membership. Source: `config.monitoring_user`.
    pub monitoring_user: Option<String>,
}

/// JSON-RPC dispatcher tuning (spec §4.F), constants recovered from
/// `original_source/opsiconfd/application/jsonrpc.py`.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    /// TTL, in seconds, for cached product-ordering results. Source: `EXPIRE`.
    #[serde(default = "default_cache_expire_seconds")]
    pub cache_expire_seconds: u64,

    /// TTL, in seconds, for the "uptodate" marker on cached results.
    /// Source: `EXPIRE_UPTODATE`.
    #[serde(default = "default_cache_expire_seconds")]
    pub cache_expire_uptodate_seconds: u64,

    /// Minimum call duration, in milliseconds, before a method result
    /// becomes a caching candidate. Source: `CALL_TIME_TO_CACHE` (0.5s).
    #[serde(default = "default_call_time_to_cache_ms")]
    pub call_time_to_cache_ms: u64,

    /// Maximum number of calls accepted in a single JSON-RPC batch.
    #[serde(default = "default_rpc_list_cap")]
    pub rpc_list_cap: usize,
}

/// Message bus tuning (spec §4.G).
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    /// Maximum stream length retained per channel (approximate, `MAXLEN ~`).
    #[serde(default = "default_stream_max_len")]
    pub stream_max_len: usize,

    /// Block duration, in milliseconds, for a single `XREAD`/`XREADGROUP` poll.
    #[serde(default = "default_read_block_ms")]
    pub read_block_ms: u64,
}

/// Telemetry pipeline tuning (spec §4.H).
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// How often, in seconds, buffered metrics are flushed to Redis.
    #[serde(default = "default_flush_interval_seconds")]
    pub flush_interval_seconds: u64,
}

/// Logging/tracing configuration (spec §4.I).
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, e.g. `"info"`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `true` emits JSON logs (production); `false` emits human-readable.
    #[serde(default)]
    pub json: bool,

    /// Directory holding per-client rotating log files.
    #[serde(default = "default_log_directory")]
    pub log_directory: String,

    /// Name of the central Redis log stream.
    #[serde(default = "default_log_stream_name")]
    pub redis_stream_name: String,

    /// Age, in days, after which per-client log files are purged.
    #[serde(default = "default_log_purge_days")]
    pub purge_after_days: u32,
}

/// Application runtime environment. Affects logging format and defaults.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppEnvironment {
    /// Local development - verbose logging, relaxed security.
    #[default]
    Development,
    /// Pre-production testing.
    Staging,
    /// Production - JSON logging, strict security.
    Production,
}

impl AppConfig {
    /// Loads configuration from environment variables.
    ///
    /// 1. Loads `.env` if present (silently ignored if missing).
    /// 2. Applies defaults.
    /// 3. Overrides with `APP_*` variables.
    /// 4. Applies Docker-compatible unprefixed overrides (`REDIS_URL`).
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let config = Config::builder()
            .set_default("service_name", "opsi-core-svc")?
            .set_default("environment", "development")?
            .set_default("process.workers", 0)?
            .set_default("process.graceful_shutdown_seconds", 30)?
            .set_default("process.memory_trim_interval_seconds", 120)?
            .set_default("process.max_worker_rss_mb", 2048)?
            .set_default("network.host", "0.0.0.0")?
            .set_default("network.port", 4447)?
            .set_default("network.trusted_proxies", Vec::<String>::new())?
            .set_default("network.networks", Vec::<String>::new())?
            .set_default("network.admin_networks", Vec::<String>::new())?
            .set_default("tls.cert_check_interval_seconds", 3600)?
            .set_default("session.cookie_name", "opsi-session")?
            .set_default("session.min_age_seconds", 1)?
            .set_default("session.max_age_seconds", 86400)?
            .set_default("session.max_sessions_per_ip", 25)?
            .set_default("redis.key_prefix", "opsicore")?
            .set_default("redis.pool_size", 10)?
            .set_default("auth.basic_auth_realm", "opsi")?
            .set_default("auth.max_auth_failures", 10)?
            .set_default("auth.failures_interval_seconds", 120)?
            .set_default("auth.client_block_seconds", 120)?
            .set_default("dispatcher.cache_expire_seconds", 86400)?
            .set_default("dispatcher.cache_expire_uptodate_seconds", 86400)?
            .set_default("dispatcher.call_time_to_cache_ms", 500)?
            .set_default("dispatcher.rpc_list_cap", 9999)?
            .set_default("bus.stream_max_len", 10_000)?
            .set_default("bus.read_block_ms", 1_000)?
            .set_default("telemetry.flush_interval_seconds", 1)?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("logging.log_directory", "/var/log/opsi-core-svc")?
            .set_default("logging.redis_stream_name", "opsicore:log")?
            .set_default("logging.purge_after_days", 30)?
            .add_source(Environment::with_prefix("APP").separator("__").try_parsing(true))
            .set_override_option("redis.url", std::env::var("REDIS_URL").ok())?
            .set_override_option("service_name", std::env::var("SERVICE_NAME").ok())?
            .build()?;

        config.try_deserialize()
    }

    /// `true` when running in development mode.
    #[inline]
    pub fn is_development(&self) -> bool {
        self.environment == AppEnvironment::Development
    }

    /// `true` when running in production mode.
    #[inline]
    pub fn is_production(&self) -> bool {
        self.environment == AppEnvironment::Production
    }

    /// Clamps a client-requested session `max_age` to the configured bounds
    /// (spec default: `[1, 86400]` seconds).
    pub fn clamp_session_max_age(&self, requested_seconds: u64) -> u64 {
        requested_seconds.clamp(self.session.min_age_seconds, self.session.max_age_seconds)
    }
}

fn default_service_name() -> String {
    "opsi-core-svc".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    4447
}
fn default_graceful_shutdown_seconds() -> u64 {
    30
}
fn default_memory_trim_interval_seconds() -> u64 {
    120
}
fn default_max_worker_rss_mb() -> u64 {
    2048
}
fn default_cert_check_interval_seconds() -> u64 {
    3600
}
fn default_cookie_name() -> String {
    "opsi-session".to_string()
}
fn default_session_min_age() -> u64 {
    1
}
fn default_session_max_age() -> u64 {
    86400
}
fn default_max_sessions_per_ip() -> u32 {
    25
}
fn default_key_prefix() -> String {
    "opsicore".to_string()
}
fn default_redis_pool_size() -> u32 {
    10
}
fn default_basic_auth_realm() -> String {
    "opsi".to_string()
}
fn default_max_auth_failures() -> u32 {
    10
}
fn default_auth_failures_interval_seconds() -> u64 {
    120
}
fn default_client_block_seconds() -> u64 {
    120
}
fn default_cache_expire_seconds() -> u64 {
    86400
}
fn default_call_time_to_cache_ms() -> u64 {
    500
}
fn default_rpc_list_cap() -> usize {
    9999
}
fn default_stream_max_len() -> usize {
    10_000
}
fn default_read_block_ms() -> u64 {
    1_000
}
fn default_flush_interval_seconds() -> u64 {
    1
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_directory() -> String {
    "/var/log/opsi-core-svc".to_string()
}
fn default_log_stream_name() -> String {
    "opsicore:log".to_string()
}
fn default_log_purge_days() -> u32 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_environment_is_development() {
        assert_eq!(AppEnvironment::default(), AppEnvironment::Development);
    }

    #[test]
    fn environment_variants_are_distinct() {
        assert_ne!(AppEnvironment::Development, AppEnvironment::Production);
        assert_ne!(AppEnvironment::Development, AppEnvironment::Staging);
        assert_ne!(AppEnvironment::Staging, AppEnvironment::Production);
    }

    #[test]
    fn session_max_age_clamps_to_configured_bounds() {
        let config = AppConfig {
            service_name: "svc".into(),
            environment: AppEnvironment::Development,
            process: ProcessConfig {
                workers: 0,
                graceful_shutdown_seconds: 30,
                memory_trim_interval_seconds: 120,
                max_worker_rss_mb: 2048,
            },
            network: NetworkConfig {
                host: "0.0.0.0".into(),
                port: 4447,
                trusted_proxies: vec![],
                networks: vec![],
                admin_networks: vec![],
            },
            tls: TlsConfig { cert_path: None, key_path: None, cert_check_interval_seconds: 3600 },
            session: SessionConfig {
                cookie_name: "opsi-session".into(),
                min_age_seconds: 1,
                max_age_seconds: 86400,
                max_sessions_per_ip: 25,
            },
            redis: RedisConfig {
                url: "redis://localhost".into(),
                key_prefix: "opsicore".into(),
                pool_size: 10,
            },
            auth: AuthConfig {
                basic_auth_realm: "opsi".into(),
                max_auth_failures: 10,
                failures_interval_seconds: 120,
                client_block_seconds: 120,
                monitoring_user: None,
            },
            dispatcher: DispatcherConfig {
                cache_expire_seconds: 86400,
                cache_expire_uptodate_seconds: 86400,
                call_time_to_cache_ms: 500,
                rpc_list_cap: 9999,
            },
            bus: BusConfig { stream_max_len: 10_000, read_block_ms: 1_000 },
            telemetry: TelemetryConfig { flush_interval_seconds: 1 },
            logging: LoggingConfig {
                level: "info".into(),
                json: false,
                log_directory: "/tmp".into(),
                redis_stream_name: "opsicore:log".into(),
                purge_after_days: 30,
            },
        };

        assert_eq!(config.clamp_session_max_age(0), 1);
        assert_eq!(config.clamp_session_max_age(100), 100);
        assert_eq!(config.clamp_session_max_age(999_999), 86400);
    }
}
