//! # Redis Fabric
//!
//! The single Redis entry point shared by every crate: connection pooling,
//! the keyspace convention, the distributed lock primitive, and the stream
//! helpers the message bus and dispatcher cache build on.
//!
//! ## Why Redis?
//!
//! | Use Case | Description |
//! |----------|-------------|
//! | **Sessions** | `core-session` stores session state as a hash per id |
//! | **Message bus** | `core-bus` channels are Redis streams (`XADD`/`XREAD`) |
//! | **Dispatcher cache** | `core-dispatch` caches product-ordering results |
//! | **Locking** | Coordinating arbiter-wide actions across worker tasks |
//! | **Telemetry** | Per-second metric buffers flushed as sorted-set entries |
//!
//! ## Connection Management
//!
//! We use a `ConnectionManager`, which reconnects automatically on failure,
//! for the async hot path. A secondary blocking pool backs code that runs
//! outside the Tokio reactor (signal handlers, the `backup`/`restore` CLI).
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                         RedisFabric                                │
//! ├───────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────┐        ┌───────────────────────┐            │
//! │  │ ConnectionManager │       │ deadpool-redis Pool   │            │
//! │  │ (async hot path)   │       │ (blocking / CLI path) │            │
//! │  └────────┬──────────┘        └───────────┬───────────┘           │
//! │           └──────────────┬─────────────────┘                      │
//! │                          ▼                                        │
//! │                   ┌─────────────┐                                 │
//! │                   │ Redis Server │                                │
//! │                   └─────────────┘                                 │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Naming Convention
//!
//! | Pattern | Example | Purpose |
//! |---------|---------|---------|
//! | `{prefix}:session:{id}` | `svc:session:ab12...` | Session state hash |
//! | `{prefix}:session:ip:{ip}` | `svc:session:ip:10_0_0_1` | Per-IP session set |
//! | `{prefix}:lock:{name}` | `svc:lock:reload` | Distributed lock holder |
//! | `{prefix}:stream:{channel}` | `svc:stream:event:hosts` | Message bus stream |
//! | `{prefix}:rpc:blocked:{ip}` | `svc:rpc:blocked:10_0_0_1` | Brute-force counter |
//! | `{prefix}:cache:{method}:{hash}` | `svc:cache:getProductOrdering:9f1c` | Dispatcher cache |

use crate::config::RedisConfig;
use crate::errors::ServiceError;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult, Value};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Async Redis fabric shared by every crate that talks to Redis.
///
/// `Clone + Send + Sync`; cloning only clones the underlying handles.
#[derive(Clone)]
pub struct RedisFabric {
    conn: ConnectionManager,
    pool: Pool,
    prefix: String,
}

impl RedisFabric {
    /// Connects the async `ConnectionManager` and the blocking pool.
    pub async fn new(config: &RedisConfig) -> Result<Self, ServiceError> {
        info!(url = %config.url, prefix = %config.key_prefix, "connecting to redis");

        let client = redis::Client::open(config.url.as_str())?;
        let conn = ConnectionManager::new(client).await?;

        let pool_config = PoolConfig::from_url(config.url.as_str());
        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| ServiceError::Internal { message: e.to_string() })?;

        info!("redis fabric ready");
        Ok(Self { conn, pool, prefix: config.key_prefix.clone() })
    }

    /// Builds a namespaced key: `{prefix}:{suffix}`.
    pub fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.prefix, suffix)
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }

    // -- Basic operations -----------------------------------------------------

    /// Stores a JSON-serialized value with an optional TTL.
    pub async fn set<T: serde::Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), ServiceError> {
        let serialized = serde_json::to_string(value)
            .map_err(|e| ServiceError::Internal { message: e.to_string() })?;
        let mut conn = self.conn();
        match ttl {
            Some(duration) => {
                conn.set_ex::<_, _, ()>(key, serialized, duration.as_secs()).await?;
            }
            None => {
                conn.set::<_, _, ()>(key, serialized).await?;
            }
        }
        Ok(())
    }

    /// Retrieves and JSON-deserializes a value. `None` if the key is absent.
    pub async fn get<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, ServiceError> {
        let mut conn = self.conn();
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(s) => {
                let value = serde_json::from_str(&s)
                    .map_err(|e| ServiceError::Internal { message: e.to_string() })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Stores a raw byte string (MessagePack payload) with an optional TTL.
    /// Used by `core-session` and `core-bus`, which need the exact wire
    /// format a reader elsewhere will `rmp_serde::from_slice` back.
    pub async fn set_bytes(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), ServiceError> {
        let mut conn = self.conn();
        match ttl {
            Some(duration) => {
                conn.set_ex::<_, _, ()>(key, value, duration.as_secs()).await?;
            }
            None => {
                conn.set::<_, _, ()>(key, value).await?;
            }
        }
        Ok(())
    }

    /// Retrieves a raw byte string. `None` if the key is absent.
    pub async fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>, ServiceError> {
        let mut conn = self.conn();
        Ok(conn.get(key).await?)
    }

    /// Lists keys matching a pattern via `SCAN`, never blocking the server
    /// the way `KEYS` would. Used for the per-IP session count and the
    /// `backup` CLI subcommand.
    pub async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, ServiceError> {
        let mut conn = self.conn();
        let mut cursor: u64 = 0;
        let mut found = Vec::new();
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await?;
            found.extend(batch);
            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }
        Ok(found)
    }

    /// Deletes a key. Returns `true` if a key was actually removed.
    pub async fn delete(&self, key: &str) -> Result<bool, ServiceError> {
        let mut conn = self.conn();
        let deleted: i64 = conn.del(key).await?;
        Ok(deleted > 0)
    }

    /// Checks whether a key exists.
    pub async fn exists(&self, key: &str) -> Result<bool, ServiceError> {
        let mut conn = self.conn();
        Ok(conn.exists(key).await?)
    }

    /// Atomically increments a counter, creating it at 1 if absent.
    pub async fn incr(&self, key: &str) -> Result<i64, ServiceError> {
        let mut conn = self.conn();
        Ok(conn.incr(key, 1).await?)
    }

    /// Sets a TTL on an existing key.
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, ServiceError> {
        let mut conn = self.conn();
        Ok(conn.expire(key, ttl.as_secs() as i64).await?)
    }

    /// Pushes a JSON-serialized value onto the right of a list and trims it
    /// to the last `cap` entries, implementing the "capped record list"
    /// pattern used by the RPC log (spec §3 "RPC call record") and the
    /// deprecation counter.
    pub async fn list_push_capped<T: serde::Serialize>(
        &self,
        key: &str,
        value: &T,
        cap: usize,
    ) -> Result<(), ServiceError> {
        let serialized = serde_json::to_string(value)
            .map_err(|e| ServiceError::Internal { message: e.to_string() })?;
        let mut conn = self.conn();
        conn.rpush::<_, _, ()>(key, serialized).await?;
        conn.ltrim::<_, ()>(key, -(cap as isize), -1).await?;
        Ok(())
    }

    /// Reads a range of a capped list, most recent last (same order as
    /// `list_push_capped` appends).
    pub async fn list_range<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<T>, ServiceError> {
        let mut conn = self.conn();
        let raw: Vec<String> = conn.lrange(key, start, stop).await?;
        raw.into_iter()
            .map(|s| serde_json::from_str(&s).map_err(|e| ServiceError::Internal { message: e.to_string() }))
            .collect()
    }

    // -- Time-series (telemetry) ------------------------------------------------
    // Real Redis builds don't carry the RedisTimeSeries module here, so a
    // metric's samples are kept as a sorted set scored by timestamp —
    // behaviorally equivalent for `TS.ADD`/range-query purposes, the same
    // simplification the dispatcher cache makes for sorted product orderings.

    /// Records one observation at `timestamp_ms`, trimming anything older
    /// than `retention_ms` off the low end of the set.
    pub async fn ts_add(
        &self,
        key: &str,
        timestamp_ms: i64,
        value: f64,
        retention_ms: i64,
    ) -> Result<(), ServiceError> {
        let mut conn = self.conn();
        let member = format!("{timestamp_ms}:{value}");
        conn.zadd::<_, _, _, ()>(key, member, timestamp_ms as f64).await?;
        if retention_ms > 0 {
            let cutoff = timestamp_ms - retention_ms;
            conn.zrembyscore::<_, _, _, ()>(key, f64::NEG_INFINITY, cutoff as f64).await?;
        }
        Ok(())
    }

    /// Reads `(timestamp_ms, value)` samples in `[start_ms, end_ms]`,
    /// ascending by time.
    pub async fn ts_range(
        &self,
        key: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<(i64, f64)>, ServiceError> {
        let mut conn = self.conn();
        let members: Vec<String> = conn
            .zrangebyscore(key, start_ms as f64, end_ms as f64)
            .await?;
        Ok(members
            .into_iter()
            .filter_map(|m| {
                let (ts, value) = m.split_once(':')?;
                Some((ts.parse().ok()?, value.parse().ok()?))
            })
            .collect())
    }

    /// Health check used by the arbiter's readiness probe.
    pub async fn ping(&self) -> Result<(), ServiceError> {
        let mut conn = self.conn();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    /// Compare-and-swap write guarded by a version token stored alongside
    /// the value. Returns `false` (no write performed) if `expected_version`
    /// doesn't match what's currently stored — the caller lost a race with
    /// another writer and should reload. Used by `core-session` to detect
    /// concurrent session mutation across worker tasks.
    pub async fn cas_set_bytes(
        &self,
        key: &str,
        version_key: &str,
        expected_version: Option<&str>,
        new_version: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, ServiceError> {
        let mut conn = self.conn();
        let script = redis::Script::new(
            r"
            local cur = redis.call('GET', KEYS[2])
            if (ARGV[1] == '' and cur == false) or cur == ARGV[1] then
                redis.call('SET', KEYS[1], ARGV[3], 'EX', ARGV[4])
                redis.call('SET', KEYS[2], ARGV[2], 'EX', ARGV[4])
                return 1
            else
                return 0
            end
            ",
        );
        let result: i64 = script
            .key(key)
            .key(version_key)
            .arg(expected_version.unwrap_or(""))
            .arg(new_version)
            .arg(value)
            .arg(ttl.as_secs())
            .invoke_async(&mut conn)
            .await?;
        Ok(result == 1)
    }

    // -- Distributed lock -------------------------------------------------------
    // Mirrors opsiconfd.redis.redis_lock: SET NX with a random holder token,
    // released only by the holder via a WATCH/MULTI compare-and-delete so a
    // slow lock-holder can't clobber a newer holder's lock after its own TTL
    // expired and was re-acquired by someone else.

    /// Acquires a named lock, polling until `acquire_timeout` elapses.
    /// The lock auto-expires after `lock_timeout` even if never released.
    pub async fn lock(
        &self,
        name: &str,
        acquire_timeout: Duration,
        lock_timeout: Duration,
    ) -> Result<RedisLock, ServiceError> {
        let key = self.key(&format!("lock:{name}"));
        let holder = Uuid::new_v4().to_string();
        let mut conn = self.conn();
        let deadline = tokio::time::Instant::now() + acquire_timeout;

        loop {
            let acquired: bool = redis::cmd("SET")
                .arg(&key)
                .arg(&holder)
                .arg("NX")
                .arg("PX")
                .arg(lock_timeout.as_millis() as u64)
                .query_async::<Option<String>>(&mut conn)
                .await?
                .is_some();

            if acquired {
                return Ok(RedisLock { fabric: self.clone(), key, holder });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ServiceError::Overloaded {
                    retry_after_secs: lock_timeout.as_secs().max(1),
                });
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    // -- Stream helpers (message bus, telemetry) ---------------------------------

    /// Appends a MessagePack-serialized entry to a stream, returning the new
    /// id. `maxlen` approximately trims the stream (`MAXLEN ~`) to that many
    /// entries, the way the message bus caps each channel's history.
    pub async fn xadd(
        &self,
        stream: &str,
        fields: &[(&str, Vec<u8>)],
        maxlen: Option<usize>,
    ) -> Result<String, ServiceError> {
        let mut conn = self.conn();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream);
        if let Some(cap) = maxlen {
            cmd.arg("MAXLEN").arg("~").arg(cap);
        }
        cmd.arg("*");
        for (field, value) in fields {
            cmd.arg(*field).arg(value.as_slice());
        }
        Ok(cmd.query_async(&mut conn).await?)
    }

    /// Plain (non-consumer-group) read, blocking up to `block` for new entries.
    pub async fn xread(
        &self,
        stream: &str,
        last_id: &str,
        block: Duration,
    ) -> Result<Vec<(String, Vec<(String, Vec<u8>)>)>, ServiceError> {
        let mut conn = self.conn();
        let reply: redis::streams::StreamReadReply = conn
            .xread_options(
                &[stream],
                &[last_id],
                &redis::streams::StreamReadOptions::default().block(block.as_millis() as usize),
            )
            .await?;
        Ok(flatten_stream_reply(reply))
    }

    /// Consumer-group read. Creates the group with `MKSTREAM` if absent.
    pub async fn xreadgroup(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        block: Duration,
        count: usize,
    ) -> Result<Vec<(String, Vec<(String, Vec<u8>)>)>, ServiceError> {
        let mut conn = self.conn();
        let created: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        if let Err(e) = created {
            if !e.to_string().contains("BUSYGROUP") {
                warn!(error = %e, stream, group, "xgroup create failed");
            }
        }

        let reply: redis::streams::StreamReadReply = conn
            .xread_options(
                &[stream],
                &[">"],
                &redis::streams::StreamReadOptions::default()
                    .group(group, consumer)
                    .block(block.as_millis() as usize)
                    .count(count),
            )
            .await?;
        Ok(flatten_stream_reply(reply))
    }

    /// Acknowledges delivery of one or more stream entries for a group.
    pub async fn xack(&self, stream: &str, group: &str, ids: &[String]) -> Result<(), ServiceError> {
        let mut conn = self.conn();
        conn.xack::<_, _, _, i64>(stream, group, ids).await?;
        Ok(())
    }

    /// Checked-out blocking-pool connection, for CLI paths (`backup`/`restore`,
    /// the `setup` subcommand) that run outside the request-handling reactor.
    pub async fn pooled(&self) -> Result<deadpool_redis::Connection, ServiceError> {
        self.pool.get().await.map_err(|e| ServiceError::Internal { message: e.to_string() })
    }

    /// Per-key-type memory footprint, used by the arbiter's periodic health
    /// snapshot. Best-effort: falls back to an empty breakdown if the server
    /// doesn't support `MEMORY STATS`.
    pub async fn redis_info(&self) -> Result<RedisInfo, ServiceError> {
        let mut conn = self.conn();
        let info: String = redis::cmd("INFO").arg("memory").query_async(&mut conn).await?;
        let used_memory = info
            .lines()
            .find_map(|line| line.strip_prefix("used_memory:"))
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0);
        Ok(RedisInfo { used_memory_bytes: used_memory })
    }
}

impl std::fmt::Debug for RedisFabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisFabric").field("prefix", &self.prefix).finish_non_exhaustive()
    }
}

/// Snapshot of Redis server memory use, reported by the arbiter health check.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RedisInfo {
    /// Bytes currently used by the Redis process, per `INFO memory`.
    pub used_memory_bytes: u64,
}

/// A held distributed lock. Releasing is a compare-and-delete: only the
/// original holder token can remove the key, so a lock whose TTL already
/// expired and was re-acquired elsewhere is never stolen back.
pub struct RedisLock {
    fabric: RedisFabric,
    key: String,
    holder: String,
}

impl RedisLock {
    /// Releases the lock if we still hold it. No-op (not an error) if the
    /// lock already expired and was re-acquired by someone else.
    pub async fn release(self) -> Result<(), ServiceError> {
        let mut conn = self.fabric.conn();
        let script = redis::Script::new(
            r"
            if redis.call('GET', KEYS[1]) == ARGV[1] then
                return redis.call('DEL', KEYS[1])
            else
                return 0
            end
            ",
        );
        script.key(&self.key).arg(&self.holder).invoke_async::<i64>(&mut conn).await?;
        Ok(())
    }
}

fn flatten_stream_reply(reply: redis::streams::StreamReadReply) -> Vec<(String, Vec<(String, Vec<u8>)>)> {
    let mut out = Vec::new();
    for key in reply.keys {
        for entry in key.ids {
            let fields = entry
                .map
                .into_iter()
                .filter_map(|(field, value)| match value {
                    Value::BulkString(bytes) => Some((field, bytes)),
                    other => decode_redis_result(other).map(|s| (field, s.into_bytes())),
                })
                .collect();
            out.push((entry.id, fields));
        }
    }
    out
}

/// Recursively decodes a raw Redis reply into a UTF-8 string, for diagnostic
/// paths (the `log-viewer` CLI subcommand, `redis_info` fallbacks) that don't
/// go through typed deserialization.
pub fn decode_redis_result(value: Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => String::from_utf8(bytes).ok(),
        Value::SimpleString(s) => Some(s),
        Value::Int(n) => Some(n.to_string()),
        Value::Array(items) | Value::Set(items) => {
            Some(items.into_iter().filter_map(decode_redis_result).collect::<Vec<_>>().join(","))
        }
        Value::Nil | Value::Okay | Value::Map(_) | Value::Double(_) | Value::Boolean(_)
        | Value::BigNumber(_) | Value::VerbatimString { .. } | Value::Push { .. } => None,
        Value::ServerError(_) => None,
    }
}

/// Normalizes an address for use as a Redis key segment. Colons are not
/// valid inside a key segment we also colon-delimit ourselves (IPv6
/// addresses contain them), so they're replaced with underscores.
pub fn ip_address_to_redis_key(addr: &str) -> String {
    addr.replace(':', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv6_addresses_are_key_safe() {
        assert_eq!(ip_address_to_redis_key("::1"), "__1");
        assert_eq!(ip_address_to_redis_key("10.0.0.1"), "10.0.0.1");
        assert_eq!(
            ip_address_to_redis_key("fe80::1ff:fe23:4567:890a"),
            "fe80__1ff_fe23_4567_890a"
        );
    }

    #[test]
    fn decode_redis_result_handles_nested_arrays() {
        let value = Value::Array(vec![
            Value::BulkString(b"a".to_vec()),
            Value::BulkString(b"b".to_vec()),
        ]);
        assert_eq!(decode_redis_result(value), Some("a,b".to_string()));
    }
}
