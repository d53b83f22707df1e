//! # JSON-RPC Dispatcher
//!
//! The orchestration point for spec §4.F: method lookup, ACL enforcement,
//! product-ordering cache, execution, deprecation tracking, and RPC log
//! recording. Grounded on the call pipeline in
//! `original_source/opsiconfd/application/jsonrpc.py::process_rpc`.

use core_shared::config::DispatcherConfig;
use core_shared::redis::RedisFabric;
use core_shared::{ServiceError, ServiceResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::backend::{evaluate_acl, BackendFacade, CallerPrincipal, MethodDescriptor};
use crate::cache::{resolve_algorithm, ProductOrdering, ProductOrderingCache};
use crate::envelope::{build_response, parse_request, RpcCall, RpcParams};

const RPC_LOG_KEY: &str = "stats:rpcs";
const DEPRECATION_KEY_PREFIX: &str = "stats:deprecated";

/// Audit entry for one dispatched call (spec §3 "RPC call record"), the
/// superset schema the spec picks over the source's two divergent record
/// shapes (spec §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcCallRecord {
    pub rpc_num: u64,
    pub method: String,
    pub num_params: usize,
    pub num_results: usize,
    pub date: i64,
    pub client: String,
    pub error: Option<String>,
    pub deprecated: bool,
    pub duration_ms: u64,
}

/// A single call's last-used bookkeeping for the admin deprecation report.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DeprecationRecord {
    last_used_ms: i64,
    user_agent: Option<String>,
}

/// Composes the method table, ACL checks, cache, and backend facade into
/// one dispatch entry point. Cheap to `Clone` (every field is a handle);
/// shared across worker tasks via `web::Data`/`Arc`.
#[derive(Clone)]
pub struct Dispatcher {
    fabric: RedisFabric,
    config: DispatcherConfig,
    backend: Arc<dyn BackendFacade>,
    cache: ProductOrderingCache,
    methods: Arc<HashMap<String, MethodDescriptor>>,
    rpc_counter: Arc<std::sync::atomic::AtomicU64>,
}

impl Dispatcher {
    pub fn new(fabric: RedisFabric, config: DispatcherConfig, backend: Arc<dyn BackendFacade>) -> Self {
        let methods = backend
            .get_interface()
            .into_iter()
            .map(|descriptor| (descriptor.name.clone(), descriptor))
            .collect();
        let cache = ProductOrderingCache::new(fabric.clone(), config.clone());
        Self {
            fabric,
            config,
            backend,
            cache,
            methods: Arc::new(methods),
            rpc_counter: Arc::new(std::sync::atomic::AtomicU64::new(0)),
        }
    }

    /// Parses and dispatches a whole request body (single call or batch),
    /// returning the JSON value to serialize back to the caller. Each
    /// element's failure is captured independently; the envelope itself
    /// only fails wholesale when malformed (spec §4.F "Error policy").
    pub async fn dispatch_body(
        &self,
        body: &Value,
        principal: &CallerPrincipal,
        client_addr: &str,
        user_agent: Option<&str>,
        now_ms: i64,
    ) -> ServiceResult<Value> {
        if self.config.rpc_list_cap > 0 {
            if let Value::Array(items) = body {
                if items.len() > self.config.rpc_list_cap {
                    return Err(ServiceError::BadRequest {
                        message: format!("batch exceeds cap of {}", self.config.rpc_list_cap),
                    });
                }
            }
        }

        let calls = parse_request(body)?;
        let is_batch = matches!(body, Value::Array(_));

        let mut handles = Vec::with_capacity(calls.len());
        for (index, call) in calls.into_iter().enumerate() {
            let this = self.clone();
            let principal = principal.clone();
            let client_addr = client_addr.to_string();
            let user_agent = user_agent.map(str::to_string);
            handles.push(tokio::spawn(async move {
                let outcome = this
                    .dispatch_one(&call, &principal, &client_addr, user_agent.as_deref(), now_ms)
                    .await;
                (index, call, outcome)
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let (index, call, outcome) = handle
                .await
                .map_err(|e| ServiceError::Internal { message: format!("dispatch task panicked: {e}") })?;
            results.push((index, call, outcome));
        }
        results.sort_by_key(|(index, _, _)| *index);

        let responses: Vec<Value> =
            results.iter().map(|(_, call, outcome)| build_response(call, outcome, principal.is_admin)).collect();

        if is_batch {
            Ok(Value::Array(responses))
        } else {
            Ok(responses.into_iter().next().unwrap_or(Value::Null))
        }
    }

    async fn dispatch_one(
        &self,
        call: &RpcCall,
        principal: &CallerPrincipal,
        client_addr: &str,
        user_agent: Option<&str>,
        now_ms: i64,
    ) -> Result<Value, ServiceError> {
        let started = Instant::now();
        let rpc_num = self.rpc_counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let outcome = self.execute(call, principal).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        let descriptor = self.methods.get(&call.method);
        let deprecated = descriptor.map(|d| d.deprecated).unwrap_or(false);

        if deprecated {
            self.record_deprecation(&call.method, now_ms, user_agent).await;
        }

        let record = RpcCallRecord {
            rpc_num,
            method: call.method.clone(),
            num_params: call.params.len(),
            num_results: if outcome.is_ok() { 1 } else { 0 },
            date: now_ms,
            client: client_addr.to_string(),
            error: outcome.as_ref().err().map(ServiceError::to_string),
            deprecated,
            duration_ms,
        };
        self.record_call(&record).await;

        outcome
    }

    async fn execute(&self, call: &RpcCall, principal: &CallerPrincipal) -> Result<Value, ServiceError> {
        let descriptor = self
            .methods
            .get(&call.method)
            .ok_or_else(|| ServiceError::UnknownMethod { method: call.method.clone() })?;

        evaluate_acl(&descriptor.acl, principal)?;

        if call.method == "getProductOrdering" {
            return self.dispatch_get_product_ordering(call, principal).await;
        }

        let result = self.backend.call(&call.method, &call.params, principal).await?;

        if descriptor.is_product_mutator {
            if let Some(depot) = positional_depot_hint(&call.params) {
                let cache = self.cache.clone();
                tokio::spawn(async move {
                    if let Err(error) = cache.invalidate_depot(&depot).await {
                        warn!(%error, depot, "product-ordering cache invalidation failed");
                    }
                });
            }
        }

        Ok(result)
    }

    async fn dispatch_get_product_ordering(
        &self,
        call: &RpcCall,
        principal: &CallerPrincipal,
    ) -> Result<Value, ServiceError> {
        let (depot, requested_algorithm) = match &call.params {
            RpcParams::Positional(items) => (
                items.first().and_then(Value::as_str).map(str::to_string),
                items.get(1).and_then(Value::as_str).map(str::to_string),
            ),
            RpcParams::Named(map) => (
                map.get("depot").and_then(Value::as_str).map(str::to_string),
                map.get("algorithm").and_then(Value::as_str).map(str::to_string),
            ),
            RpcParams::None => (None, None),
        };
        let depot = depot.ok_or_else(|| ServiceError::BadRequest { message: "depot is required".into() })?;
        let algorithm = resolve_algorithm(requested_algorithm.as_deref(), None);

        let config_backend_outdated = self.backend.is_product_cache_outdated(&depot).await?;
        if let Some(cached) = self.cache.get(&depot, &algorithm, config_backend_outdated).await? {
            return Ok(serde_json::to_value(cached).unwrap());
        }

        let started = Instant::now();
        let result = self
            .backend
            .call(
                "getProductOrdering",
                &RpcParams::Positional(vec![Value::String(depot.clone()), Value::String(algorithm.clone())]),
                principal,
            )
            .await?;
        let elapsed = started.elapsed();

        if elapsed.as_millis() as u64 >= self.config.call_time_to_cache_ms {
            let ordering: ProductOrdering = serde_json::from_value(result.clone())
                .map_err(|e| ServiceError::Internal { message: format!("unexpected backend shape: {e}") })?;
            self.cache.set(&depot, &algorithm, &ordering).await?;
        }

        Ok(result)
    }

    async fn record_call(&self, record: &RpcCallRecord) {
        let key = self.fabric.key(RPC_LOG_KEY);
        if let Err(error) = self.fabric.list_push_capped(&key, record, self.config.rpc_list_cap).await {
            warn!(%error, method = %record.method, "failed to append rpc log record");
        }
    }

    async fn record_deprecation(&self, method: &str, now_ms: i64, user_agent: Option<&str>) {
        let key = self.fabric.key(&format!("{DEPRECATION_KEY_PREFIX}:{method}"));
        let record = DeprecationRecord { last_used_ms: now_ms, user_agent: user_agent.map(str::to_string) };
        if let Err(error) = self.fabric.set(&key, &record, None).await {
            warn!(%error, method, "failed to record deprecated-method usage");
        } else {
            info!(method, "deprecated method invoked");
        }
    }
}

/// Best-effort hint for which depot a product-mutator call targeted, used
/// to scope cache invalidation to one depot rather than the whole cache
/// family. Falls back to no invalidation (safe: the uptodate marker will
/// simply expire on its own TTL) if the call's shape doesn't carry one.
fn positional_depot_hint(params: &RpcParams) -> Option<String> {
    match params {
        RpcParams::Positional(items) => items.get(1).or_else(|| items.first()).and_then(Value::as_str).map(str::to_string),
        RpcParams::Named(map) => map.get("depotId").or_else(|| map.get("depot")).and_then(Value::as_str).map(str::to_string),
        RpcParams::None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use serde_json::json;

    fn test_config() -> DispatcherConfig {
        DispatcherConfig {
            cache_expire_seconds: 86400,
            cache_expire_uptodate_seconds: 86400,
            call_time_to_cache_ms: 500,
            rpc_list_cap: 9999,
        }
    }

    #[test]
    fn depot_hint_prefers_second_positional_arg() {
        let params = RpcParams::Positional(vec![json!("productId1"), json!("depotA")]);
        assert_eq!(positional_depot_hint(&params), Some("depotA".to_string()));
    }

    #[test]
    fn unknown_method_maps_to_unknown_method_error() {
        let backend = InMemoryBackend::new();
        let methods: HashMap<_, _> =
            backend.get_interface().into_iter().map(|d| (d.name.clone(), d)).collect();
        assert!(!methods.contains_key("totally_made_up_method"));
    }
}
