//! # Backend Facade
//!
//! Spec §4.J / the relational backend is out of scope (spec §1); this is
//! the typed seam the dispatcher calls through, plus an in-memory default
//! implementation sufficient to exercise the dispatch contract end-to-end.
//! Grounded on `original_source/opsiconfd/backend.py`'s `get_interface`/
//! `backend_getLicensingInfo` surface.

use async_trait::async_trait;
use core_shared::{ServiceError, ServiceResult};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::envelope::RpcParams;

/// Snapshot of the calling identity, decoupled from `core-auth::VerifiedIdentity`
/// so this crate doesn't need to depend on it — `core-gateway` maps one to
/// the other when it wires the dispatcher to the access gate.
#[derive(Debug, Clone, Default)]
pub struct CallerPrincipal {
    pub username: Option<String>,
    pub is_admin: bool,
    pub is_read_only: bool,
    pub user_groups: Vec<String>,
    pub host_id: Option<String>,
}

/// One ACL rule attached to a [`MethodDescriptor`]. Evaluated top to bottom;
/// the first matching entry decides the call, mirroring the source's
/// `acl.json`-driven `RPCACE` vectors.
#[derive(Debug, Clone)]
pub struct AclEntry {
    pub kind: AclKind,
    /// `"*"`, `"group:<name>"`, or `"self"`.
    pub principal_pattern: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclKind {
    Allow,
    Deny,
}

impl AclEntry {
    pub fn allow(pattern: &str) -> Self {
        Self { kind: AclKind::Allow, principal_pattern: pattern.to_string() }
    }

    fn matches(&self, principal: &CallerPrincipal) -> bool {
        match self.principal_pattern.as_str() {
            "*" => true,
            "self" => principal.host_id.is_some(),
            pattern => pattern
                .strip_prefix("group:")
                .map(|group| principal.user_groups.iter().any(|g| g == group))
                .unwrap_or(false),
        }
    }
}

/// Evaluates a method's ACL vector against a principal. No matching entry
/// is a denial, matching the source's fail-closed default.
pub fn evaluate_acl(acl: &[AclEntry], principal: &CallerPrincipal) -> ServiceResult<()> {
    if principal.is_admin {
        return Ok(());
    }
    for entry in acl {
        if entry.matches(principal) {
            return match entry.kind {
                AclKind::Allow => Ok(()),
                AclKind::Deny => Err(ServiceError::PermissionDenied),
            };
        }
    }
    Err(ServiceError::PermissionDenied)
}

/// Introspection record for one method, as returned by `get_interface()`
/// and consulted by the dispatcher for ACL/deprecation/coercion decisions.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub name: String,
    pub params: Vec<String>,
    pub varargs: bool,
    pub keywords: bool,
    pub doc: Option<String>,
    pub deprecated: bool,
    pub alternative_method: Option<String>,
    pub acl: Vec<AclEntry>,
    /// `true` if a successful call should invalidate the product-ordering
    /// cache for its target depot (spec §4.F step 6).
    pub is_product_mutator: bool,
}

impl MethodDescriptor {
    pub fn new(name: &str, params: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            varargs: false,
            keywords: false,
            doc: None,
            deprecated: false,
            alternative_method: None,
            acl: vec![AclEntry::allow("*")],
            is_product_mutator: false,
        }
    }

    pub fn deprecated(mut self, alternative: &str) -> Self {
        self.deprecated = true;
        self.alternative_method = Some(alternative.to_string());
        self
    }

    pub fn product_mutator(mut self) -> Self {
        self.is_product_mutator = true;
        self
    }

    pub fn admin_only(mut self) -> Self {
        self.acl = vec![AclEntry::allow("group:opsiadmin")];
        self
    }
}

/// The typed seam to the backend object store. `core-gateway` wires a
/// concrete implementation (or this in-memory default) into the dispatcher.
#[async_trait]
pub trait BackendFacade: Send + Sync {
    /// Full method-descriptor table, used for ACL enforcement, argument
    /// coercion, and the admin `backend_getInterface` introspection call.
    fn get_interface(&self) -> Vec<MethodDescriptor>;

    /// Executes one call. Runs conceptually "on the thread pool" in the
    /// source; here that's just `spawn_blocking` at the call site since the
    /// in-memory default never blocks.
    async fn call(&self, method: &str, params: &RpcParams, principal: &CallerPrincipal) -> ServiceResult<Value>;

    /// Cached 1 hour, invalidated by an injected license-pool-changed signal
    /// (spec §4.J). The in-memory default has no license pool, so it
    /// returns an empty summary and never needs invalidation.
    async fn backend_get_licensing_info(&self, allow_cache: bool) -> ServiceResult<Value>;

    /// `true` if the config backend carries an explicit
    /// `opsiconfd.<depot>.product.cache.outdated` flag for `depot`, meaning
    /// the product-ordering cache must be treated as stale regardless of
    /// its own uptodate markers. The in-memory default never sets this flag.
    async fn is_product_cache_outdated(&self, depot: &str) -> ServiceResult<bool>;
}

/// Minimal in-memory backend sufficient to drive the dispatcher end-to-end
/// in tests and as a development default. `productOnDepot_create`,
/// `host_delete`, and `getProductOrdering` exist purely to exercise the
/// cache-invalidation contract in spec §4.F step 6.
pub struct InMemoryBackend {
    product_orderings: Mutex<HashMap<String, Vec<String>>>,
    licensing_cache: Mutex<Option<(Value, Instant)>>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self { product_orderings: Mutex::new(HashMap::new()), licensing_cache: Mutex::new(None) }
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn descriptors() -> Vec<MethodDescriptor> {
        vec![
            MethodDescriptor::new("backend_info", &[]),
            MethodDescriptor::new("backend_getInterface", &[]).admin_only(),
            MethodDescriptor::new("getProductOrdering", &["depot", "algorithm"]),
            MethodDescriptor::new("productOnDepot_create", &["productId", "depotId"]).product_mutator(),
            MethodDescriptor::new("host_delete", &["hostId"]).product_mutator(),
            MethodDescriptor::new("host_getObjects", &["filter"]).deprecated("host_getObjects_v2"),
            MethodDescriptor::new("backend_getLicensingInfo", &["licenses", "legacyModules", "dates", "allowCache"]),
        ]
    }
}

#[async_trait]
impl BackendFacade for InMemoryBackend {
    fn get_interface(&self) -> Vec<MethodDescriptor> {
        Self::descriptors()
    }

    async fn call(&self, method: &str, params: &RpcParams, _principal: &CallerPrincipal) -> ServiceResult<Value> {
        match method {
            "backend_info" => Ok(json!({ "opsiVersion": "core-svc/0.1.0" })),
            "backend_getInterface" => {
                let names: Vec<&str> = Self::descriptors().iter().map(|d| d.name.as_str()).collect();
                Ok(json!(names))
            }
            "getProductOrdering" => {
                let depot = positional_str(params, 0)?;
                let ordering = self.product_orderings.lock().unwrap().get(&depot).cloned().unwrap_or_default();
                Ok(json!({ "not_sorted": ordering.clone(), "sorted": ordering }))
            }
            "productOnDepot_create" => {
                let product_id = positional_str(params, 0)?;
                let depot_id = positional_str(params, 1)?;
                self.product_orderings.lock().unwrap().entry(depot_id).or_default().push(product_id);
                Ok(Value::Null)
            }
            "host_delete" => {
                let host_id = positional_str(params, 0)?;
                self.product_orderings.lock().unwrap().remove(&host_id);
                Ok(Value::Null)
            }
            "host_getObjects" => Ok(json!([])),
            "backend_getLicensingInfo" => self.backend_get_licensing_info(true).await,
            other => Err(ServiceError::UnknownMethod { method: other.to_string() }),
        }
    }

    async fn backend_get_licensing_info(&self, allow_cache: bool) -> ServiceResult<Value> {
        const TTL: Duration = Duration::from_secs(3600);
        let mut cache = self.licensing_cache.lock().unwrap();
        if allow_cache {
            if let Some((value, cached_at)) = cache.as_ref() {
                if cached_at.elapsed() < TTL {
                    return Ok(value.clone());
                }
            }
        }
        let fresh = json!({ "licenses": [], "legacy_modules": {}, "available": true });
        *cache = Some((fresh.clone(), Instant::now()));
        Ok(fresh)
    }

    async fn is_product_cache_outdated(&self, _depot: &str) -> ServiceResult<bool> {
        Ok(false)
    }
}

fn positional_str(params: &RpcParams, index: usize) -> ServiceResult<String> {
    match params {
        RpcParams::Positional(items) => items
            .get(index)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ServiceError::BadRequest { message: format!("missing positional arg {index}") }),
        _ => Err(ServiceError::BadRequest { message: "expected positional params".to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acl_allows_admin_regardless_of_entries() {
        let principal = CallerPrincipal { is_admin: true, ..Default::default() };
        let acl = vec![AclEntry { kind: AclKind::Deny, principal_pattern: "*".into() }];
        assert!(evaluate_acl(&acl, &principal).is_ok());
    }

    #[test]
    fn acl_denies_when_no_entry_matches() {
        let principal = CallerPrincipal::default();
        let acl = vec![AclEntry::allow("group:opsiadmin")];
        assert!(evaluate_acl(&acl, &principal).is_err());
    }

    #[test]
    fn self_acl_requires_host_identity() {
        let acl = vec![AclEntry::allow("self")];
        let host_principal = CallerPrincipal { host_id: Some("host1".into()), ..Default::default() };
        let user_principal = CallerPrincipal::default();
        assert!(evaluate_acl(&acl, &host_principal).is_ok());
        assert!(evaluate_acl(&acl, &user_principal).is_err());
    }

    #[tokio::test]
    async fn product_mutator_updates_ordering_for_next_read() {
        let backend = InMemoryBackend::new();
        let principal = CallerPrincipal::default();
        backend
            .call(
                "productOnDepot_create",
                &RpcParams::Positional(vec![json!("prod1"), json!("depotA")]),
                &principal,
            )
            .await
            .unwrap();
        let result = backend
            .call("getProductOrdering", &RpcParams::Positional(vec![json!("depotA")]), &principal)
            .await
            .unwrap();
        assert_eq!(result["sorted"], json!(["prod1"]));
    }

    #[tokio::test]
    async fn licensing_info_is_cached() {
        let backend = InMemoryBackend::new();
        let first = backend.backend_get_licensing_info(true).await.unwrap();
        let second = backend.backend_get_licensing_info(true).await.unwrap();
        assert_eq!(first, second);
    }
}
