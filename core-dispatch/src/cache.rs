//! # Product-Ordering Cache
//!
//! Spec §4.F step 4/6. Grounded on the `jsonrpccache:<depot>:products*`
//! keyspace in `original_source/opsiconfd/application/jsonrpc.py`. The
//! source stores the ordering as Redis sorted sets; this fabric's Redis
//! helpers only expose JSON get/set, so the ordered list is stored as a
//! plain JSON array under the same key names — behaviorally equivalent for
//! this cache's purposes (only whole-list reads/writes occur, never a
//! single-member rank query).

use core_shared::config::DispatcherConfig;
use core_shared::redis::RedisFabric;
use core_shared::ServiceResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default product-sort algorithm when the caller doesn't specify one and
/// the backend has declared no override.
const DEFAULT_ALGORITHM: &str = "algorithm1";

/// A cached ordering result for one depot/algorithm pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductOrdering {
    pub not_sorted: Vec<String>,
    pub sorted: Vec<String>,
}

/// Resolves the effective sort algorithm: caller override, else the
/// backend's declared default, else [`DEFAULT_ALGORITHM`].
pub fn resolve_algorithm(requested: Option<&str>, backend_default: Option<&str>) -> String {
    requested
        .or(backend_default)
        .unwrap_or(DEFAULT_ALGORITHM)
        .to_string()
}

#[derive(Clone)]
pub struct ProductOrderingCache {
    fabric: RedisFabric,
    config: DispatcherConfig,
}

impl ProductOrderingCache {
    pub fn new(fabric: RedisFabric, config: DispatcherConfig) -> Self {
        Self { fabric, config }
    }

    fn not_sorted_key(&self, depot: &str) -> String {
        self.fabric.key(&format!("jsonrpccache:{depot}:products"))
    }

    fn sorted_key(&self, depot: &str, algorithm: &str) -> String {
        self.fabric.key(&format!("jsonrpccache:{depot}:products:{algorithm}"))
    }

    fn uptodate_key(&self, depot: &str) -> String {
        self.fabric.key(&format!("jsonrpccache:{depot}:products:uptodate"))
    }

    fn sorted_uptodate_key(&self, depot: &str, algorithm: &str) -> String {
        self.fabric.key(&format!("jsonrpccache:{depot}:products:{algorithm}:uptodate"))
    }

    /// Returns a cached ordering only if both uptodate markers are present
    /// and the config backend hasn't flagged the cache outdated. Any of the
    /// three conditions failing means "go compute it", matching spec §4.F
    /// step 4's check.
    pub async fn get(
        &self,
        depot: &str,
        algorithm: &str,
        config_backend_outdated: bool,
    ) -> ServiceResult<Option<ProductOrdering>> {
        if config_backend_outdated {
            return Ok(None);
        }
        if !self.fabric.exists(&self.uptodate_key(depot)).await? {
            return Ok(None);
        }
        if !self.fabric.exists(&self.sorted_uptodate_key(depot, algorithm)).await? {
            return Ok(None);
        }
        let not_sorted: Option<Vec<String>> = self.fabric.get(&self.not_sorted_key(depot)).await?;
        let sorted: Option<Vec<String>> = self.fabric.get(&self.sorted_key(depot, algorithm)).await?;
        Ok(match (not_sorted, sorted) {
            (Some(not_sorted), Some(sorted)) => Some(ProductOrdering { not_sorted, sorted }),
            _ => None,
        })
    }

    /// Stores a freshly computed ordering and marks both uptodate markers,
    /// each with the configured TTL.
    pub async fn set(&self, depot: &str, algorithm: &str, ordering: &ProductOrdering) -> ServiceResult<()> {
        let ttl = Duration::from_secs(self.config.cache_expire_seconds);
        let uptodate_ttl = Duration::from_secs(self.config.cache_expire_uptodate_seconds);
        self.fabric.set(&self.not_sorted_key(depot), &ordering.not_sorted, Some(ttl)).await?;
        self.fabric.set(&self.sorted_key(depot, algorithm), &ordering.sorted, Some(ttl)).await?;
        self.fabric.set(&self.uptodate_key(depot), &true, Some(uptodate_ttl)).await?;
        self.fabric.set(&self.sorted_uptodate_key(depot, algorithm), &true, Some(uptodate_ttl)).await?;
        Ok(())
    }

    /// Purges the entire cache family for one depot — used by
    /// `deleteDepot`/`host_delete` (spec §4.F step 6) and by any product
    /// mutator's fire-and-forget invalidation.
    pub async fn invalidate_depot(&self, depot: &str) -> ServiceResult<()> {
        let pattern = self.fabric.key(&format!("jsonrpccache:{depot}:*"));
        for key in self.fabric.scan_keys(&pattern).await? {
            self.fabric.delete(&key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_caller_override_first() {
        assert_eq!(resolve_algorithm(Some("algorithm2"), Some("algorithm3")), "algorithm2");
    }

    #[test]
    fn falls_back_to_backend_default() {
        assert_eq!(resolve_algorithm(None, Some("algorithm3")), "algorithm3");
    }

    #[test]
    fn falls_back_to_algorithm1_when_nothing_declared() {
        assert_eq!(resolve_algorithm(None, None), "algorithm1");
    }
}
