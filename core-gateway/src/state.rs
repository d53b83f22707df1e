//! # Application State
//!
//! Everything a request handler needs, assembled once at worker startup and
//! shared via `web::Data<AppState>`. Follows the `AppState` convention from
//! the reference `users-service` crate: a flat struct of cheaply-`Clone`able
//! handles, built once in `main`/`worker` and wrapped in `web::Data`.

use std::collections::HashMap;
use std::sync::Arc;

use core_auth::{AccessGate, BruteForceGuard, CredentialVerifier, NetworkAcl};
use core_bus::ConnectionCounter;
use core_dispatch::backend::{BackendFacade, InMemoryBackend};
use core_dispatch::Dispatcher;
use core_session::SessionManager;
use core_shared::config::AppConfig;
use core_shared::redis::RedisFabric;
use core_shared::ServiceResult;
use core_telemetry::{default_metrics, MetricCollector};

use crate::credentials::{StaticAccount, StaticCredentialVerifier};
use crate::overload::OverloadState;

/// Shared state every worker task operates over.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub fabric: RedisFabric,
    pub sessions: SessionManager,
    pub gate: Arc<AccessGate>,
    pub dispatcher: Dispatcher,
    pub connections: Arc<ConnectionCounter>,
    pub metrics: Arc<MetricCollector>,
    pub overload: OverloadState,
}

impl AppState {
    /// Builds the full dependency graph for one worker. Connects to Redis,
    /// so this is async and must run inside the Tokio runtime that will
    /// host the server.
    pub async fn new(config: AppConfig) -> ServiceResult<Self> {
        let fabric = RedisFabric::new(&config.redis).await?;

        let sessions = SessionManager::new(fabric.clone(), config.session.clone());

        let network = NetworkAcl::new(&config.network.networks, &config.network.admin_networks);
        let brute_force = Arc::new(BruteForceGuard::new(fabric.clone(), config.auth.clone()));
        let verifier: Arc<dyn CredentialVerifier> = Arc::new(default_verifier());
        let gate = Arc::new(AccessGate::new(network, brute_force, config.auth.clone(), verifier));

        let backend: Arc<dyn BackendFacade> = Arc::new(InMemoryBackend::new());
        let dispatcher = Dispatcher::new(fabric.clone(), config.dispatcher.clone(), backend);

        let connections = Arc::new(ConnectionCounter::default());
        let metrics = Arc::new(MetricCollector::new(default_metrics(), config.redis.key_prefix.clone()));

        Ok(Self {
            config: Arc::new(config),
            fabric,
            sessions,
            gate,
            dispatcher,
            connections,
            metrics,
            overload: OverloadState::new(),
        })
    }
}

/// Development account table: one admin, one read-only monitoring-style
/// user. A real deployment wires `StaticCredentialVerifier` from config or
/// swaps it for a verifier backed by the actual backend's user store.
fn default_verifier() -> StaticCredentialVerifier {
    let mut accounts = HashMap::new();
    accounts.insert(
        "admin".to_string(),
        StaticAccount {
            password: "admin".to_string(),
            is_admin: true,
            is_read_only: false,
            user_groups: vec!["opsiadmin".to_string()],
            host_id: None,
        },
    );
    StaticCredentialVerifier::new(accounts)
}
