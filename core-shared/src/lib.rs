//! # core-shared
//!
//! Ambient stack shared by every crate in the endpoint coordination service:
//! configuration loading, the unified error type, structured logging setup,
//! and the Redis fabric (connection pools, key conventions, the distributed
//! lock primitive).
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Service crates                              │
//! │  ┌─────────┐ ┌─────────┐ ┌──────────┐ ┌───────────┐         │
//! │  │ session │ │  auth   │ │ dispatch │ │    bus    │  ...    │
//! │  └────┬────┘ └────┬────┘ └────┬─────┘ └─────┬─────┘         │
//! │       │           │           │             │                │
//! │       └───────────┴───────────┴─────────────┘                │
//! │                       │                                       │
//! │              ┌────────▼────────┐                             │
//! │              │  core-shared    │ ◄── You are here             │
//! │              └─────────────────┘                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose | Key Types |
//! |--------|---------|-----------|
//! | [`config`] | Environment-based configuration | [`AppConfig`] |
//! | [`errors`] | Standardized error handling | [`ServiceError`], [`ServiceResult`] |
//! | [`redis`] | Redis fabric: pools, keyspace, locks | [`RedisFabric`] |
//! | [`tracing_config`] | Structured logging setup | [`init_tracing`](tracing_config::init_tracing) |
//!
//! ## Design Decisions
//!
//! 1. **Single source of truth**: shared types live here to prevent drift across crates
//! 2. **One keyspace**: every Redis-backed crate goes through [`redis::RedisFabric`]
//! 3. **Observable by default**: structured logging and tracing built-in
//!
//! The relational backend that a full deployment would sit behind is outside
//! this repository's scope (see `DESIGN.md`); nothing here depends on `sqlx`.

pub mod config;
pub mod errors;
pub mod redis;
pub mod tracing_config;

pub use config::AppConfig;
pub use errors::{ServiceError, ServiceResult};
pub use redis::RedisFabric;
