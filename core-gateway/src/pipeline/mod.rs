//! # Request Pipeline
//!
//! The four-stage middleware pipeline spec §4.E describes: client-address
//! resolution, request-id/Server-Timing bookkeeping, session resolution,
//! and centralized error mapping. There is no custom `actix_web::Transform`
//! anywhere in the example pack to crib from, so `session_stage`/`wrap_fn`
//! below are written from the crate's documented `middleware::from_fn` API
//! rather than a directly-grounded usage pattern.

pub mod client_addr;
pub mod context;
pub mod error_mapping;
pub mod session_stage;

pub use context::RequestContext;
