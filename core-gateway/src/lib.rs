//! # core-gateway
//!
//! The HTTP/WebSocket front door (spec §4.D/§4.E/§6): the worker/arbiter
//! process model, the request pipeline (overload shedding, client-address
//! resolution, session resolution, centralized error mapping), and every
//! route this service exposes.

pub mod arbiter;
pub mod cli;
pub mod credentials;
pub mod overload;
pub mod pipeline;
pub mod routes;
pub mod state;
pub mod worker;

pub use state::AppState;
