//! # Route Table
//!
//! Aggregates every route module's `configure` function into one entry
//! point, registered once per worker via `App::new().configure(configure_routes)`.

pub mod messagebus;
pub mod metrics;
pub mod rpc;
pub mod session;
pub mod status;

pub fn configure_routes(cfg: &mut actix_web::web::ServiceConfig) {
    status::configure(cfg);
    session::configure(cfg);
    rpc::configure(cfg);
    messagebus::configure(cfg);
    metrics::configure(cfg);
}
