//! # core-session
//!
//! Session entity and manager (spec §4.B): a Redis-backed, opaque-id session
//! scoped per client IP, with optimistic concurrency so multiple worker
//! tasks can safely read-modify-write the same session concurrently.
//!
//! Grounded on `OPSISession`/`SessionMiddleware` from the reference
//! implementation (`examples/original_source/opsiconfd/session.py`); adapted
//! from its per-process event loop to a `Clone + Send + Sync` manager shared
//! across this service's worker tasks.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`session`] | The [`Session`] entity and its cookie/expiry rules |
//! | [`manager`] | [`SessionManager`]: Redis load/store/delete, per-IP cap |

pub mod manager;
pub mod session;

pub use manager::SessionManager;
pub use session::Session;
