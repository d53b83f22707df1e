//! # Authentication and Access Control
//!
//! Network ACLs, Basic-Auth credential parsing, brute-force protection, and
//! the composed [`gate::AccessGate`] that `core-gateway` calls on every
//! request. Grounded on the session/auth flow in
//! `original_source/opsiconfd/session.py`.

pub mod brute_force;
pub mod credentials;
pub mod gate;
pub mod network;

pub use brute_force::{BruteForceCheck, BruteForceGuard};
pub use credentials::{parse_basic_auth, BasicAuth, CredentialVerifier, VerifiedIdentity};
pub use gate::{AccessGate, AccessRole, GateOutcome};
pub use network::NetworkAcl;
