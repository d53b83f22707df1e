//! # JSON-RPC Dispatcher
//!
//! The `/rpc` dispatch contract: envelope parsing (§4.F), the backend
//! facade seam (§4.J), the product-ordering cache (§4.F steps 4/6), and the
//! wire codec (content-type/compression negotiation).

pub mod backend;
pub mod cache;
pub mod codec;
pub mod dispatcher;
pub mod envelope;

pub use backend::{AclEntry, AclKind, BackendFacade, CallerPrincipal, InMemoryBackend, MethodDescriptor};
pub use cache::{resolve_algorithm, ProductOrdering, ProductOrderingCache};
pub use codec::{ContentType, Compression};
pub use dispatcher::{Dispatcher, RpcCallRecord};
pub use envelope::{build_response, parse_request, EnvelopeVersion, RpcCall, RpcParams};
