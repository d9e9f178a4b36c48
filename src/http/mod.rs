//! HTTP serving subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (accept, TLS, classify)
//!         ├─ rpc  → rpc::RpcService (HTTP/2)
//!         └─ text → gateway text router (HTTP/1)
//!     → request.rs (request id for every textual request)
//! ```

pub mod request;
pub mod server;

pub use request::{UuidRequestId, X_REQUEST_ID};
pub use server::{MuxServer, Transport};
