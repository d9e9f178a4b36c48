//! RPC subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP/2 stream (content-type application/grpc)
//!     → service.rs (collect body, request id, logging)
//!     → codec.rs (5-byte length prefix)
//!     → registry.rs (path → decode, invoke, encode)
//!     → echo.rs / reflection.rs (method bodies)
//!     → status.rs (grpc-status / grpc-message trailers)
//!
//! Gateway hop:
//!     client.rs → HTTP/2 (TLS or plaintext) → service.rs
//!     over TCP, or over an in-memory pipe when the handler is local
//! ```

pub mod client;
pub mod codec;
pub mod echo;
pub mod reflection;
pub mod registry;
pub mod service;
pub mod status;

pub use client::{
    CallError, Dialer, LocalHandler, RpcClient, TransportError, Upstream, UpstreamTransport,
};
pub use registry::{MethodDescriptor, MethodTable, MethodTableBuilder, RegistryError};
pub use service::RpcService;
pub use status::{Code, RpcError};

/// Method table with every built-in service registered.
pub fn standard_methods(reflection: bool) -> Result<MethodTable, RegistryError> {
    echo::register(MethodTable::builder())
        .with_reflection(reflection)
        .build()
}
