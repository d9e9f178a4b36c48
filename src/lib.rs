//! RPC and JSON gateway multiplexed on one TLS port.

// Core subsystems
pub mod classify;
pub mod config;
pub mod gateway;
pub mod http;
pub mod net;
pub mod rpc;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::schema::MuxConfig;
pub use http::MuxServer;
pub use lifecycle::Shutdown;
