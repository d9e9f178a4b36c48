//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → tls.rs (TLS handshake + ALPN hint, skipped in plaintext mode)
//!     → classify (peek leading bytes)
//!     → replay.rs (hand the peeked bytes back to the chosen handler)
//!     → connection.rs (lifecycle tracking, drain)
//!
//! Connection States:
//!     Accepting → Handshaking → Classifying → Serving → Draining → Closed
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Transport is a byte-stream capability: TLS and plaintext feed the same
//!   classifier

pub mod connection;
pub mod listener;
pub mod replay;
pub mod tls;

pub use connection::{ConnectionId, ConnectionTracker};
pub use listener::Listener;
pub use replay::ReplayStream;
pub use tls::{AlpnHint, HandshakeError, TlsIdentity, TlsTerminator, UpstreamTls};
