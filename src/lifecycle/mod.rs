//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate → TLS identity → method table → route table → bind
//!     → upstream client → server
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     SIGTERM/SIGINT → trigger → stop accepting → drain → abort at deadline
//! ```
//!
//! # Design Decisions
//! - Ordered startup: nothing accepts traffic until every check passed
//! - Shutdown has timeout: remaining connections are aborted after it

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::spawn_signal_handler;
pub use startup::{build_server, StartupError};
