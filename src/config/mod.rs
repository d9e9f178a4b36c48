//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → MuxConfig (validated, immutable)
//!     → handed by reference to startup, which builds the TLS identity,
//!       classifier, method table and route table once
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no reload path
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    ClassifierConfig, GatewayConfig, ListenerConfig, LogFormat, MuxConfig, ObservabilityConfig,
    RouteConfig, RpcConfig, ShutdownConfig, TlsConfig, TransportMode,
};
pub use validation::{validate_config, ValidationError};
