//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Listener, classifier, RPC handler, gateway produce:
//!     → logging.rs (structured events inside per-connection spans)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Connection id and request id are span fields, not message text
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::init_metrics;
