//! Connection classification subsystem.
//!
//! # Data Flow
//! ```text
//! Decrypted (or raw) byte stream + ALPN hint
//!     → classifier.rs (read chunks, evaluate rules in order)
//!     → rule.rs (Predicate → Match | NoMatch | NeedMore)
//!     → predicates.rs (RPC preface, ALPN, HTTP/1 request line)
//!     → Protocol + ReplayStream handed to exactly one handler
//! ```
//!
//! # Design Decisions
//! - Rule order is part of the contract: first decided match wins
//! - Bounded buffer and a single deadline per connection
//! - Rules are built once at startup and never mutated

pub mod classifier;
pub mod predicates;
pub mod rule;

use std::time::Duration;

pub use classifier::{Classified, ClassifyError, Classifier};
pub use predicates::{AlpnNegotiated, RpcPreface, TextRequestLine, RPC_PREFACE};
pub use rule::{MatchRule, PeekContext, Predicate, Verdict};

use crate::config::ClassifierConfig;
use crate::net::AlpnHint;

/// Protocol families served on the shared port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Binary RPC over HTTP/2.
    Rpc,
    /// Textual HTTP/1.x requests for the gateway.
    Text,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Rpc => "rpc",
            Protocol::Text => "text",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The server's rule list: preface, then ALPN, then request line.
pub fn standard_classifier(config: &ClassifierConfig) -> Classifier<Protocol> {
    Classifier::new(
        vec![
            MatchRule::new(RpcPreface, Protocol::Rpc),
            MatchRule::new(AlpnNegotiated(AlpnHint::H2), Protocol::Rpc),
            MatchRule::new(TextRequestLine, Protocol::Text),
        ],
        config.max_peek_bytes,
        Duration::from_millis(config.peek_timeout_ms),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_rule_order() {
        let classifier = standard_classifier(&ClassifierConfig::default());
        let names: Vec<_> = classifier
            .rules()
            .iter()
            .map(|r| r.predicate().name())
            .collect();
        assert_eq!(names, vec!["rpc_preface", "alpn", "text_request_line"]);
        assert_eq!(classifier.max_peek(), 4096);
    }
}
