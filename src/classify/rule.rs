//! Match rules: an ordered predicate plus the handler it selects.

use crate::net::AlpnHint;

/// Outcome of one predicate against the bytes buffered so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The connection belongs to this rule.
    Match,
    /// The connection cannot belong to this rule, whatever follows.
    NoMatch,
    /// Undecided until more bytes arrive.
    NeedMore,
}

/// What a predicate may look at.
#[derive(Debug, Clone, Copy)]
pub struct PeekContext<'a> {
    /// Bytes read from the stream so far, none of them consumed.
    pub buffered: &'a [u8],
    /// ALPN result from the TLS handshake, if any.
    pub alpn: AlpnHint,
}

/// Trait for classifying a connection from its leading bytes.
///
/// Predicates must be pure: the same context always yields the same verdict.
pub trait Predicate: Send + Sync + std::fmt::Debug {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Judge the buffered bytes.
    fn evaluate(&self, ctx: &PeekContext<'_>) -> Verdict;
}

/// A predicate and the handler target it selects.
#[derive(Debug)]
pub struct MatchRule<T> {
    predicate: Box<dyn Predicate>,
    target: T,
}

impl<T> MatchRule<T> {
    pub fn new(predicate: impl Predicate + 'static, target: T) -> Self {
        Self {
            predicate: Box::new(predicate),
            target,
        }
    }

    pub fn predicate(&self) -> &dyn Predicate {
        self.predicate.as_ref()
    }

    pub fn target(&self) -> &T {
        &self.target
    }
}
