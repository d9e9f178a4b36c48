//! The classification loop.
//!
//! # Algorithm
//! 1. Evaluate every rule, in declared order, against the buffer:
//!    `NoMatch` moves on, `Match` selects, `NeedMore` stops evaluation.
//! 2. All rules said `NoMatch`: the connection is unroutable.
//! 3. Otherwise read one more chunk (bounded by the peek limit and a single
//!    deadline) and go back to 1.
//!
//! The selected handler receives a [`ReplayStream`] that yields the buffered
//! bytes before the live ones, so classification never consumes input.

use std::time::Duration;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;

use crate::classify::rule::{MatchRule, PeekContext, Verdict};
use crate::net::{AlpnHint, ReplayStream};

/// Bytes requested from the stream per read.
const READ_CHUNK: usize = 1024;

/// Why a connection could not be classified. The connection is dropped.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("no protocol matched {buffered} buffered bytes")]
    NoMatchingProtocol { buffered: usize },

    #[error("peer sent {buffered} bytes within {timeout:?} without matching")]
    PeekTimeout { buffered: usize, timeout: Duration },

    #[error("peek buffer exceeded {limit} bytes without matching")]
    BufferOverflow { limit: usize },

    #[error("read failed during classification: {0}")]
    Io(#[from] std::io::Error),
}

impl ClassifyError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            ClassifyError::NoMatchingProtocol { .. } => "no_matching_protocol",
            ClassifyError::PeekTimeout { .. } => "peek_timeout",
            ClassifyError::BufferOverflow { .. } => "buffer_overflow",
            ClassifyError::Io(_) => "io",
        }
    }
}

/// A classified connection, ready for its handler.
#[derive(Debug)]
pub struct Classified<S, T> {
    /// Target of the winning rule.
    pub target: T,
    /// Name of the winning predicate.
    pub rule: &'static str,
    /// The connection, replaying every byte read during classification.
    pub stream: ReplayStream<S>,
}

enum Decision {
    Selected(usize),
    Undecided,
    Unroutable,
}

/// Ordered rule list plus resource bounds. Immutable once built.
#[derive(Debug)]
pub struct Classifier<T> {
    rules: Vec<MatchRule<T>>,
    max_peek: usize,
    peek_timeout: Duration,
}

impl<T: Clone> Classifier<T> {
    pub fn new(rules: Vec<MatchRule<T>>, max_peek: usize, peek_timeout: Duration) -> Self {
        Self {
            rules,
            max_peek,
            peek_timeout,
        }
    }

    pub fn rules(&self) -> &[MatchRule<T>] {
        &self.rules
    }

    pub fn max_peek(&self) -> usize {
        self.max_peek
    }

    /// Peek at `stream` until a rule claims it.
    pub async fn classify<S>(
        &self,
        mut stream: S,
        alpn: AlpnHint,
    ) -> Result<Classified<S, T>, ClassifyError>
    where
        S: AsyncRead + Unpin,
    {
        let deadline = Instant::now() + self.peek_timeout;
        let mut buffer = BytesMut::with_capacity(READ_CHUNK.min(self.max_peek));
        let mut scratch = [0u8; READ_CHUNK];

        loop {
            match self.decide(&buffer, alpn) {
                Decision::Selected(i) => {
                    let rule = &self.rules[i];
                    return Ok(Classified {
                        target: rule.target().clone(),
                        rule: rule.predicate().name(),
                        stream: ReplayStream::new(stream, buffer.freeze()),
                    });
                }
                Decision::Unroutable => {
                    return Err(ClassifyError::NoMatchingProtocol {
                        buffered: buffer.len(),
                    })
                }
                Decision::Undecided => {}
            }

            if buffer.len() >= self.max_peek {
                return Err(ClassifyError::BufferOverflow {
                    limit: self.max_peek,
                });
            }

            let want = (self.max_peek - buffer.len()).min(READ_CHUNK);
            let n = tokio::time::timeout_at(deadline, stream.read(&mut scratch[..want]))
                .await
                .map_err(|_| ClassifyError::PeekTimeout {
                    buffered: buffer.len(),
                    timeout: self.peek_timeout,
                })??;

            if n == 0 {
                return Err(ClassifyError::NoMatchingProtocol {
                    buffered: buffer.len(),
                });
            }
            buffer.extend_from_slice(&scratch[..n]);
        }
    }

    fn decide(&self, buffered: &[u8], alpn: AlpnHint) -> Decision {
        let ctx = PeekContext { buffered, alpn };
        for (i, rule) in self.rules.iter().enumerate() {
            match rule.predicate().evaluate(&ctx) {
                Verdict::Match => return Decision::Selected(i),
                Verdict::NoMatch => continue,
                // An undecided earlier rule outranks any later match.
                Verdict::NeedMore => return Decision::Undecided,
            }
        }
        Decision::Unroutable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::predicates::{AlpnNegotiated, RpcPreface, TextRequestLine, RPC_PREFACE};
    use crate::classify::rule::Predicate;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Target {
        Rpc,
        Text,
        Other,
    }

    fn standard(max_peek: usize, timeout: Duration) -> Classifier<Target> {
        Classifier::new(
            vec![
                MatchRule::new(RpcPreface, Target::Rpc),
                MatchRule::new(AlpnNegotiated(AlpnHint::H2), Target::Rpc),
                MatchRule::new(TextRequestLine, Target::Text),
            ],
            max_peek,
            timeout,
        )
    }

    /// Matches once `len` bytes have been seen, whatever they are.
    #[derive(Debug)]
    struct AtLeast(usize);

    impl Predicate for AtLeast {
        fn name(&self) -> &'static str {
            "at_least"
        }

        fn evaluate(&self, ctx: &PeekContext<'_>) -> Verdict {
            if ctx.buffered.len() >= self.0 {
                Verdict::Match
            } else {
                Verdict::NeedMore
            }
        }
    }

    #[derive(Debug)]
    struct Never;

    impl Predicate for Never {
        fn name(&self) -> &'static str {
            "never"
        }

        fn evaluate(&self, _ctx: &PeekContext<'_>) -> Verdict {
            Verdict::NeedMore
        }
    }

    #[tokio::test]
    async fn preface_selects_rpc_and_loses_no_bytes() {
        let (client, mut server) = tokio::io::duplex(4096);

        let mut sent = RPC_PREFACE.to_vec();
        sent.extend_from_slice(b"\x00\x00\x00\x04\x00\x00\x00\x00\x00trailing");
        server.write_all(&sent[..10]).await.unwrap();

        let classifier = standard(4096, Duration::from_secs(5));
        let writer = tokio::spawn({
            let rest = sent[10..].to_vec();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                server.write_all(&rest).await.unwrap();
                server
            }
        });

        let classified = classifier.classify(client, AlpnHint::None).await.unwrap();
        assert_eq!(classified.target, Target::Rpc);
        assert_eq!(classified.rule, "rpc_preface");

        drop(writer.await.unwrap());
        let mut stream = classified.stream;
        let mut received = Vec::new();
        stream.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn earlier_rule_wins_when_two_match() {
        let classifier = Classifier::new(
            vec![
                MatchRule::new(TextRequestLine, Target::Text),
                MatchRule::new(AtLeast(1), Target::Other),
            ],
            1024,
            Duration::from_secs(1),
        );

        let (client, mut server) = tokio::io::duplex(1024);
        server.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

        let classified = classifier.classify(client, AlpnHint::None).await.unwrap();
        assert_eq!(classified.target, Target::Text);

        // Reversed declaration order flips the outcome for the same bytes.
        let reversed = Classifier::new(
            vec![
                MatchRule::new(AtLeast(1), Target::Other),
                MatchRule::new(TextRequestLine, Target::Text),
            ],
            1024,
            Duration::from_secs(1),
        );
        let (client, mut server) = tokio::io::duplex(1024);
        server.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

        let classified = reversed.classify(client, AlpnHint::None).await.unwrap();
        assert_eq!(classified.target, Target::Other);
    }

    #[tokio::test]
    async fn undecided_earlier_rule_blocks_later_match() {
        // The text rule could match after 5 bytes, but rule 0 only decides at 16.
        let classifier = Classifier::new(
            vec![
                MatchRule::new(AtLeast(16), Target::Other),
                MatchRule::new(AtLeast(5), Target::Text),
            ],
            1024,
            Duration::from_secs(1),
        );

        let (client, mut server) = tokio::io::duplex(1024);
        server.write_all(b"0123456789").await.unwrap();
        let pending = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            server.write_all(b"abcdef").await.unwrap();
            server
        });

        let classified = classifier.classify(client, AlpnHint::None).await.unwrap();
        assert_eq!(classified.target, Target::Other);
        drop(pending.await.unwrap());
    }

    #[tokio::test]
    async fn alpn_hint_used_after_preface_declines() {
        let classifier = standard(4096, Duration::from_secs(1));
        let (client, mut server) = tokio::io::duplex(1024);
        server.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();

        let classified = classifier.classify(client, AlpnHint::H2).await.unwrap();
        assert_eq!(classified.target, Target::Rpc);
        assert_eq!(classified.rule, "alpn");
    }

    #[tokio::test]
    async fn request_line_selects_text() {
        let classifier = standard(4096, Duration::from_secs(1));
        let (client, mut server) = tokio::io::duplex(1024);
        server
            .write_all(b"POST /v1/echo HTTP/1.1\r\nContent-Length: 2\r\n\r\n{}")
            .await
            .unwrap();

        let classified = classifier.classify(client, AlpnHint::Http1).await.unwrap();
        assert_eq!(classified.target, Target::Text);
        assert!(classified.stream.pending().starts_with(b"POST /v1/echo"));
    }

    #[tokio::test]
    async fn garbage_is_unroutable() {
        let classifier = standard(4096, Duration::from_secs(1));
        let (client, mut server) = tokio::io::duplex(1024);
        server.write_all(b"\x00\x01\x02garbage").await.unwrap();

        let err = classifier.classify(client, AlpnHint::None).await.unwrap_err();
        assert!(matches!(err, ClassifyError::NoMatchingProtocol { .. }));
    }

    #[tokio::test]
    async fn endless_undecided_input_overflows() {
        let classifier = Classifier::new(
            vec![MatchRule::new(Never, Target::Other)],
            64,
            Duration::from_secs(1),
        );
        let (client, mut server) = tokio::io::duplex(1024);
        server.write_all(&[b'a'; 200]).await.unwrap();

        let err = classifier.classify(client, AlpnHint::None).await.unwrap_err();
        assert!(matches!(err, ClassifyError::BufferOverflow { limit: 64 }));
    }

    #[tokio::test]
    async fn long_request_line_overflows_peek_buffer() {
        let classifier = standard(64, Duration::from_secs(1));
        let (client, mut server) = tokio::io::duplex(1024);
        let mut line = b"GET /".to_vec();
        line.extend_from_slice(&[b'a'; 200]);
        server.write_all(&line).await.unwrap();

        let err = classifier.classify(client, AlpnHint::None).await.unwrap_err();
        assert_eq!(err.reason(), "buffer_overflow");
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let classifier = standard(4096, Duration::from_millis(50));
        let (client, mut server) = tokio::io::duplex(1024);
        server.write_all(b"GET /").await.unwrap();

        let err = classifier.classify(client, AlpnHint::None).await.unwrap_err();
        match err {
            ClassifyError::PeekTimeout { buffered, .. } => assert_eq!(buffered, 5),
            other => panic!("unexpected error: {other}"),
        }
        drop(server);
    }

    #[tokio::test]
    async fn eof_before_match_is_unroutable() {
        let classifier = standard(4096, Duration::from_secs(1));
        let (client, mut server) = tokio::io::duplex(1024);
        server.write_all(b"PRI * HTTP").await.unwrap();
        drop(server);

        let err = classifier.classify(client, AlpnHint::None).await.unwrap_err();
        assert!(matches!(
            err,
            ClassifyError::NoMatchingProtocol { buffered: 10 }
        ));
    }
}
