//! Built-in predicates, in the order the server declares them.
//!
//! 1. [`RpcPreface`]: the HTTP/2 client preface that opens every RPC
//!    connection. Unambiguous and cheap, so it goes first.
//! 2. [`AlpnNegotiated`]: the TLS handshake already agreed on the RPC
//!    protocol. A secondary signal; not every peer sends ALPN.
//! 3. [`TextRequestLine`]: a complete, well-formed HTTP/1.x request line.
//!    Least specific, so it goes last.

use crate::classify::rule::{PeekContext, Predicate, Verdict};
use crate::net::AlpnHint;

/// The HTTP/2 client connection preface.
pub const RPC_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Longest method token accepted on a request line.
const MAX_METHOD_LEN: usize = 16;

/// Matches the binary RPC protocol's connection preface.
#[derive(Debug, Clone, Copy, Default)]
pub struct RpcPreface;

impl Predicate for RpcPreface {
    fn name(&self) -> &'static str {
        "rpc_preface"
    }

    fn evaluate(&self, ctx: &PeekContext<'_>) -> Verdict {
        let buf = ctx.buffered;
        if buf.len() < RPC_PREFACE.len() {
            if RPC_PREFACE.starts_with(buf) {
                Verdict::NeedMore
            } else {
                Verdict::NoMatch
            }
        } else if buf.starts_with(RPC_PREFACE) {
            Verdict::Match
        } else {
            Verdict::NoMatch
        }
    }
}

/// Matches when TLS negotiated the given application protocol.
#[derive(Debug, Clone, Copy)]
pub struct AlpnNegotiated(pub AlpnHint);

impl Predicate for AlpnNegotiated {
    fn name(&self) -> &'static str {
        "alpn"
    }

    fn evaluate(&self, ctx: &PeekContext<'_>) -> Verdict {
        if self.0 != AlpnHint::None && ctx.alpn == self.0 {
            Verdict::Match
        } else {
            Verdict::NoMatch
        }
    }
}

/// Matches a well-formed `METHOD SP target SP HTTP/1.x CRLF` line.
///
/// Rejects as soon as a byte can no longer be part of a valid line, so
/// garbage input fails fast instead of filling the peek buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextRequestLine;

#[derive(Clone, Copy)]
enum LineState {
    Method(usize),
    Target(usize),
    Version(usize),
    Cr,
}

impl Predicate for TextRequestLine {
    fn name(&self) -> &'static str {
        "text_request_line"
    }

    fn evaluate(&self, ctx: &PeekContext<'_>) -> Verdict {
        const VERSION: &[u8] = b"HTTP/1.";

        let mut state = LineState::Method(0);
        for &b in ctx.buffered {
            state = match state {
                LineState::Method(n) if b == b' ' && n > 0 => LineState::Target(0),
                LineState::Method(n) if is_tchar(b) && n < MAX_METHOD_LEN => LineState::Method(n + 1),
                LineState::Target(n) if b == b' ' && n > 0 => LineState::Version(0),
                LineState::Target(n) if (0x21..=0x7e).contains(&b) => LineState::Target(n + 1),
                LineState::Version(n) if n < VERSION.len() && b == VERSION[n] => {
                    LineState::Version(n + 1)
                }
                LineState::Version(n) if n == VERSION.len() && b.is_ascii_digit() => LineState::Cr,
                LineState::Cr if b == b'\r' => return verdict_after_cr(ctx.buffered),
                _ => return Verdict::NoMatch,
            };
        }
        Verdict::NeedMore
    }
}

fn verdict_after_cr(buf: &[u8]) -> Verdict {
    match buf.iter().position(|&b| b == b'\r') {
        Some(i) if i + 1 < buf.len() => {
            if buf[i + 1] == b'\n' {
                Verdict::Match
            } else {
                Verdict::NoMatch
            }
        }
        _ => Verdict::NeedMore,
    }
}

/// RFC 9110 token characters.
fn is_tchar(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}
