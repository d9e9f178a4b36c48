//! Multiplexing server.
//!
//! # Responsibilities
//! - Accept connections under the connection limit
//! - Terminate TLS (or not, in plaintext mode) and classify the stream
//! - Hand each connection to exactly one protocol handler
//! - Stop accepting on shutdown, drain, then abort stragglers
//!
//! # Design Decisions
//! - One task per connection; handshake and classification never block accept
//! - Per-connection failures are logged and counted, never propagated
//! - TLS and plaintext differ only in how the byte stream is produced

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::classify::{Classifier, Protocol};
use crate::net::connection::{drive_until_drained, ConnectionGuard};
use crate::net::listener::{ConnectionPermit, ListenerError};
use crate::net::{AlpnHint, ConnectionTracker, HandshakeError, Listener, TlsTerminator};
use crate::observability::metrics;
use crate::rpc::RpcService;

/// How accepted sockets become byte streams.
#[derive(Clone)]
pub enum Transport {
    Tls(TlsTerminator),
    /// Degraded mode for tests and local development.
    Plaintext,
}

impl Transport {
    pub fn name(&self) -> &'static str {
        match self {
            Transport::Tls(_) => "tls",
            Transport::Plaintext => "plaintext",
        }
    }
}

/// Shared, read-only state handed to every connection task.
#[derive(Clone)]
struct ConnectionContext {
    transport: Transport,
    classifier: Arc<Classifier<Protocol>>,
    rpc: RpcService,
    text: Router,
    tracker: ConnectionTracker,
}

/// One listener serving both protocol families.
pub struct MuxServer {
    listener: Listener,
    context: ConnectionContext,
    drain_timeout: Duration,
}

impl MuxServer {
    pub fn new(
        listener: Listener,
        transport: Transport,
        classifier: Classifier<Protocol>,
        rpc: RpcService,
        text: Router,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            listener,
            context: ConnectionContext {
                transport,
                classifier: Arc::new(classifier),
                rpc,
                text,
                tracker: ConnectionTracker::new(),
            },
            drain_timeout,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.context.tracker
    }

    /// Serve until `shutdown` fires, then drain.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ListenerError> {
        let MuxServer {
            listener,
            context,
            drain_timeout,
        } = self;

        tracing::info!(
            address = ?listener.local_addr().ok(),
            transport = context.transport.name(),
            rules = context.classifier.rules().len(),
            "Server accepting connections"
        );

        let mut tasks = JoinSet::new();
        let outcome = loop {
            tokio::select! {
                _ = shutdown.recv() => break Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        metrics::record_connection_accepted();
                        let guard = context.tracker.track();
                        let span = tracing::info_span!(
                            "connection",
                            connection_id = %guard.id(),
                            peer_addr = %peer,
                        );
                        tasks.spawn(
                            handle_connection(context.clone(), stream, permit, guard).instrument(span),
                        );
                    }
                    Err(ListenerError::Closed) => break Err(ListenerError::Closed),
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!(error = %e, "Connection task panicked");
                        }
                    }
                }
            }
        };

        drop(listener);
        drain(&context.tracker, tasks, drain_timeout).await;
        outcome
    }
}

/// Flip the drain flag and wait for connections, aborting at the deadline.
async fn drain(tracker: &ConnectionTracker, mut tasks: JoinSet<()>, timeout: Duration) {
    tracker.begin_drain();
    tracing::info!(
        active_connections = tracker.active_count(),
        timeout_secs = timeout.as_secs(),
        "Listener closed, draining connections"
    );

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            joined = tasks.join_next() => {
                if joined.is_none() {
                    tracing::info!("All connections drained");
                    return;
                }
            }
            _ = &mut deadline => {
                tracing::warn!(
                    remaining = tasks.len(),
                    "Drain deadline reached, closing remaining connections"
                );
                tasks.abort_all();
                while tasks.join_next().await.is_some() {}
                return;
            }
        }
    }
}

async fn handle_connection(
    context: ConnectionContext,
    stream: TcpStream,
    permit: ConnectionPermit,
    guard: ConnectionGuard,
) {
    let _permit = permit;
    let _guard = guard;
    let _ = stream.set_nodelay(true);

    match &context.transport {
        Transport::Plaintext => context.serve(stream, AlpnHint::None).await,
        Transport::Tls(terminator) => match terminator.accept(stream).await {
            Ok((tls, alpn)) => context.serve(tls, alpn).await,
            Err(e) => {
                metrics::record_handshake_failure(e.reason());
                match e {
                    HandshakeError::PeerAborted(_) | HandshakeError::Timeout(_) => {
                        tracing::debug!(error = %e, "TLS handshake failed")
                    }
                    HandshakeError::Rejected(_) => tracing::warn!(error = %e, "TLS handshake rejected"),
                }
            }
        },
    }
}

impl ConnectionContext {
    /// Classify a decrypted stream and run its handler to completion.
    async fn serve<S>(&self, stream: S, alpn: AlpnHint)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let classified = match self.classifier.classify(stream, alpn).await {
            Ok(classified) => classified,
            Err(e) => {
                metrics::record_classify_failure(e.reason());
                tracing::debug!(error = %e, reason = e.reason(), "Unroutable connection closed");
                return;
            }
        };

        let protocol = classified.target;
        metrics::record_classified(protocol.as_str(), classified.rule);
        tracing::debug!(
            protocol = %protocol,
            rule = classified.rule,
            peeked = classified.stream.pending().len(),
            "Connection classified"
        );

        let result = match protocol {
            Protocol::Rpc => {
                self.rpc
                    .serve_connection(classified.stream, self.tracker.drain_receiver())
                    .await
            }
            Protocol::Text => self.serve_text(classified.stream).await,
        };

        match result {
            Ok(()) => tracing::debug!(protocol = %protocol, "Connection closed"),
            Err(e) => tracing::debug!(protocol = %protocol, error = %e, "Connection ended with error"),
        }
    }

    async fn serve_text<S>(&self, stream: S) -> Result<(), hyper::Error>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        // A connection classified after drain began still gets its request,
        // but no keep-alive.
        let draining = self.tracker.is_draining();
        let conn = http1::Builder::new()
            .keep_alive(!draining)
            .serve_connection(TokioIo::new(stream), TowerToHyperService::new(self.text.clone()));
        tokio::pin!(conn);

        if draining {
            conn.await
        } else {
            drive_until_drained(conn.as_mut(), self.tracker.drain_receiver(), |c| {
                c.graceful_shutdown()
            })
            .await
        }
    }
}
