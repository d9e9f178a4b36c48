//! Connection lifecycle tracking and drain coordination.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count live connections for shutdown and metrics
//! - Broadcast the drain signal to protocol handlers
//! - Drive a protocol connection to completion, switching it to graceful
//!   shutdown once draining starts

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Tracks active connections and the drain flag.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    /// Current count of active connections.
    active_count: Arc<AtomicU64>,
    /// Flipped to `true` once the listener stops accepting.
    drain_tx: Arc<watch::Sender<bool>>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            active_count: Arc::new(AtomicU64::new(0)),
            drain_tx: Arc::new(tx),
        }
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        let count = self.active_count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_active_connections(count);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Tell every handler to finish in-flight work and stop reusing connections.
    pub fn begin_drain(&self) {
        self.drain_tx.send_replace(true);
    }

    /// Whether draining has started.
    pub fn is_draining(&self) -> bool {
        *self.drain_tx.borrow()
    }

    /// Receiver handed to each connection handler.
    pub fn drain_receiver(&self) -> watch::Receiver<bool> {
        self.drain_tx.subscribe()
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let remaining = self.active_count.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::set_active_connections(remaining);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

/// Await a protocol connection, calling `graceful` once when draining starts.
///
/// `graceful` is the protocol's own shutdown hook (HTTP/2 GOAWAY, HTTP/1
/// keep-alive off). The connection keeps running until it finishes by itself
/// or its task is aborted at the drain deadline.
pub async fn drive_until_drained<C, T>(
    mut conn: Pin<&mut C>,
    mut drain: watch::Receiver<bool>,
    graceful: fn(Pin<&mut C>),
) -> T
where
    C: Future<Output = T>,
{
    let mut draining = *drain.borrow_and_update();
    if draining {
        graceful(conn.as_mut());
    }

    loop {
        tokio::select! {
            out = conn.as_mut() => return out,
            changed = drain.changed(), if !draining => {
                if changed.is_err() || *drain.borrow_and_update() {
                    draining = true;
                    graceful(conn.as_mut());
                }
            }
        }
    }
}
