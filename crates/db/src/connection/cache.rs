//! Process-wide connection cache with request coalescing
//!
//! The cache holds at most one pooled connection and at most one in-flight
//! acquisition. Concurrent callers during an outage all join the same
//! attempt: the first becomes the leader, everyone else subscribes to the
//! leader's broadcast result. Lifetime runs from process start until
//! `disconnect_all` clears it; the manager receives the cache by injection
//! so tests can run isolated instances.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::backends::{ConnectionStatus, DocumentConnection};
use crate::error::DbError;

/// Result shared between the leader and all waiters of one acquisition
pub type AcquisitionResult = Result<Arc<dyn DocumentConnection>, DbError>;

/// Outcome of asking the cache for admission
pub enum Admission {
    /// The cached connection is live; use it
    Cached(Arc<dyn DocumentConnection>),
    /// Caller is the leader and must drive the acquisition, completing it
    /// via [`ConnectionCache::complete`]
    Lead {
        receiver: broadcast::Receiver<AcquisitionResult>,
        /// Whether a stale cached connection was invalidated on admission
        invalidated: bool,
    },
    /// Another acquisition is in flight; await its result
    Join(broadcast::Receiver<AcquisitionResult>),
}

struct CacheState {
    pooled: Option<Arc<dyn DocumentConnection>>,
    in_flight: Option<broadcast::Sender<AcquisitionResult>>,
}

/// Cache of the single pooled connection and its in-flight acquisition
pub struct ConnectionCache {
    state: Mutex<CacheState>,
}

impl ConnectionCache {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CacheState {
                pooled: None,
                in_flight: None,
            }),
        }
    }

    /// Admit a caller to the pooled connection
    ///
    /// A cached connection whose status is no longer connected is
    /// invalidated here, before a new acquisition begins.
    pub fn admit(&self) -> Admission {
        let mut state = self.state.lock();
        let mut invalidated = false;

        if let Some(conn) = &state.pooled {
            if conn.status() == ConnectionStatus::Connected {
                return Admission::Cached(Arc::clone(conn));
            }
            tracing::warn!(
                id = conn.id(),
                status = %conn.status(),
                "Invalidating stale pooled connection"
            );
            state.pooled = None;
            invalidated = true;
        }

        if let Some(sender) = &state.in_flight {
            return Admission::Join(sender.subscribe());
        }

        let (sender, receiver) = broadcast::channel(1);
        state.in_flight = Some(sender);
        Admission::Lead {
            receiver,
            invalidated,
        }
    }

    /// Complete the in-flight acquisition and notify every waiter
    ///
    /// The in-flight slot is cleared unconditionally so a later caller can
    /// retry after a failure.
    pub fn complete(&self, result: AcquisitionResult) {
        let mut state = self.state.lock();

        if let Ok(conn) = &result {
            state.pooled = Some(Arc::clone(conn));
        }

        if let Some(sender) = state.in_flight.take() {
            // Waiters may have timed out and dropped their receivers.
            let _ = sender.send(result);
        }
    }

    /// Currently cached pooled connection, if any
    pub fn cached(&self) -> Option<Arc<dyn DocumentConnection>> {
        self.state.lock().pooled.clone()
    }

    /// Remove and return the pooled connection
    pub fn take(&self) -> Option<Arc<dyn DocumentConnection>> {
        self.state.lock().pooled.take()
    }
}

impl Default for ConnectionCache {
    fn default() -> Self {
        Self::new()
    }
}
