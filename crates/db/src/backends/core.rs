//! Core Connection Contract
//!
//! These traits abstract the document-database driver behind an
//! object-safe interface so the manager, the health monitor, and the CRUD
//! handlers behave identically against a real or a substitute connection.

use async_trait::async_trait;
use mongodb::bson::Document;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use subtrack_core::DatabaseConfig;

use crate::error::DbResult;

/// Lifecycle status of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionStatus {
    Connecting = 0,
    Connected = 1,
    Disconnected = 2,
    Error = 3,
    Closed = 4,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Error => "error",
            ConnectionStatus::Closed => "closed",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionStatus::Connecting,
            1 => ConnectionStatus::Connected,
            2 => ConnectionStatus::Disconnected,
            3 => ConnectionStatus::Error,
            _ => ConnectionStatus::Closed,
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free holder for a connection's lifecycle status
#[derive(Debug)]
pub struct StatusCell(AtomicU8);

impl StatusCell {
    pub fn new(status: ConnectionStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    pub fn get(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, status: ConnectionStatus) {
        self.0.store(status as u8, Ordering::Release);
    }
}

/// Operational contract of a live document-database connection
///
/// Everything the application layer is allowed to do with a connection goes
/// through this trait; callers never see the driver types directly.
#[async_trait]
pub trait DocumentConnection: Send + Sync {
    /// Opaque identifier for logs and diagnostics
    fn id(&self) -> &str;

    /// Current lifecycle status
    fn status(&self) -> ConnectionStatus;

    /// Round-trip liveness probe, returning the measured latency
    async fn ping(&self) -> DbResult<Duration>;

    /// Fetch all documents matching `filter`
    async fn find_all(&self, collection: &str, filter: Document) -> DbResult<Vec<Document>>;

    /// Insert a document, returning its identifier
    async fn insert_one(&self, collection: &str, document: Document) -> DbResult<String>;

    /// Update the first document matching `filter`, returning the modified count
    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DbResult<u64>;

    /// Delete the first document matching `filter`, returning the deleted count
    async fn delete_one(&self, collection: &str, filter: Document) -> DbResult<u64>;

    /// Admin server-status document for metrics gathering
    async fn server_status(&self) -> DbResult<Document>;

    /// Release the connection's resources
    async fn close(&self) -> DbResult<()>;
}

/// Factory seam for establishing real connections
///
/// The manager drives acquisition through this trait so tests can inject
/// deterministic connectors.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        uri: &str,
        config: &DatabaseConfig,
    ) -> DbResult<Arc<dyn DocumentConnection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_cell_roundtrip() {
        let cell = StatusCell::new(ConnectionStatus::Connecting);
        assert_eq!(cell.get(), ConnectionStatus::Connecting);

        cell.set(ConnectionStatus::Connected);
        assert_eq!(cell.get(), ConnectionStatus::Connected);

        cell.set(ConnectionStatus::Closed);
        assert_eq!(cell.get(), ConnectionStatus::Closed);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ConnectionStatus::Connected.as_str(), "connected");
        assert_eq!(ConnectionStatus::Error.to_string(), "error");
    }
}
