//! Shared fakes for connection-layer tests

use async_trait::async_trait;
use mongodb::bson::{doc, Document};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use subtrack_core::DatabaseConfig;

use crate::backends::{ConnectionStatus, Connector, DocumentConnection, StatusCell};
use crate::error::{DbError, DbResult};

/// Controllable in-memory connection
pub(crate) struct FakeConnection {
    id: String,
    status: StatusCell,
    ping_latency: Mutex<Duration>,
    ping_error: Mutex<Option<DbError>>,
    ping_calls: AtomicU32,
    server_status_doc: Mutex<Option<Document>>,
}

impl FakeConnection {
    pub fn connected(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: StatusCell::new(ConnectionStatus::Connected),
            ping_latency: Mutex::new(Duration::from_millis(1)),
            ping_error: Mutex::new(None),
            ping_calls: AtomicU32::new(0),
            server_status_doc: Mutex::new(Some(doc! {
                "ok": 1,
                "connections": { "current": 2, "available": 8 },
            })),
        }
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        self.status.set(status);
    }

    pub fn set_ping_latency(&self, latency: Duration) {
        *self.ping_latency.lock() = latency;
    }

    pub fn set_ping_error(&self, error: DbError) {
        *self.ping_error.lock() = Some(error);
    }

    pub fn set_server_status(&self, document: Document) {
        *self.server_status_doc.lock() = Some(document);
    }

    pub fn fail_server_status(&self) {
        *self.server_status_doc.lock() = None;
    }

    pub fn ping_calls(&self) -> u32 {
        self.ping_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentConnection for FakeConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    async fn ping(&self) -> DbResult<Duration> {
        self.ping_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.ping_error.lock().clone() {
            self.status.set(ConnectionStatus::Error);
            return Err(error);
        }
        Ok(*self.ping_latency.lock())
    }

    async fn find_all(&self, _collection: &str, _filter: Document) -> DbResult<Vec<Document>> {
        Ok(Vec::new())
    }

    async fn insert_one(&self, _collection: &str, _document: Document) -> DbResult<String> {
        Ok("000000000000000000000000".to_string())
    }

    async fn update_one(
        &self,
        _collection: &str,
        _filter: Document,
        _update: Document,
    ) -> DbResult<u64> {
        Ok(1)
    }

    async fn delete_one(&self, _collection: &str, _filter: Document) -> DbResult<u64> {
        Ok(1)
    }

    async fn server_status(&self) -> DbResult<Document> {
        match self.server_status_doc.lock().clone() {
            Some(document) => Ok(document),
            None => Err(DbError::new(
                crate::error::ErrorCode::Unknown,
                "serverStatus unavailable",
            )),
        }
    }

    async fn close(&self) -> DbResult<()> {
        self.status.set(ConnectionStatus::Closed);
        Ok(())
    }
}

/// Controllable connector
///
/// Can fail the first N attempts, fail every attempt after the first N
/// successes, and delay each connect. The concrete [`FakeConnection`] of
/// the most recent success stays reachable for status manipulation.
pub(crate) struct FakeConnector {
    attempts: AtomicU32,
    fail_first: u32,
    succeed_only_first: Option<u32>,
    delay: Duration,
    last_uri: Mutex<Option<String>>,
    last_connection: Mutex<Option<Arc<FakeConnection>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self {
            attempts: AtomicU32::new(0),
            fail_first: 0,
            succeed_only_first: None,
            delay: Duration::ZERO,
            last_uri: Mutex::new(None),
            last_connection: Mutex::new(None),
        }
    }

    pub fn failing_first(fail_first: u32) -> Self {
        Self {
            fail_first,
            ..Self::new()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    /// Succeed for the first `n` attempts, then fail every later one
    pub fn succeeding_only_first(n: u32) -> Self {
        Self {
            succeed_only_first: Some(n),
            ..Self::new()
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn last_uri(&self) -> Option<String> {
        self.last_uri.lock().clone()
    }

    pub fn last_connection(&self) -> Option<Arc<FakeConnection>> {
        self.last_connection.lock().clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        uri: &str,
        _config: &DatabaseConfig,
    ) -> DbResult<Arc<dyn DocumentConnection>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_uri.lock() = Some(uri.to_string());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if attempt <= self.fail_first {
            return Err(DbError::connection_failed("connection refused"));
        }
        if let Some(n) = self.succeed_only_first {
            if attempt > n {
                return Err(DbError::connection_failed("connection refused"));
            }
        }

        let connection = Arc::new(FakeConnection::connected(&format!("fake-{}", attempt)));
        *self.last_connection.lock() = Some(Arc::clone(&connection));
        Ok(connection)
    }
}
