//! Connection Manager
//!
//! Orchestrates connection acquisition for the whole process. Pooled
//! acquisition coalesces concurrent callers into a single connect attempt
//! through the [`ConnectionCache`]; direct connections are created per
//! caller and tracked for [`ConnectionManager::cleanup`]. During static
//! generation the substitute backend is returned without any network
//! activity.

use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use subtrack_core::{DatabaseConfig, EnvConfig};

use crate::backends::{
    substitute_required, BuildContext, Connector, DocumentConnection, MongoConnector,
    SubstituteConnection,
};
use crate::connection::cache::{AcquisitionResult, Admission, ConnectionCache};
use crate::connection::record::{ConnectionEvent, ConnectionRecord, ConnectionState};
use crate::error::{classify_operation, DbError, DbResult, OperationKind};
use crate::retry::RetryPolicy;
use crate::uri::normalize_uri;

/// Per-call connection options; never persisted
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptions {
    /// Create a dedicated connection instead of using the shared pool
    pub direct: bool,
    /// Override the configured database name
    pub db_name: Option<String>,
    /// Override the acquisition wait timeout
    pub timeout: Option<Duration>,
    /// Override the server selection timeout
    pub server_selection_timeout: Option<Duration>,
    /// Verbose acquisition logging
    pub debug: bool,
    /// Force the substitute connection regardless of environment
    pub force_substitute: bool,
}

impl ConnectionOptions {
    /// Options for a dedicated, caller-owned connection
    pub fn direct() -> Self {
        Self {
            direct: true,
            ..Self::default()
        }
    }
}

struct TrackedConnection {
    connection: Arc<dyn DocumentConnection>,
    record: Mutex<ConnectionRecord>,
}

/// Process-wide connection orchestrator
pub struct ConnectionManager {
    config: DatabaseConfig,
    connector: Arc<dyn Connector>,
    cache: Arc<ConnectionCache>,
    substitute: OnceCell<Arc<SubstituteConnection>>,
    direct: DashMap<String, TrackedConnection>,
    pooled_record: Arc<Mutex<Option<ConnectionRecord>>>,
}

static GLOBAL_MANAGER: Lazy<ConnectionManager> = Lazy::new(|| {
    let config = match DatabaseConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(error = %err, "Database configuration incomplete; using defaults");
            DatabaseConfig::default()
        }
    };
    ConnectionManager::new(config)
});

impl ConnectionManager {
    /// Create a manager with the real MongoDB connector and a fresh cache
    pub fn new(config: DatabaseConfig) -> Self {
        Self::with_connector(
            config,
            Arc::new(MongoConnector::new()),
            Arc::new(ConnectionCache::new()),
        )
    }

    /// Create a manager with an injected connector and cache
    pub fn with_connector(
        config: DatabaseConfig,
        connector: Arc<dyn Connector>,
        cache: Arc<ConnectionCache>,
    ) -> Self {
        Self {
            config,
            connector,
            cache,
            substitute: OnceCell::new(),
            direct: DashMap::new(),
            pooled_record: Arc::new(Mutex::new(None)),
        }
    }

    /// The process-wide manager, configured from the environment
    pub fn global() -> &'static ConnectionManager {
        &GLOBAL_MANAGER
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Currently cached pooled connection, if any
    pub fn cached_connection(&self) -> Option<Arc<dyn DocumentConnection>> {
        self.cache.cached()
    }

    /// Acquire a connection per `options`
    ///
    /// Build contexts and forced substitution short-circuit to the
    /// substitute backend in both pooled and direct modes, without any
    /// network activity.
    pub async fn get_connection(
        &self,
        options: &ConnectionOptions,
    ) -> DbResult<Arc<dyn DocumentConnection>> {
        let context = BuildContext::detect();
        let force = options.force_substitute || self.config.force_substitute;
        if substitute_required(force, &context) {
            if options.debug {
                tracing::debug!(direct = options.direct, "Returning substitute connection");
            }
            return Ok(self.substitute_connection(options));
        }

        if options.debug {
            tracing::debug!(direct = options.direct, "Acquiring database connection");
        }

        if options.direct {
            self.connect_direct(options).await
        } else {
            self.acquire_pooled(options).await
        }
    }

    /// Run `operation` against a pooled connection with standardized
    /// classification and logging of failures
    pub async fn with_connection<T, F, Fut>(
        &self,
        operation: &str,
        kind: OperationKind,
        run: F,
    ) -> DbResult<T>
    where
        F: FnOnce(Arc<dyn DocumentConnection>) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let connection = self.get_connection(&ConnectionOptions::default()).await?;

        match run(connection).await {
            Ok(value) => Ok(value),
            Err(err) => {
                let classified = classify_operation(&err, kind, Some(operation));
                tracing::error!(
                    operation,
                    code = %classified.code,
                    cause = ?classified.cause,
                    "Database operation failed: {}",
                    classified.message
                );
                Err(classified)
            }
        }
    }

    /// Close every direct connection this manager created; the pooled
    /// connection is never touched. Returns the number closed.
    pub async fn cleanup(&self) -> usize {
        let pooled_id = self.cache.cached().map(|conn| conn.id().to_string());

        let entries: Vec<(String, Arc<dyn DocumentConnection>)> = self
            .direct
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(&entry.value().connection)))
            .collect();

        let mut closed = 0;
        for (id, connection) in entries {
            if pooled_id.as_deref() == Some(id.as_str()) {
                continue;
            }
            if let Err(err) = connection.close().await {
                tracing::warn!(id = %id, error = %err, "Failed to close direct connection");
            }
            if let Some((_, tracked)) = self.direct.remove(&id) {
                tracked.record.lock().apply(ConnectionEvent::Closed);
            }
            closed += 1;
        }

        tracing::debug!(closed, "Cleaned up direct connections");
        closed
    }

    /// Unconditionally close the pooled connection and clear the cache
    ///
    /// Intended for process shutdown or test teardown only; regular callers
    /// must never close the shared connection.
    pub async fn disconnect_all(&self) {
        if let Some(connection) = self.cache.take() {
            if let Err(err) = connection.close().await {
                tracing::warn!(id = connection.id(), error = %err, "Error closing pooled connection");
            }
            tracing::info!(id = connection.id(), "Pooled connection closed");
        }

        if let Some(record) = self.pooled_record.lock().as_mut() {
            record.apply(ConnectionEvent::Closed);
        }
        *self.pooled_record.lock() = None;
    }

    /// Number of tracked direct connections
    pub fn direct_count(&self) -> usize {
        self.direct.len()
    }

    /// State of the pooled connection's lifecycle record
    pub fn pooled_state(&self) -> Option<ConnectionState> {
        self.pooled_record.lock().as_ref().map(|r| r.state())
    }

    fn substitute_connection(&self, options: &ConnectionOptions) -> Arc<dyn DocumentConnection> {
        if options.direct {
            Arc::new(SubstituteConnection::new())
        } else {
            Arc::clone(
                self.substitute
                    .get_or_init(|| Arc::new(SubstituteConnection::new())),
            ) as Arc<dyn DocumentConnection>
        }
    }

    fn effective_config(&self, options: &ConnectionOptions) -> DatabaseConfig {
        let mut config = self.config.clone();
        if let Some(db_name) = &options.db_name {
            config.db_name = db_name.clone();
        }
        if let Some(timeout) = options.server_selection_timeout {
            config.server_selection_timeout = timeout;
        }
        config
    }

    async fn connect_direct(
        &self,
        options: &ConnectionOptions,
    ) -> DbResult<Arc<dyn DocumentConnection>> {
        let config = self.effective_config(options);
        let uri = normalize_uri(&config.url, &config.db_name);
        let policy = RetryPolicy::from_config(&config);
        let connector = Arc::clone(&self.connector);

        let connection = policy
            .execute(|| {
                let connector = Arc::clone(&connector);
                let uri = uri.clone();
                let config = config.clone();
                async move { connector.connect(&uri, &config).await }
            })
            .await?;

        let mut record = ConnectionRecord::new(config.max_reconnect_attempts);
        record.apply(ConnectionEvent::Connected);
        self.direct.insert(
            connection.id().to_string(),
            TrackedConnection {
                connection: Arc::clone(&connection),
                record: Mutex::new(record),
            },
        );

        tracing::info!(id = connection.id(), "Direct connection established");
        Ok(connection)
    }

    async fn acquire_pooled(
        &self,
        options: &ConnectionOptions,
    ) -> DbResult<Arc<dyn DocumentConnection>> {
        match self.cache.admit() {
            Admission::Cached(connection) => {
                tracing::debug!(id = connection.id(), "Reusing cached pooled connection");
                Ok(connection)
            }
            Admission::Join(receiver) => self.await_in_flight(receiver, options).await,
            Admission::Lead {
                receiver,
                invalidated,
            } => {
                if self.reconnect_budget_exhausted(invalidated) {
                    let err = DbError::connection_failed(
                        "Automatic reconnection disabled after repeated failures",
                    );
                    self.cache.complete(Err(err.clone()));
                    return Err(err);
                }

                self.spawn_acquisition(options);
                self.await_in_flight(receiver, options).await
            }
        }
    }

    /// Advance the pooled record on a lost connection and report whether
    /// the reconnect budget is spent
    ///
    /// Each leader-side re-acquisition after a loss counts as one reconnect
    /// attempt; a fresh record (installed on the next successful connect)
    /// resets the budget, and `disconnect_all` clears it entirely.
    fn reconnect_budget_exhausted(&self, invalidated: bool) -> bool {
        let mut guard = self.pooled_record.lock();
        match guard.as_mut() {
            None => false,
            Some(record) if record.state().is_terminal() => {
                record.state() == ConnectionState::Failed
            }
            Some(record) => {
                if invalidated || record.state() == ConnectionState::Reconnecting {
                    record.apply(ConnectionEvent::Disconnected) == ConnectionState::Failed
                } else {
                    false
                }
            }
        }
    }

    /// Start the shared acquisition as a detached task
    ///
    /// Spawning keeps the attempt alive even when every waiter times out or
    /// goes away; a late success still populates the cache for later
    /// callers. Completion always clears the in-flight slot.
    fn spawn_acquisition(&self, options: &ConnectionOptions) {
        let config = self.effective_config(options);
        let uri = normalize_uri(&config.url, &config.db_name);
        let connector = Arc::clone(&self.connector);
        let cache = Arc::clone(&self.cache);
        let pooled_record = Arc::clone(&self.pooled_record);

        tokio::spawn(async move {
            let policy = RetryPolicy::from_config(&config);
            let result: AcquisitionResult = policy
                .execute(|| {
                    let connector = Arc::clone(&connector);
                    let uri = uri.clone();
                    let config = config.clone();
                    async move { connector.connect(&uri, &config).await }
                })
                .await;

            match &result {
                Ok(connection) => {
                    // A fresh record replaces any previous one, resetting
                    // the reconnect budget.
                    let mut record = ConnectionRecord::new(config.max_reconnect_attempts);
                    record.apply(ConnectionEvent::Connected);
                    *pooled_record.lock() = Some(record);
                    tracing::info!(id = connection.id(), "Pooled connection established");
                }
                Err(err) => {
                    tracing::error!(code = %err.code, "Pooled connection acquisition failed: {}", err.message);
                }
            }

            cache.complete(result);
        });
    }

    async fn await_in_flight(
        &self,
        mut receiver: tokio::sync::broadcast::Receiver<AcquisitionResult>,
        options: &ConnectionOptions,
    ) -> DbResult<Arc<dyn DocumentConnection>> {
        let wait = options.timeout.unwrap_or(self.config.acquire_wait_timeout);

        match tokio::time::timeout(wait, receiver.recv()).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(DbError::connection_failed(
                "Connection acquisition was abandoned",
            )),
            Err(_) => {
                tracing::warn!(
                    wait_ms = wait.as_millis() as u64,
                    "Timed out waiting for in-flight connection acquisition"
                );
                Err(DbError::timeout())
            }
        }
    }
}
