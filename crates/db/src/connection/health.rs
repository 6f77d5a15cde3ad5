//! Connection Health Monitoring
//!
//! Every check is an independent run: ping the connection, gather
//! auxiliary metrics best-effort, and compute a tri-state verdict against
//! the configured thresholds. Continuous mode repeats the check on a fixed
//! interval and retains only the most recent snapshot.

use chrono::{DateTime, Utc};
use mongodb::bson::{Bson, Document};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use subtrack_core::DatabaseConfig;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::backends::{ConnectionStatus, DocumentConnection};
use crate::connection::manager::ConnectionManager;
use crate::error::ErrorCode;

const NO_CONNECTION_MESSAGE: &str = "No database connection available";

/// Tri-state health verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Connection-pool gauge readings
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionPoolMetrics {
    pub current: i64,
    pub available: i64,
    pub utilization_percentage: f64,
}

/// Replication gauge readings
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationMetrics {
    pub lag_ms: u64,
}

/// Auxiliary metrics gathered alongside a successful ping
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthMetrics {
    pub connections: ConnectionPoolMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opcounters: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication: Option<ReplicationMetrics>,
}

/// Snapshot produced by one health check
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    pub status: HealthState,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<HealthMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl HealthCheckResult {
    fn unavailable() -> Self {
        Self {
            status: HealthState::Unhealthy,
            latency_ms: 0,
            metrics: None,
            message: Some(NO_CONNECTION_MESSAGE.to_string()),
            timestamp: Utc::now(),
        }
    }

    fn unhealthy(latency_ms: u64, message: String) -> Self {
        Self {
            status: HealthState::Unhealthy,
            latency_ms,
            metrics: None,
            message: Some(message),
            timestamp: Utc::now(),
        }
    }
}

/// Thresholds governing the degraded/unhealthy ladder
#[derive(Debug, Clone)]
pub struct HealthThresholds {
    pub pool_warn_utilization: f64,
    pub pool_critical_utilization: f64,
    pub repl_lag_threshold: Duration,
    pub slow_op_threshold: Duration,
}

impl HealthThresholds {
    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self {
            pool_warn_utilization: config.pool_warn_utilization,
            pool_critical_utilization: config.pool_critical_utilization,
            repl_lag_threshold: config.repl_lag_threshold,
            slow_op_threshold: config.slow_op_threshold,
        }
    }
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self::from_config(&DatabaseConfig::default())
    }
}

/// Health monitor over a borrowed connection
///
/// The monitor never owns a connection; each check runs against whichever
/// connection is passed in (continuous mode borrows the cached pooled one).
pub struct HealthMonitor {
    thresholds: HealthThresholds,
    check_interval: Duration,
    ping_timeout: Duration,
    last: RwLock<Option<HealthCheckResult>>,
}

impl HealthMonitor {
    pub fn new(
        thresholds: HealthThresholds,
        check_interval: Duration,
        ping_timeout: Duration,
    ) -> Self {
        Self {
            thresholds,
            check_interval,
            ping_timeout,
            last: RwLock::new(None),
        }
    }

    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self::new(
            HealthThresholds::from_config(config),
            config.health_check_interval,
            config.socket_timeout,
        )
    }

    /// Most recent snapshot, if a check has run
    pub fn last_result(&self) -> Option<HealthCheckResult> {
        self.last.read().clone()
    }

    /// Run one health check and retain the snapshot
    pub async fn check(
        &self,
        connection: Option<&Arc<dyn DocumentConnection>>,
    ) -> HealthCheckResult {
        let result = self.run_check(connection).await;
        *self.last.write() = Some(result.clone());
        result
    }

    async fn run_check(
        &self,
        connection: Option<&Arc<dyn DocumentConnection>>,
    ) -> HealthCheckResult {
        let Some(connection) = connection else {
            return HealthCheckResult::unavailable();
        };
        if connection.status() != ConnectionStatus::Connected {
            return HealthCheckResult::unavailable();
        }

        let started = Instant::now();
        match tokio::time::timeout(self.ping_timeout, connection.ping()).await {
            Err(_) => {
                let elapsed = started.elapsed().as_millis() as u64;
                tracing::warn!(latency_ms = elapsed, "Health ping timed out");
                HealthCheckResult::unhealthy(
                    elapsed,
                    ErrorCode::ConnectionTimeout.user_message().to_string(),
                )
            }
            Ok(Err(err)) => {
                let elapsed = started.elapsed().as_millis() as u64;
                tracing::warn!(latency_ms = elapsed, code = %err.code, "Health ping failed: {}", err.message);
                HealthCheckResult::unhealthy(elapsed, err.message)
            }
            Ok(Ok(latency)) => self.evaluate(connection, latency).await,
        }
    }

    /// Compute the verdict for a connection whose ping succeeded
    async fn evaluate(
        &self,
        connection: &Arc<dyn DocumentConnection>,
        latency: Duration,
    ) -> HealthCheckResult {
        let mut status = HealthState::Healthy;
        let mut notes: Vec<String> = Vec::new();

        // Auxiliary metrics are best-effort; losing them costs at most one
        // step on the ladder.
        let metrics = match connection.server_status().await {
            Ok(status_doc) => Some(extract_metrics(&status_doc)),
            Err(err) => {
                tracing::debug!(error = %err, "Failed to gather auxiliary health metrics");
                degrade(&mut status, &mut notes, "auxiliary metrics unavailable");
                None
            }
        };

        if let Some(metrics) = &metrics {
            let utilization = metrics.connections.utilization_percentage;
            if utilization > self.thresholds.pool_critical_utilization {
                status = HealthState::Unhealthy;
                notes.push(format!(
                    "pool utilization {:.1}% above critical threshold",
                    utilization
                ));
            } else if utilization > self.thresholds.pool_warn_utilization {
                degrade(
                    &mut status,
                    &mut notes,
                    &format!("pool utilization {:.1}% above warning threshold", utilization),
                );
            }

            if let Some(replication) = &metrics.replication {
                if replication.lag_ms > self.thresholds.repl_lag_threshold.as_millis() as u64 {
                    degrade(
                        &mut status,
                        &mut notes,
                        &format!("replication lag {}ms above threshold", replication.lag_ms),
                    );
                }
            }
        }

        if latency > self.thresholds.slow_op_threshold {
            degrade(
                &mut status,
                &mut notes,
                &format!("slow ping: {}ms", latency.as_millis()),
            );
        }

        HealthCheckResult {
            status,
            latency_ms: latency.as_millis() as u64,
            metrics,
            message: if notes.is_empty() {
                None
            } else {
                Some(notes.join("; "))
            },
            timestamp: Utc::now(),
        }
    }

    /// Run continuous monitoring against the manager's pooled connection
    ///
    /// Checks never overlap: the next tick is not processed while a check
    /// is still running, and only the most recent snapshot is retained.
    pub fn spawn(self: Arc<Self>, manager: Arc<ConnectionManager>) -> MonitorHandle {
        let monitor = self;
        let handle = tokio::spawn(async move {
            let mut ticker = interval(monitor.check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let connection = manager.cached_connection();
                monitor.check(connection.as_ref()).await;
            }
        });

        MonitorHandle { handle }
    }
}

/// Handle to a running continuous monitor
pub struct MonitorHandle {
    handle: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn stop(self) {
        self.handle.abort();
    }
}

/// Raise healthy to degraded; an unhealthy verdict is never lowered
fn degrade(status: &mut HealthState, notes: &mut Vec<String>, note: &str) {
    if *status == HealthState::Healthy {
        *status = HealthState::Degraded;
    }
    notes.push(note.to_string());
}

fn extract_metrics(status_doc: &Document) -> HealthMetrics {
    let connections = status_doc.get_document("connections").ok();
    let current = connections.and_then(|d| get_number(d, "current")).unwrap_or(0);
    let available = connections
        .and_then(|d| get_number(d, "available"))
        .unwrap_or(0);

    let total = current + available;
    let utilization_percentage = if total > 0 {
        (current as f64 / total as f64) * 100.0
    } else {
        0.0
    };

    let opcounters = status_doc
        .get_document("opcounters")
        .ok()
        .and_then(|d| serde_json::to_value(d).ok());

    let replication = status_doc
        .get_document("repl")
        .ok()
        .and_then(|d| get_number(d, "lagMillis"))
        .map(|lag| ReplicationMetrics { lag_ms: lag as u64 });

    HealthMetrics {
        connections: ConnectionPoolMetrics {
            current,
            available,
            utilization_percentage,
        },
        opcounters,
        replication,
    }
}

fn get_number(doc: &Document, key: &str) -> Option<i64> {
    match doc.get(key) {
        Some(Bson::Int32(value)) => Some(*value as i64),
        Some(Bson::Int64(value)) => Some(*value),
        Some(Bson::Double(value)) => Some(*value as i64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::cache::ConnectionCache;
    use crate::connection::manager::{ConnectionManager, ConnectionOptions};
    use crate::connection::test_support::{FakeConnection, FakeConnector};
    use crate::error::DbError;
    use mongodb::bson::doc;
    use serial_test::serial;

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(
            HealthThresholds::default(),
            Duration::from_secs(30),
            Duration::from_secs(5),
        )
    }

    fn connected_fake() -> (Arc<FakeConnection>, Arc<dyn DocumentConnection>) {
        let fake = Arc::new(FakeConnection::connected("health"));
        let conn: Arc<dyn DocumentConnection> = fake.clone();
        (fake, conn)
    }

    fn pool_status(current: i32, available: i32) -> Document {
        doc! {
            "ok": 1,
            "connections": { "current": current, "available": available },
        }
    }

    #[tokio::test]
    async fn test_no_connection_is_unhealthy_without_io() {
        let result = monitor().check(None).await;

        assert_eq!(result.status, HealthState::Unhealthy);
        assert_eq!(result.latency_ms, 0);
        assert_eq!(result.message.as_deref(), Some(NO_CONNECTION_MESSAGE));
    }

    #[tokio::test]
    async fn test_disconnected_status_skips_ping() {
        let (fake, conn) = connected_fake();
        fake.set_status(ConnectionStatus::Error);

        let result = monitor().check(Some(&conn)).await;

        assert_eq!(result.status, HealthState::Unhealthy);
        assert_eq!(result.latency_ms, 0);
        assert_eq!(fake.ping_calls(), 0);
    }

    #[tokio::test]
    async fn test_healthy_connection() {
        let (_fake, conn) = connected_fake();

        let result = monitor().check(Some(&conn)).await;

        assert_eq!(result.status, HealthState::Healthy);
        assert!(result.message.is_none());
        let metrics = result.metrics.unwrap();
        assert_eq!(metrics.connections.current, 2);
        assert_eq!(metrics.connections.available, 8);
    }

    #[tokio::test]
    async fn test_failed_ping_is_unhealthy() {
        let (fake, conn) = connected_fake();
        fake.set_ping_error(DbError::connection_failed("socket closed"));

        let result = monitor().check(Some(&conn)).await;

        assert_eq!(result.status, HealthState::Unhealthy);
        assert!(result.message.unwrap().contains("socket closed"));
    }

    #[tokio::test]
    async fn test_warn_utilization_degrades() {
        let (fake, conn) = connected_fake();
        fake.set_server_status(pool_status(85, 15));

        let result = monitor().check(Some(&conn)).await;

        assert_eq!(result.status, HealthState::Degraded);
        let metrics = result.metrics.unwrap();
        assert!((metrics.connections.utilization_percentage - 85.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_critical_utilization_escalates() {
        let (fake, conn) = connected_fake();
        fake.set_server_status(pool_status(95, 5));

        let result = monitor().check(Some(&conn)).await;

        assert_eq!(result.status, HealthState::Unhealthy);
    }

    #[tokio::test]
    async fn test_failed_ping_wins_over_good_utilization() {
        let (fake, conn) = connected_fake();
        fake.set_server_status(pool_status(1, 99));
        fake.set_ping_error(DbError::connection_failed("socket closed"));

        let result = monitor().check(Some(&conn)).await;

        assert_eq!(result.status, HealthState::Unhealthy);
    }

    #[tokio::test]
    async fn test_replication_lag_degrades_only() {
        let (fake, conn) = connected_fake();
        fake.set_server_status(doc! {
            "ok": 1,
            "connections": { "current": 1, "available": 99 },
            "repl": { "lagMillis": 60_000_i64 },
        });

        let result = monitor().check(Some(&conn)).await;

        assert_eq!(result.status, HealthState::Degraded);
        assert_eq!(result.metrics.unwrap().replication.unwrap().lag_ms, 60_000);
    }

    #[tokio::test]
    async fn test_slow_ping_degrades() {
        let (fake, conn) = connected_fake();
        fake.set_ping_latency(Duration::from_millis(2_500));

        let result = monitor().check(Some(&conn)).await;

        assert_eq!(result.status, HealthState::Degraded);
        assert_eq!(result.latency_ms, 2_500);
        assert!(result.message.unwrap().contains("slow ping"));
    }

    #[tokio::test]
    async fn test_metrics_failure_degrades_but_not_below() {
        let (fake, conn) = connected_fake();
        fake.fail_server_status();

        let result = monitor().check(Some(&conn)).await;

        assert_eq!(result.status, HealthState::Degraded);
        assert!(result.metrics.is_none());
    }

    #[tokio::test]
    async fn test_last_snapshot_retained() {
        let monitor = monitor();
        assert!(monitor.last_result().is_none());

        let (_fake, conn) = connected_fake();
        monitor.check(Some(&conn)).await;

        let last = monitor.last_result().unwrap();
        assert_eq!(last.status, HealthState::Healthy);
    }

    #[tokio::test]
    async fn test_wire_shape() {
        let (fake, conn) = connected_fake();
        fake.set_server_status(doc! {
            "ok": 1,
            "connections": { "current": 2, "available": 8 },
            "opcounters": { "insert": 10, "query": 50 },
        });

        let result = monitor().check(Some(&conn)).await;
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value["status"], "healthy");
        assert!(value["latencyMs"].is_u64());
        assert!(value["timestamp"].is_string());
        assert!(value["metrics"]["connections"]["utilizationPercentage"].is_f64());
        assert_eq!(value["metrics"]["opcounters"]["insert"], 10);
        assert!(value.get("message").is_none());
    }

    #[tokio::test(start_paused = true)]
    #[serial]
    async fn test_continuous_monitoring_retains_latest() {
        let connector = Arc::new(FakeConnector::new());
        let manager = Arc::new(ConnectionManager::with_connector(
            DatabaseConfig {
                url: "mongodb://localhost:27017".to_string(),
                max_retries: 0,
                ..DatabaseConfig::default()
            },
            connector.clone(),
            Arc::new(ConnectionCache::new()),
        ));
        manager
            .get_connection(&ConnectionOptions::default())
            .await
            .unwrap();

        let monitor = Arc::new(HealthMonitor::new(
            HealthThresholds::default(),
            Duration::from_secs(30),
            Duration::from_secs(5),
        ));
        let handle = Arc::clone(&monitor).spawn(Arc::clone(&manager));

        // First tick fires immediately; give the task a chance to run.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(monitor.last_result().is_some());

        handle.stop();
    }
}
