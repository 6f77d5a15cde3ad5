//! Connection lifecycle records
//!
//! Each tracked connection carries an explicit state machine driven by
//! lifecycle events. Reconnect attempts are counted and capped: exhausting
//! the budget is a terminal failure, not grounds for silent unlimited
//! reconnection.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ErrorCode;

/// Lifecycle states for a tracked connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting,
    Error,
    /// Reconnect budget exhausted; no further automatic retries
    Failed,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        }
    }

    /// Terminal states accept no further lifecycle events except close
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle events driving state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    Reconnected,
    Errored,
    Closed,
}

/// Per-connection lifecycle record
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    id: Uuid,
    state: ConnectionState,
    reconnect_attempts: u32,
    max_reconnect_attempts: u32,
    created_at: DateTime<Utc>,
}

impl ConnectionRecord {
    pub fn new(max_reconnect_attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: ConnectionState::Connecting,
            reconnect_attempts: 0,
            max_reconnect_attempts,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Apply a lifecycle event, returning the resulting state
    ///
    /// A disconnect increments the reconnect counter; once the counter
    /// exceeds the configured maximum the record transitions to the
    /// terminal `Failed` state and surfaces `CONNECTION_FAILED`.
    pub fn apply(&mut self, event: ConnectionEvent) -> ConnectionState {
        let next = match (self.state, event) {
            (_, ConnectionEvent::Closed) => ConnectionState::Closed,
            (state, _) if state.is_terminal() => state,
            (_, ConnectionEvent::Connected) | (_, ConnectionEvent::Reconnected) => {
                self.reconnect_attempts = 0;
                ConnectionState::Connected
            }
            (_, ConnectionEvent::Disconnected) => {
                self.reconnect_attempts += 1;
                if self.reconnect_attempts > self.max_reconnect_attempts {
                    tracing::error!(
                        record = %self.id,
                        attempts = self.reconnect_attempts,
                        max = self.max_reconnect_attempts,
                        code = %ErrorCode::ConnectionFailed,
                        "Reconnect budget exhausted; connection marked failed"
                    );
                    ConnectionState::Failed
                } else {
                    ConnectionState::Reconnecting
                }
            }
            (_, ConnectionEvent::Errored) => ConnectionState::Error,
        };

        if next != self.state {
            tracing::debug!(
                record = %self.id,
                from = %self.state,
                to = %next,
                event = ?event,
                "Connection state transition"
            );
        }

        self.state = next;
        next
    }
}
