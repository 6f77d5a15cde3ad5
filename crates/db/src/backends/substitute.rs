//! Substitute Connection Provider
//!
//! During static generation (and in explicitly opted-in environments) the
//! application must never touch a real database. This module provides a
//! stand-in that satisfies the full connection contract with deterministic,
//! side-effect-free answers, plus the pure predicate deciding when it is
//! used. Selection never involves a network probe.

use async_trait::async_trait;
use mongodb::bson::{doc, Document};
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use uuid::Uuid;

use super::core::{ConnectionStatus, DocumentConnection};
use crate::error::DbResult;

/// Environment signals governing substitute selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildContext {
    /// `DB_FORCE_SUBSTITUTE` opt-in toggle
    pub force_toggle: bool,
    /// Recognized build-phase indicator (`BUILD_PHASE` contains "build")
    pub build_phase: bool,
}

impl BuildContext {
    /// Snapshot the relevant environment variables
    pub fn detect() -> Self {
        Self {
            force_toggle: env_flag("DB_FORCE_SUBSTITUTE"),
            build_phase: env::var("BUILD_PHASE")
                .map(|phase| phase.to_lowercase().contains("build"))
                .unwrap_or(false),
        }
    }
}

/// Whether a substitute connection must be used instead of a real one
pub fn substitute_required(force: bool, context: &BuildContext) -> bool {
    force || context.force_toggle || context.build_phase
}

fn env_flag(key: &str) -> bool {
    matches!(
        env::var(key).map(|v| v.to_lowercase()).as_deref(),
        Ok("1") | Ok("true") | Ok("yes") | Ok("on")
    )
}

/// Network-free stand-in satisfying the connection contract
///
/// Reads return empty results, writes return synthetic identifiers and
/// zero counts, and the lifecycle status always reports connected, so code
/// written against the contract behaves identically with a real connection.
pub struct SubstituteConnection {
    id: String,
    inserted: AtomicU64,
}

impl SubstituteConnection {
    pub fn new() -> Self {
        Self {
            id: format!("substitute-{}", Uuid::new_v4()),
            inserted: AtomicU64::new(0),
        }
    }

    fn synthetic_id(&self) -> String {
        let n = self.inserted.fetch_add(1, Ordering::Relaxed);
        format!("{:024x}", n)
    }
}

impl Default for SubstituteConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentConnection for SubstituteConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn status(&self) -> ConnectionStatus {
        ConnectionStatus::Connected
    }

    async fn ping(&self) -> DbResult<Duration> {
        Ok(Duration::ZERO)
    }

    async fn find_all(&self, _collection: &str, _filter: Document) -> DbResult<Vec<Document>> {
        Ok(Vec::new())
    }

    async fn insert_one(&self, _collection: &str, _document: Document) -> DbResult<String> {
        Ok(self.synthetic_id())
    }

    async fn update_one(
        &self,
        _collection: &str,
        _filter: Document,
        _update: Document,
    ) -> DbResult<u64> {
        Ok(0)
    }

    async fn delete_one(&self, _collection: &str, _filter: Document) -> DbResult<u64> {
        Ok(0)
    }

    async fn server_status(&self) -> DbResult<Document> {
        Ok(doc! {
            "ok": 1,
            "uptime": 0,
            "connections": { "current": 0, "available": 100 },
        })
    }

    async fn close(&self) -> DbResult<()> {
        Ok(())
    }
}
