//! # subtrack-db: Database Connectivity for subtrack
//!
//! Connection lifecycle management for the subscription tracker's document
//! database: pooled and direct acquisition with request coalescing,
//! exponential-backoff retry, a unified error taxonomy, periodic health
//! monitoring, and a network-free substitute connection for build-time
//! static generation.
//!
//! The CRUD handlers and the monitoring endpoint consume this crate through
//! two seams: [`ConnectionManager::with_connection`] for running operations
//! with standardized error handling, and [`HealthMonitor`] for diagnostics.

pub mod backends;
pub mod connection;
pub mod error;
pub mod retry;
pub mod uri;

// Re-export core traits and types
pub use backends::*;
pub use connection::*;
pub use error::*;
pub use retry::*;
pub use uri::*;
