//! # subtrack-core: Configuration Foundation for subtrack
//!
//! Environment-driven configuration for the subscription tracker, covering
//! application identity, the database connectivity layer, and logging.
//! Configuration is loaded once at startup, validated, and handed to the
//! other crates by value.

pub mod app_config;

pub use app_config::*;
