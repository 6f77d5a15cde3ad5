//! Connection Backend Abstraction
//!
//! Defines the operational contract every connection satisfies and its two
//! implementations: the real MongoDB adapter and the network-free
//! substitute used during static generation.

pub mod core;
pub mod mongo;
pub mod substitute;

// Re-export for convenience
pub use self::core::*;
pub use mongo::*;
pub use substitute::*;
