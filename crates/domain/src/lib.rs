//! # Offsync Domain
//!
//! Domain types for the offline write queue.
//!
//! This crate contains:
//! - The queued operation model and its status machine
//! - Error taxonomy (`QueueError`, `SyncError`) and the `Result` alias
//! - Configuration structures
//! - Shared constants
//!
//! ## Architecture
//! - No dependencies on other offsync crates
//! - Only external dependencies allowed
//! - Pure data structures, no I/O

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
