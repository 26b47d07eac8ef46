//! # Offsync Infrastructure
//!
//! Infrastructure implementations of the core queue ports.
//!
//! This crate contains:
//! - The SQLite durable queue store (r2d2 pool, WAL)
//! - The HTTP transport and remote data API adapter
//! - The connectivity probe and the background sync scheduler
//! - Configuration loading and tracing setup
//! - [`OfflineQueue`], the assembled engine
//!
//! ## Architecture
//! - Implements traits defined in `offsync-core`
//! - Depends on `offsync-domain` and `offsync-core`
//! - Contains all "impure" code (I/O, timers, network)

pub mod config;
pub mod connectivity;
pub mod database;
pub mod engine;
pub mod errors;
pub mod http;
pub mod logging;
pub mod remote;
pub mod scheduling;

// Re-export commonly used items
pub use connectivity::ConnectivityProbe;
pub use database::{DbManager, SqliteOperationStore};
pub use engine::{OfflineQueue, OfflineQueueBuilder};
pub use errors::InfraError;
pub use http::HttpClient;
pub use remote::HttpRemoteApi;
pub use scheduling::{SchedulerError, SchedulerResult, SyncScheduler, SyncSchedulerConfig};
