//! # Offsync Core
//!
//! Queue and sync logic - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port interfaces for the durable store and the remote API
//! - The operation enqueuer and pending aggregator
//! - The connectivity monitor
//! - The sync executor, retry policy and single-flight coordinator
//!
//! ## Architecture Principles
//! - Only depends on `offsync-domain`
//! - No database, HTTP, or platform code
//! - All external dependencies via traits

pub mod connectivity;
pub mod queue;
pub mod sync;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use connectivity::ConnectivityMonitor;
pub use queue::ports::{OperationStore, SyncTrigger};
pub use queue::{OperationEnqueuer, PendingAggregator};
pub use sync::ports::RemoteApi;
pub use sync::{RetryPolicy, SyncCoordinator, SyncExecutor, SyncStats};
