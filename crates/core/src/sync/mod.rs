//! Replaying queued operations against the remote API

pub mod coordinator;
pub mod executor;
pub mod ports;
pub mod retry;

pub use coordinator::{SyncCoordinator, SyncStats};
pub use executor::SyncExecutor;
pub use retry::RetryPolicy;
