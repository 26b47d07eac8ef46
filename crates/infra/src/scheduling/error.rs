//! Scheduler error types

use offsync_domain::QueueError;
use thiserror::Error;

use crate::errors::InfraError;

/// Lifecycle errors for background loops. Scheduling itself never fails.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Scheduler already running")]
    AlreadyRunning,

    #[error("Scheduler not running")]
    NotRunning,

    /// A background task did not finish within the join timeout
    #[error("Operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Task join failed: {0}")]
    TaskJoinFailed(String),

    #[error("Invalid scheduler configuration: {0}")]
    InvalidConfig(String),
}

impl From<tokio::task::JoinError> for SchedulerError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoinFailed(err.to_string())
    }
}

impl From<SchedulerError> for InfraError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::InvalidConfig(message) => InfraError(QueueError::Config(message)),
            other => InfraError(QueueError::Internal(other.to_string())),
        }
    }
}

impl From<SchedulerError> for QueueError {
    fn from(err: SchedulerError) -> Self {
        InfraError::from(err).into()
    }
}

/// Convenience type alias for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;
