//! Domain types and models

pub mod operation;
pub mod sync;

pub use operation::{
    FailureRecord, NewOperation, OperationRequest, OperationStatus, OperationType,
    QueuedOperation,
};
pub use sync::{ConnectivityEvent, SyncReport, SyncRequest, SyncSummary, SyncTriggerSource};
