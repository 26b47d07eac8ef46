//! Durable queue ports and the services writing to it

pub mod aggregator;
pub mod enqueuer;
pub mod ports;

pub use aggregator::PendingAggregator;
pub use enqueuer::OperationEnqueuer;
