//! Network presence tracking

pub mod monitor;

pub use monitor::ConnectivityMonitor;
