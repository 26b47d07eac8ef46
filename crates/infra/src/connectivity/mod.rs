//! Connectivity detection

pub mod probe;

pub use probe::ConnectivityProbe;
