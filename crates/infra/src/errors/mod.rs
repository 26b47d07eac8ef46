//! Error conversions for infrastructure adapters

pub(crate) mod conversions;

pub use conversions::InfraError;
