//! Remote data API adapters

pub mod client;

pub use client::HttpRemoteApi;
