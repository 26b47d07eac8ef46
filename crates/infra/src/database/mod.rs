//! Durable queue store on SQLite

pub mod manager;
pub mod operation_repository;

pub use manager::{DbManager, SqliteConnection, SqlitePool};
pub use operation_repository::SqliteOperationStore;
