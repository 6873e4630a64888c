//! Local database layer for AIDO

mod connection;
mod local_storage;
mod migrations;

pub use connection::Database;
pub use local_storage::LocalStorage;
