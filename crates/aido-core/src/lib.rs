//! aido-core - Core library for AIDO
//!
//! This crate contains the offline operation queue and everything needed to
//! drain it: the local database, connectivity monitor, REST executor, sync
//! coordinator and conflict resolver shared by all AIDO front ends.

pub mod auth;
pub mod config;
pub mod conflict;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod executor;
pub mod models;
pub mod queue;
pub mod state;
pub mod sync;
pub mod util;

pub use auth::AuthToken;
pub use error::{Error, Result};
pub use models::{Mutation, OperationId, QueuedOperation, ResourceId, ResourceType};
