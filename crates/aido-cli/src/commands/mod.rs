pub mod auth_cmd;
pub mod common;
pub mod completions;
pub mod config;
pub mod conflicts;
pub mod mutate;
pub mod queue;
pub mod status;
pub mod sync;
