use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] aido_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid field assignment: {0}")]
    InvalidAssignment(String),
    #[error("Operation ID cannot be empty")]
    EmptyOperationId,
    #[error("Resource ID cannot be empty")]
    EmptyResourceId,
    #[error("Queued operation not found for id/prefix: {0}")]
    OperationNotFound(String),
    #[error("{0}")]
    AmbiguousOperationId(String),
    #[error("Refusing to discard unsynced work without confirmation; pass --yes to proceed")]
    ConfirmationRequired,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error(
        "No API token available. Run `aido auth login --token <TOKEN>` or set AIDO_TOKEN."
    )]
    NotAuthenticated,
}
