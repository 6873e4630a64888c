//! Data models for AIDO

mod operation;
mod task;

pub use operation::{
    Fields, Mutation, OperationId, OperationKind, PendingConflict, QueuedOperation, ResourceId,
    ResourceType, MAX_RETRIES,
};
pub use task::{validate_fields, Priority, TaskStatus, CONFLICT_FIELDS, DATE_FIELDS};
