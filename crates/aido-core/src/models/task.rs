//! Task resource model
//!
//! Tasks, tags and subtasks are owned by the remote API. The queue treats
//! their payloads as field maps; these types only pin down the values the
//! client needs to understand (enum fields and the conflict comparison set).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::operation::{Fields, ResourceType};

/// Conflict fields holding dates; these compare as instants.
pub const DATE_FIELDS: [&str; 1] = ["due_date"];

/// Fields compared when a task update hits a version conflict, in display order.
pub const CONFLICT_FIELDS: [&str; 8] = [
    "title",
    "description",
    "priority",
    "status",
    "due_date",
    "completed",
    "time_spent",
    "custom_order",
];

/// Task priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
    #[default]
    None,
}

/// Task workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
}

/// Check locally-entered fields before they are queued.
///
/// Only values the client understands are checked; unknown fields pass
/// through to the API untouched.
pub fn validate_fields(resource_type: ResourceType, fields: &Fields) -> Result<()> {
    if resource_type == ResourceType::Task {
        check_enum_field::<Priority>(fields, "priority")?;
        check_enum_field::<TaskStatus>(fields, "status")?;
        if let Some(value) = fields.get("completed") {
            if !value.is_boolean() {
                return Err(Error::InvalidInput(
                    "field 'completed' must be true or false".to_string(),
                ));
            }
        }
        if let Some(value) = fields.get("time_spent") {
            if !value.is_i64() && !value.is_u64() {
                return Err(Error::InvalidInput(
                    "field 'time_spent' must be a whole number of minutes".to_string(),
                ));
            }
        }
    }

    if let Some(title) = fields.get("title") {
        if title.as_str().is_some_and(|title| title.trim().is_empty()) {
            return Err(Error::InvalidInput("field 'title' must not be empty".to_string()));
        }
    }

    Ok(())
}

fn check_enum_field<T: for<'de> Deserialize<'de>>(fields: &Fields, name: &str) -> Result<()> {
    match fields.get(name) {
        None | Some(Value::Null) => Ok(()),
        Some(value) => serde_json::from_value::<T>(value.clone())
            .map(|_| ())
            .map_err(|_| Error::InvalidInput(format!("invalid value for '{name}': {value}"))),
    }
}
