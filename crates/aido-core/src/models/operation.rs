//! Queued operation model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Maximum number of failed attempts before an operation is dropped.
pub const MAX_RETRIES: u32 = 3;

/// Sparse or full field set carried by a mutation.
pub type Fields = Map<String, Value>;

/// A unique identifier for a queued operation, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Create a new unique operation ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Mutation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote resource a mutation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Task,
    Tag,
    Subtask,
}

impl ResourceType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Tag => "tag",
            Self::Subtask => "subtask",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "task" | "tasks" => Ok(Self::Task),
            "tag" | "tags" => Ok(Self::Tag),
            "subtask" | "subtasks" => Ok(Self::Subtask),
            other => Err(format!("unknown resource type '{other}'")),
        }
    }
}

/// Server-assigned resource identifier.
///
/// The API may hand out numeric or string ids; both are kept as text so the
/// persisted queue round-trips without loss.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Read an id out of a JSON value (string or integer).
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) if !text.trim().is_empty() => Some(Self::new(text.as_str())),
            Value::Number(number) => Some(Self(number.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for ResourceId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value)
            .ok_or_else(|| serde::de::Error::custom("resource id must be a non-empty string or integer"))
    }
}

/// The mutation a queued operation performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Mutation {
    /// Create with the full resource field set
    Create { fields: Fields },
    /// Sparse update of an existing resource
    Update { id: ResourceId, updates: Fields },
    /// Delete an existing resource
    Delete { id: ResourceId },
}

impl Mutation {
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::Create { .. } => OperationKind::Create,
            Self::Update { .. } => OperationKind::Update,
            Self::Delete { .. } => OperationKind::Delete,
        }
    }

    #[must_use]
    pub const fn resource_id(&self) -> Option<&ResourceId> {
        match self {
            Self::Create { .. } => None,
            Self::Update { id, .. } | Self::Delete { id } => Some(id),
        }
    }
}

/// Version conflict recorded against an operation, awaiting a user decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingConflict {
    /// Server's current resource state from the 409 response body
    pub server_state: Fields,
    /// When the conflict was detected
    pub detected_at: DateTime<Utc>,
}

/// A single pending mutation awaiting execution against the remote API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// Unique identifier, generated at enqueue time
    pub id: OperationId,
    /// Targeted resource
    pub resource_type: ResourceType,
    /// Kind and payload
    pub mutation: Mutation,
    /// Enqueue timestamp (ordering and display only)
    pub enqueued_at: DateTime<Utc>,
    /// Failed attempts so far
    pub retry_count: u32,
    /// Concurrency token to send as `If-Match`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<String>,
    /// Set while the operation waits for conflict resolution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<PendingConflict>,
}

impl QueuedOperation {
    /// Build a fresh operation with `retry_count = 0`.
    #[must_use]
    pub fn new(resource_type: ResourceType, mutation: Mutation) -> Self {
        Self {
            id: OperationId::new(),
            resource_type,
            mutation,
            enqueued_at: Utc::now(),
            retry_count: 0,
            expected_version: None,
            conflict: None,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        self.mutation.kind()
    }

    #[must_use]
    pub const fn resource_id(&self) -> Option<&ResourceId> {
        self.mutation.resource_id()
    }

    /// Whether the operation is parked until a conflict is resolved.
    #[must_use]
    pub const fn is_awaiting_resolution(&self) -> bool {
        self.conflict.is_some()
    }

    /// The locally intended field values (empty for deletes).
    #[must_use]
    pub fn local_fields(&self) -> Fields {
        match &self.mutation {
            Mutation::Create { fields } => fields.clone(),
            Mutation::Update { updates, .. } => updates.clone(),
            Mutation::Delete { .. } => Fields::new(),
        }
    }

    /// Short label such as `update task 5`.
    #[must_use]
    pub fn describe(&self) -> String {
        match self.resource_id() {
            Some(id) => format!("{} {} {}", self.kind(), self.resource_type, id),
            None => format!("{} {}", self.kind(), self.resource_type),
        }
    }
}
