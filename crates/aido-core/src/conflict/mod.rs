//! Version-conflict resolution
//!
//! Compares the locally queued field values with the server state returned by
//! a 409 and turns an explicit user decision into a corrective operation.
//! Nothing here merges automatically.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::error::{Error, Result};
use crate::models::{
    Fields, Mutation, OperationId, QueuedOperation, CONFLICT_FIELDS, DATE_FIELDS,
};
use crate::queue::{OperationQueue, QueueStore};

/// Where a merged field value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    Local,
    Server,
}

impl FromStr for FieldSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "mine" => Ok(Self::Local),
            "server" | "theirs" => Ok(Self::Server),
            other => Err(format!("unknown field source '{other}' (expected local or server)")),
        }
    }
}

impl fmt::Display for FieldSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Server => f.write_str("server"),
        }
    }
}

/// A user's decision for one conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Re-submit the full local field set over the server state
    Local,
    /// Keep the server state and discard the local change
    Server,
    /// Pick each conflicting field from one side
    Merge(BTreeMap<String, FieldSource>),
}

/// One field whose local and server values differ.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldConflict {
    pub field: String,
    pub local: Value,
    pub server: Value,
}

/// Payload produced by a resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Submit these fields as a new update
    Resubmit(Fields),
    /// Nothing to send
    Discard,
}

/// What happened to a queued conflict after resolving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// A corrective operation took the conflicted one's place in the queue
    Requeued(OperationId),
    /// The conflicted operation was removed
    Discarded,
}

/// Conflicting fields, in display order.
///
/// Only fields the local change carries are compared; a field missing on
/// the server compares as null.
#[must_use]
pub fn diff_fields(local: &Fields, server: &Fields) -> Vec<FieldConflict> {
    CONFLICT_FIELDS
        .iter()
        .filter_map(|&field| {
            let local_value = local.get(field)?;
            let server_value = server.get(field).unwrap_or(&Value::Null);
            if values_equal(field, local_value, server_value) {
                None
            } else {
                Some(FieldConflict {
                    field: field.to_string(),
                    local: local_value.clone(),
                    server: server_value.clone(),
                })
            }
        })
        .collect()
}

/// Field equality: null equals null, numbers by value, date fields as instants.
#[must_use]
pub fn values_equal(field: &str, a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::String(x), Value::String(y)) if DATE_FIELDS.contains(&field) => {
            x == y
                || matches!(
                    (parse_instant(x), parse_instant(y)),
                    (Some(x), Some(y)) if x == y
                )
        }
        _ => a == b,
    }
}

/// Integers compare exactly; floats only when either side is fractional.
fn numbers_equal(x: &Number, y: &Number) -> bool {
    if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
        return x == y;
    }
    if !x.is_f64() && !y.is_f64() {
        return false;
    }
    match (x.as_f64(), y.as_f64()) {
        (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
        _ => false,
    }
}

/// Parse an RFC 3339 timestamp, a naive date-time (UTC) or a plain date (UTC midnight).
fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(parsed.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|datetime| datetime.and_utc())
}

/// Turn a decision into a payload.
///
/// A merge must choose a side for every conflicting field and nothing else;
/// the payload holds exactly the chosen values.
pub fn resolve(
    local: &Fields,
    server: &Fields,
    resolution: &ConflictResolution,
) -> Result<Resolution> {
    match resolution {
        ConflictResolution::Local => Ok(Resolution::Resubmit(local.clone())),
        ConflictResolution::Server => Ok(Resolution::Discard),
        ConflictResolution::Merge(selections) => {
            let conflicts = diff_fields(local, server);
            if conflicts.is_empty() {
                return Err(Error::InvalidInput(
                    "no conflicting fields to merge; keep local or server instead".to_string(),
                ));
            }

            if let Some(field) = selections
                .keys()
                .find(|field| !conflicts.iter().any(|conflict| &conflict.field == *field))
            {
                return Err(Error::InvalidInput(format!(
                    "field '{field}' is not in conflict"
                )));
            }

            let mut payload = Fields::new();
            for conflict in conflicts {
                let source = selections.get(&conflict.field).ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "choose local or server for field '{}'",
                        conflict.field
                    ))
                })?;
                let value = match source {
                    FieldSource::Local => conflict.local,
                    FieldSource::Server => conflict.server,
                };
                payload.insert(conflict.field, value);
            }
            Ok(Resolution::Resubmit(payload))
        }
    }
}

/// Concurrency token carried by the server state, if any.
fn server_version(server: &Fields) -> Option<String> {
    match server.get("version")? {
        Value::String(version) if !version.trim().is_empty() => Some(version.trim().to_string()),
        Value::Number(version) => Some(version.to_string()),
        _ => None,
    }
}

/// A queued conflict prepared for display.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictReport {
    pub operation: QueuedOperation,
    pub server_state: Fields,
    pub fields: Vec<FieldConflict>,
}

impl ConflictReport {
    /// Build a report for a parked operation.
    pub fn for_operation(operation: QueuedOperation) -> Result<Self> {
        let server_state = operation
            .conflict
            .as_ref()
            .map(|conflict| conflict.server_state.clone())
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "operation {} is not waiting for conflict resolution",
                    operation.id
                ))
            })?;
        let fields = diff_fields(&operation.local_fields(), &server_state);
        Ok(Self {
            operation,
            server_state,
            fields,
        })
    }
}

/// Resolve a parked conflict in the queue.
///
/// `local` and `merge` replace the operation in place with a fresh one
/// (retry count reset, `expected_version` taken from the server state);
/// `server` removes it.
pub async fn apply_resolution<S: QueueStore>(
    queue: &OperationQueue<S>,
    id: &OperationId,
    resolution: &ConflictResolution,
) -> Result<ResolutionOutcome> {
    let operation = queue
        .get(id)
        .await
        .ok_or_else(|| Error::NotFound(format!("queued operation {id}")))?;
    let report = ConflictReport::for_operation(operation)?;
    let operation = report.operation;
    let local = operation.local_fields();

    let payload = match resolve(&local, &report.server_state, resolution)? {
        Resolution::Discard => {
            queue.dequeue(id).await;
            tracing::info!("Discarded {} in favour of server state", operation.describe());
            return Ok(ResolutionOutcome::Discarded);
        }
        Resolution::Resubmit(payload) => payload,
    };

    let mutation = match (&operation.mutation, resolution) {
        (Mutation::Update { id: resource_id, .. }, _) => Mutation::Update {
            id: resource_id.clone(),
            updates: payload,
        },
        (mutation @ (Mutation::Create { .. } | Mutation::Delete { .. }), ConflictResolution::Local) => {
            mutation.clone()
        }
        (_, _) => {
            return Err(Error::InvalidInput(format!(
                "field merge is only available for updates, not {}",
                operation.describe()
            )))
        }
    };

    let mut corrective = QueuedOperation::new(operation.resource_type, mutation);
    corrective.expected_version = server_version(&report.server_state);
    let corrective_id = corrective.id;
    queue.replace(id, corrective).await?;
    tracing::info!(
        "Requeued {} as {} after conflict resolution",
        operation.describe(),
        corrective_id
    );
    Ok(ResolutionOutcome::Requeued(corrective_id))
}
