use std::env;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};

use aido_core::config::ENV_DB_PATH;
use aido_core::conflict::FieldSource;
use aido_core::db::{Database, LocalStorage};
use aido_core::models::Fields;
use aido_core::queue::{DroppedOperation, OperationQueue};
use aido_core::util::parse_loose_json;
use aido_core::{OperationId, QueuedOperation};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::CliError;

/// Open database plus the queue stored in it.
pub struct LocalQueue {
    _db: Database,
    pub queue: OperationQueue<LocalStorage>,
}

pub async fn open_queue(db_path: &Path) -> Result<LocalQueue, CliError> {
    let db = Database::open(db_path).await?;
    let queue = OperationQueue::load(LocalStorage::new(&db)).await?;
    Ok(LocalQueue { _db: db, queue })
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os(ENV_DB_PATH).map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(env::temp_dir)
        .join("aido")
        .join("aido.db")
}

#[derive(Debug, Serialize)]
pub struct OperationListItem {
    pub id: String,
    pub kind: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub fields: Fields,
    pub enqueued_at: DateTime<Utc>,
    pub relative_time: String,
    pub retry_count: u32,
    pub awaiting_resolution: bool,
}

#[derive(Debug, Serialize)]
pub struct DroppedListItem {
    pub id: String,
    pub operation: String,
    pub retry_count: u32,
    pub reason: String,
    pub dropped_at: DateTime<Utc>,
}

/// Parse `field=value` assignments; values are JSON when valid, else strings.
pub fn parse_assignments(assignments: &[String]) -> Result<Fields, CliError> {
    let mut fields = Fields::new();
    for assignment in assignments {
        let (name, raw) = assignment.split_once('=').ok_or_else(|| {
            CliError::InvalidAssignment(format!("'{assignment}' is not in FIELD=VALUE form"))
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(CliError::InvalidAssignment(format!(
                "'{assignment}' has an empty field name"
            )));
        }
        fields.insert(name.to_string(), parse_loose_json(raw.trim()));
    }
    Ok(fields)
}

/// Parse `field=local|server` merge picks.
pub fn parse_picks(
    picks: &[String],
) -> Result<std::collections::BTreeMap<String, FieldSource>, CliError> {
    let mut selections = std::collections::BTreeMap::new();
    for pick in picks {
        let (name, source) = pick.split_once('=').ok_or_else(|| {
            CliError::InvalidAssignment(format!("'{pick}' is not in FIELD=local|server form"))
        })?;
        let source = source
            .parse::<FieldSource>()
            .map_err(CliError::InvalidAssignment)?;
        selections.insert(name.trim().to_string(), source);
    }
    Ok(selections)
}

pub fn normalize_identifier(id: &str) -> Option<String> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Resolve a full operation ID or a unique prefix of one.
pub async fn resolve_operation_id(
    query: &str,
    queue: &OperationQueue<LocalStorage>,
) -> Result<OperationId, CliError> {
    let query = normalize_identifier(query).ok_or(CliError::EmptyOperationId)?;

    if let Ok(id) = query.parse::<OperationId>() {
        if queue.get(&id).await.is_some() {
            return Ok(id);
        }
    }

    let matching_ids = queue.ids_with_prefix(&query).await;
    match matching_ids.as_slice() {
        [] => Err(CliError::OperationNotFound(query)),
        [id] => Ok(*id),
        _ => {
            let options = matching_ids
                .iter()
                .take(3)
                .map(|id| short_id(id))
                .collect::<Vec<_>>()
                .join(", ");

            Err(CliError::AmbiguousOperationId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn short_id(id: &OperationId) -> String {
    id.as_str().chars().take(13).collect()
}

pub fn format_operation_lines(operations: &[QueuedOperation]) -> Vec<String> {
    let now = Utc::now();
    operations
        .iter()
        .map(|operation| {
            let label = operation.describe();
            let relative_time = format_relative_time(operation.enqueued_at, now);
            let mut line = format!(
                "{:<13}  {label:<24}  {relative_time:<10}  retries={}",
                short_id(&operation.id),
                operation.retry_count
            );
            if operation.is_awaiting_resolution() {
                line.push_str("  [conflict]");
            }
            line
        })
        .collect()
}

pub fn operation_to_list_item(operation: &QueuedOperation) -> OperationListItem {
    OperationListItem {
        id: operation.id.to_string(),
        kind: operation.kind().to_string(),
        resource_type: operation.resource_type.to_string(),
        resource_id: operation.resource_id().map(ToString::to_string),
        fields: operation.local_fields(),
        enqueued_at: operation.enqueued_at,
        relative_time: format_relative_time(operation.enqueued_at, Utc::now()),
        retry_count: operation.retry_count,
        awaiting_resolution: operation.is_awaiting_resolution(),
    }
}

pub fn dropped_to_list_item(dropped: &DroppedOperation) -> DroppedListItem {
    DroppedListItem {
        id: dropped.operation.id.to_string(),
        operation: dropped.operation.describe(),
        retry_count: dropped.operation.retry_count,
        reason: dropped.reason.clone(),
        dropped_at: dropped.dropped_at,
    }
}

pub fn format_dropped_lines(dropped: &[DroppedOperation]) -> Vec<String> {
    dropped
        .iter()
        .map(|entry| {
            format!(
                "{}  {:<13}  {:<24}  {}",
                format_timestamp(entry.dropped_at),
                short_id(&entry.operation.id),
                entry.operation.describe(),
                entry.reason
            )
        })
        .collect()
}

pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn format_relative_time(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = now.signed_duration_since(timestamp).num_milliseconds().max(0);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

/// Ask a yes/no question on the terminal.
///
/// Without a terminal nothing can be confirmed and `false` is returned.
pub fn confirm(prompt: &str) -> Result<bool, CliError> {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        return Ok(false);
    }

    print!("{prompt} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    stdin.lock().read_line(&mut answer)?;
    Ok(is_affirmative(&answer))
}

pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
