use std::path::Path;

use aido_core::models::{validate_fields, Fields};
use aido_core::util::parse_loose_json;
use aido_core::{Mutation, ResourceId, ResourceType};

use crate::commands::common::{normalize_identifier, open_queue, parse_assignments};
use crate::error::CliError;

pub async fn run_create(
    resource_type: ResourceType,
    task_id: Option<&str>,
    assignments: &[String],
    db_path: &Path,
) -> Result<(), CliError> {
    let fields = build_create_fields(resource_type, task_id, assignments)?;

    let local = open_queue(db_path).await?;
    let id = local
        .queue
        .enqueue(resource_type, Mutation::Create { fields })
        .await;
    println!("{id}");
    Ok(())
}

pub async fn run_update(
    resource_type: ResourceType,
    id: &str,
    assignments: &[String],
    db_path: &Path,
) -> Result<(), CliError> {
    let resource_id = normalize_identifier(id)
        .map(ResourceId::new)
        .ok_or(CliError::EmptyResourceId)?;
    let updates = parse_assignments(assignments)?;
    if updates.is_empty() {
        return Err(CliError::InvalidAssignment(
            "an update needs at least one --set".to_string(),
        ));
    }
    validate_fields(resource_type, &updates)?;

    let local = open_queue(db_path).await?;
    let id = local
        .queue
        .enqueue(
            resource_type,
            Mutation::Update {
                id: resource_id,
                updates,
            },
        )
        .await;
    println!("{id}");
    Ok(())
}

pub async fn run_delete(
    resource_type: ResourceType,
    id: &str,
    db_path: &Path,
) -> Result<(), CliError> {
    let resource_id = normalize_identifier(id)
        .map(ResourceId::new)
        .ok_or(CliError::EmptyResourceId)?;

    let local = open_queue(db_path).await?;
    let id = local
        .queue
        .enqueue(resource_type, Mutation::Delete { id: resource_id })
        .await;
    println!("{id}");
    Ok(())
}

/// Assemble and check the field set of a create.
pub fn build_create_fields(
    resource_type: ResourceType,
    task_id: Option<&str>,
    assignments: &[String],
) -> Result<Fields, CliError> {
    let mut fields = parse_assignments(assignments)?;
    if let Some(task_id) = task_id.and_then(normalize_identifier) {
        fields.insert("task_id".to_string(), parse_loose_json(&task_id));
    }

    if fields.is_empty() {
        return Err(CliError::InvalidAssignment(
            "a create needs at least one --set".to_string(),
        ));
    }
    if resource_type == ResourceType::Subtask && !fields.contains_key("task_id") {
        return Err(CliError::InvalidAssignment(
            "subtasks need a parent: pass --task-id".to_string(),
        ));
    }
    validate_fields(resource_type, &fields)?;
    Ok(fields)
}
