use std::io::{self, IsTerminal};
use std::path::Path;

use crate::cli::QueueCommands;
use crate::commands::common::{
    confirm, dropped_to_list_item, format_dropped_lines, format_operation_lines, open_queue,
    operation_to_list_item, resolve_operation_id, DroppedListItem, OperationListItem,
};
use crate::error::CliError;

pub async fn run_queue(command: QueueCommands, db_path: &Path) -> Result<(), CliError> {
    match command {
        QueueCommands::List { json } => run_queue_list(json, db_path).await,
        QueueCommands::Remove { id } => run_queue_remove(&id, db_path).await,
        QueueCommands::Clear { yes } => run_queue_clear(yes, db_path).await,
        QueueCommands::Dropped { json } => run_queue_dropped(json, db_path).await,
    }
}

pub async fn run_queue_list(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let local = open_queue(db_path).await?;
    let operations = local.queue.snapshot().await;

    if as_json {
        let json_items = operations
            .iter()
            .map(operation_to_list_item)
            .collect::<Vec<OperationListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if operations.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    for line in format_operation_lines(&operations) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_queue_remove(id: &str, db_path: &Path) -> Result<(), CliError> {
    let local = open_queue(db_path).await?;
    let id = resolve_operation_id(id, &local.queue).await?;

    let removed = local
        .queue
        .dequeue(&id)
        .await
        .ok_or_else(|| CliError::OperationNotFound(id.to_string()))?;
    println!("Removed {} ({})", removed.describe(), removed.id);
    Ok(())
}

pub async fn run_queue_clear(yes: bool, db_path: &Path) -> Result<(), CliError> {
    let local = open_queue(db_path).await?;
    let pending = local.queue.len().await;
    if pending == 0 {
        println!("Queue is already empty.");
        return Ok(());
    }

    if !yes {
        eprintln!(
            "Warning: {pending} pending operation(s) have not been synced and will be lost."
        );
        if !io::stdin().is_terminal() {
            return Err(CliError::ConfirmationRequired);
        }
        if !confirm("Discard them?")? {
            println!("Aborted; queue unchanged.");
            return Ok(());
        }
    }

    let discarded = local.queue.clear().await?;
    println!("Discarded {discarded} operation(s).");
    Ok(())
}

pub async fn run_queue_dropped(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let local = open_queue(db_path).await?;
    let dropped = local.queue.dropped().await;

    if as_json {
        let json_items = dropped
            .iter()
            .map(dropped_to_list_item)
            .collect::<Vec<DroppedListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if dropped.is_empty() {
        println!("No dropped operations.");
        return Ok(());
    }

    for line in format_dropped_lines(&dropped) {
        println!("{line}");
    }
    Ok(())
}
