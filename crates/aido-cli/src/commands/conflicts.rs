use std::path::Path;

use aido_core::conflict::{
    apply_resolution, ConflictReport, ConflictResolution, FieldConflict, ResolutionOutcome,
};
use aido_core::models::Fields;
use serde::Serialize;
use serde_json::Value;

use crate::cli::{ConflictCommands, KeepArg};
use crate::commands::common::{
    format_timestamp, open_queue, parse_picks, resolve_operation_id, short_id,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct ConflictItem {
    pub id: String,
    pub operation: String,
    pub detected_at: Option<String>,
    pub local: Fields,
    pub server: Fields,
    pub conflicting_fields: Vec<FieldConflict>,
}

pub async fn run_conflicts(command: ConflictCommands, db_path: &Path) -> Result<(), CliError> {
    match command {
        ConflictCommands::List { json } => run_conflicts_list(json, db_path).await,
        ConflictCommands::Show { id, json } => run_conflicts_show(&id, json, db_path).await,
        ConflictCommands::Resolve { id, keep, pick } => {
            run_conflicts_resolve(&id, keep, &pick, db_path).await
        }
    }
}

pub async fn run_conflicts_list(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let local = open_queue(db_path).await?;
    let reports = local
        .queue
        .conflicts()
        .await
        .into_iter()
        .map(ConflictReport::for_operation)
        .collect::<Result<Vec<_>, _>>()?;

    if as_json {
        let items = reports.iter().map(conflict_to_item).collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if reports.is_empty() {
        println!("No conflicts awaiting resolution.");
        return Ok(());
    }

    for report in &reports {
        println!("{}", format_conflict_summary(report));
    }
    Ok(())
}

pub async fn run_conflicts_show(id: &str, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let local = open_queue(db_path).await?;
    let id = resolve_operation_id(id, &local.queue).await?;
    let operation = local
        .queue
        .get(&id)
        .await
        .ok_or_else(|| CliError::OperationNotFound(id.to_string()))?;
    let report = ConflictReport::for_operation(operation)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&conflict_to_item(&report))?);
        return Ok(());
    }

    println!("{}", format_conflict_summary(&report));
    for line in format_field_table(&report) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_conflicts_resolve(
    id: &str,
    keep: KeepArg,
    picks: &[String],
    db_path: &Path,
) -> Result<(), CliError> {
    let resolution = build_resolution(keep, picks)?;
    let local = open_queue(db_path).await?;
    let id = resolve_operation_id(id, &local.queue).await?;

    match apply_resolution(&local.queue, &id, &resolution).await? {
        ResolutionOutcome::Requeued(new_id) => {
            println!("Requeued as {new_id}; it will be sent on the next `aido sync`.");
        }
        ResolutionOutcome::Discarded => println!("Discarded local change; server state kept."),
    }
    Ok(())
}

pub fn build_resolution(keep: KeepArg, picks: &[String]) -> Result<ConflictResolution, CliError> {
    match keep {
        KeepArg::Local | KeepArg::Server if !picks.is_empty() => Err(CliError::InvalidAssignment(
            "--pick only applies to --keep merge".to_string(),
        )),
        KeepArg::Local => Ok(ConflictResolution::Local),
        KeepArg::Server => Ok(ConflictResolution::Server),
        KeepArg::Merge => {
            if picks.is_empty() {
                return Err(CliError::InvalidAssignment(
                    "--keep merge needs a --pick FIELD=local|server for each conflicting field"
                        .to_string(),
                ));
            }
            Ok(ConflictResolution::Merge(parse_picks(picks)?))
        }
    }
}

fn conflict_to_item(report: &ConflictReport) -> ConflictItem {
    ConflictItem {
        id: report.operation.id.to_string(),
        operation: report.operation.describe(),
        detected_at: report
            .operation
            .conflict
            .as_ref()
            .map(|conflict| conflict.detected_at.to_rfc3339()),
        local: report.operation.local_fields(),
        server: report.server_state.clone(),
        conflicting_fields: report.fields.clone(),
    }
}

pub fn format_conflict_summary(report: &ConflictReport) -> String {
    let detected = report
        .operation
        .conflict
        .as_ref()
        .map_or_else(String::new, |conflict| format_timestamp(conflict.detected_at));
    let fields = if report.fields.is_empty() {
        "no compared fields differ".to_string()
    } else {
        format!(
            "{} field(s) differ: {}",
            report.fields.len(),
            report
                .fields
                .iter()
                .map(|conflict| conflict.field.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    };
    format!(
        "{:<13}  {:<24}  {detected}  {fields}",
        short_id(&report.operation.id),
        report.operation.describe()
    )
}

pub fn format_field_table(report: &ConflictReport) -> Vec<String> {
    let mut lines = vec![format!("  {:<14}  {:<24}  {}", "FIELD", "LOCAL", "SERVER")];
    for conflict in &report.fields {
        lines.push(format!(
            "  {:<14}  {:<24}  {}",
            conflict.field,
            render_value(&conflict.local),
            render_value(&conflict.server)
        ));
    }
    lines
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "(empty)".to_string(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
