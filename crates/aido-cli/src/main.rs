//! AIDO CLI - queue task changes offline and sync them when the API is back
//!
//! Every mutation lands in the local queue first; `aido sync` replays it.

mod auth;
mod cli;
mod commands;
mod config_profiles;
mod error;


use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::auth_cmd::run_auth;
use crate::commands::common::resolve_db_path;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::conflicts::run_conflicts;
use crate::commands::mutate::{run_create, run_delete, run_update};
use crate::commands::queue::run_queue;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::from_default_env();
    let filter = match "aido=info".parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    let profile = cli.profile.as_deref();

    match cli.command {
        Commands::Create {
            resource,
            task_id,
            set,
        } => run_create(resource.into(), task_id.as_deref(), &set, &db_path).await?,
        Commands::Update { resource, id, set } => {
            run_update(resource.into(), &id, &set, &db_path).await?;
        }
        Commands::Delete { resource, id } => run_delete(resource.into(), &id, &db_path).await?,
        Commands::Queue { command } => run_queue(command, &db_path).await?,
        Commands::Status { json } => run_status(json, profile, &db_path).await?,
        Commands::Sync { watch } => run_sync(watch, profile, &db_path).await?,
        Commands::Conflicts { command } => run_conflicts(command, &db_path).await?,
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
        Commands::Config { command } => run_config(command, profile)?,
        Commands::Auth { command } => run_auth(command, profile)?,
    }

    Ok(())
}
