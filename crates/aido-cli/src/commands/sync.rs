use std::path::Path;

use aido_core::connectivity::{ConnectivityMonitor, HttpProbe};
use aido_core::executor::HttpExecutor;
use aido_core::sync::{AutoSync, PassResult, SkipReason, SyncCoordinator, SyncEvent, SyncSummary};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::auth::resolve_token;
use crate::commands::common::{open_queue, short_id};
use crate::config_profiles::load_client_config;
use crate::error::CliError;

pub async fn run_sync(watch: bool, profile: Option<&str>, db_path: &Path) -> Result<(), CliError> {
    let (profile_name, config) = load_client_config(profile).map_err(CliError::Config)?;
    let token = resolve_token(&profile_name)?.map(|(token, _)| token);
    let local = open_queue(db_path).await?;

    let probe = HttpProbe::new(&config)?;
    let monitor = ConnectivityMonitor::from_probe(&probe).await;
    let coordinator = SyncCoordinator::new(
        local.queue.clone(),
        HttpExecutor::new(config.clone())?,
        monitor.clone(),
    )
    .with_max_retries(config.max_retries);
    let printer = spawn_event_printer(coordinator.subscribe());

    if watch {
        let token = token.ok_or(CliError::NotAuthenticated)?;
        let probe_loop = monitor.spawn_probe_loop(probe, config.probe_interval);
        println!(
            "Watching {} (sync every {}s, Ctrl-C to stop)",
            config.api_base_url,
            config.sync_interval.as_secs()
        );

        let driver = AutoSync::new(coordinator, token, config.sync_interval);
        driver.run_until(wait_for_interrupt()).await;
        probe_loop.abort();
    } else {
        let result = coordinator.sync(token.as_ref()).await;
        drop(coordinator);
        match result {
            Ok(PassResult::Completed(_)) => {}
            Ok(PassResult::Skipped(SkipReason::Offline)) => {
                println!(
                    "Offline: {} is unreachable; {} operation(s) stay queued.",
                    config.api_base_url,
                    local.queue.len().await
                );
            }
            Ok(PassResult::Skipped(SkipReason::EmptyQueue)) => println!("Nothing to sync."),
            Ok(PassResult::Skipped(SkipReason::AlreadyRunning)) => {
                println!("A sync pass is already running.");
            }
            Err(aido_core::Error::NotAuthenticated) => return Err(CliError::NotAuthenticated),
            Err(error) => return Err(error.into()),
        }
    }

    let _ = printer.await;
    Ok(())
}

/// Resolves on Ctrl-C; a running pass still completes before the driver stops.
async fn wait_for_interrupt() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => eprintln!("Stopping after the current sync pass..."),
        Err(error) => {
            tracing::error!("Cannot listen for Ctrl-C: {}", error);
            std::future::pending::<()>().await;
        }
    }
}

fn spawn_event_printer(mut events: broadcast::Receiver<SyncEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(line) = format_sync_event(&event) {
                        println!("{line}");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Skipped {skipped} sync event(s)");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

pub fn format_sync_event(event: &SyncEvent) -> Option<String> {
    match event {
        SyncEvent::Succeeded { operation } => Some(format!(
            "synced    {:<13}  {}",
            short_id(&operation.id),
            operation.describe()
        )),
        SyncEvent::Retrying {
            operation,
            retry_count,
            reason,
        } => Some(format!(
            "retrying  {:<13}  {} (attempt {retry_count} failed: {reason})",
            short_id(&operation.id),
            operation.describe()
        )),
        SyncEvent::Conflict { operation, .. } => Some(format!(
            "conflict  {:<13}  {}; resolve with `aido conflicts show {}`",
            short_id(&operation.id),
            operation.describe(),
            short_id(&operation.id)
        )),
        SyncEvent::Dropped { operation, reason } => Some(format!(
            "DROPPED   {:<13}  {} was not synced after {} attempts: {reason}",
            short_id(&operation.id),
            operation.describe(),
            operation.retry_count
        )),
        SyncEvent::PassCompleted(summary) => Some(format_summary(summary)),
    }
}

pub fn format_summary(summary: &SyncSummary) -> String {
    let mut line = format!(
        "Sync finished: {} synced, {} retrying, {} dropped, {} conflicted",
        summary.succeeded, summary.retried, summary.dropped, summary.conflicted
    );
    if summary.deferred > 0 {
        line.push_str(&format!(", {} deferred", summary.deferred));
    }
    line
}
