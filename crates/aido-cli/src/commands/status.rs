use std::path::Path;

use aido_core::connectivity::{ConnectivityProbe, HttpProbe};
use aido_core::state::SyncState;
use serde::Serialize;

use crate::auth::{resolve_token, TokenSource};
use crate::commands::common::open_queue;
use crate::config_profiles::load_client_config;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub profile: String,
    pub api_base_url: String,
    pub online: bool,
    pub state: SyncState,
    pub pending: usize,
    pub awaiting_resolution: usize,
    pub dropped: usize,
    pub authenticated: bool,
}

pub async fn run_status(
    as_json: bool,
    profile: Option<&str>,
    db_path: &Path,
) -> Result<(), CliError> {
    let (profile_name, config) = load_client_config(profile).map_err(CliError::Config)?;
    let local = open_queue(db_path).await?;
    let online = HttpProbe::new(&config)?.is_reachable().await;
    let token = resolve_token(&profile_name)?;

    let awaiting_resolution = local.queue.conflicts().await.len();
    let report = StatusReport {
        profile: profile_name,
        api_base_url: config.api_base_url,
        online,
        state: SyncState::derive(online, false, awaiting_resolution == 0),
        pending: local.queue.len().await,
        awaiting_resolution,
        dropped: local.queue.dropped().await.len(),
        authenticated: token.is_some(),
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for line in format_status_lines(&report, token.map(|(_, source)| source)) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_status_lines(report: &StatusReport, token_source: Option<TokenSource>) -> Vec<String> {
    let connectivity = if report.online { "online" } else { "offline" };
    let auth = match token_source {
        Some(TokenSource::Environment) => "token from AIDO_TOKEN",
        Some(TokenSource::Keychain) => "token in keychain",
        None => "not signed in",
    };

    let mut lines = vec![
        format!("Profile:     {}", report.profile),
        format!("API:         {} ({connectivity})", report.api_base_url),
        format!("State:       {}", report.state),
        format!("Pending:     {}", report.pending),
        format!("Conflicts:   {}", report.awaiting_resolution),
        format!("Auth:        {auth}"),
    ];
    if report.dropped > 0 {
        lines.push(format!(
            "Dropped:     {} (see `aido queue dropped`)",
            report.dropped
        ));
    }
    lines
}
