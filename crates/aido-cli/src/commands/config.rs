use aido_core::config::{normalize_base_url, ClientConfig};
use aido_core::util::normalize_text_option;

use crate::cli::ConfigCommands;
use crate::config_profiles::{default_config_path, CliProfilesConfig};
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            api_base_url,
            request_timeout,
            sync_interval,
            no_activate,
        } => run_config_init(
            global_profile,
            api_base_url,
            request_timeout,
            sync_interval,
            no_activate,
        ),
        ConfigCommands::Show => run_config_show(global_profile),
    }
}

pub fn run_config_init(
    profile_name: Option<&str>,
    api_base_url: Option<String>,
    request_timeout: Option<u64>,
    sync_interval: Option<u64>,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile_name);

    let profile = config.profile_mut_or_default(&profile_name);
    if let Some(url) = normalize_text_option(api_base_url) {
        let url = normalize_base_url(&url).map_err(|error| CliError::Config(error.to_string()))?;
        profile.api_base_url = Some(url);
    }
    if let Some(secs) = request_timeout {
        profile.request_timeout_secs = Some(secs);
    }
    if let Some(secs) = sync_interval {
        profile.sync_interval_secs = Some(secs);
    }
    let effective = profile.client_config().map_err(CliError::Config)?;

    if !no_activate {
        config.active_profile = Some(profile_name.clone());
    }

    let path = config.save().map_err(CliError::Config)?;
    println!("Profile '{}' initialized at {}", profile_name, path.display());
    println!("Syncing against {}", effective.api_base_url);
    Ok(())
}

pub fn run_config_show(profile_name: Option<&str>) -> Result<(), CliError> {
    let config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile_name);
    let client_config: ClientConfig = config
        .profile(&profile_name)
        .cloned()
        .unwrap_or_default()
        .client_config()
        .map_err(CliError::Config)?;

    println!("Config file: {}", default_config_path().display());
    println!("Profile:     {profile_name}");
    println!("{}", serde_json::to_string_pretty(&client_config)?);
    Ok(())
}
