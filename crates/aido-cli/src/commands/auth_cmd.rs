use std::io::{self, IsTerminal, Read};

use aido_core::AuthToken;

use crate::auth::{clear_stored_token, resolve_token, save_token, TokenSource};
use crate::cli::AuthCommands;
use crate::config_profiles::CliProfilesConfig;
use crate::error::CliError;

pub fn run_auth(command: AuthCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    let config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(global_profile);
    match command {
        AuthCommands::Login { token } => {
            let raw = match token {
                Some(token) => token,
                None => read_piped_stdin()?.unwrap_or_default(),
            };
            let token = AuthToken::new(raw)
                .ok_or_else(|| CliError::Auth("token must not be empty".to_string()))?;
            save_token(&profile_name, &token)?;
            println!("Stored API token for profile '{profile_name}'");
            Ok(())
        }
        AuthCommands::Status => {
            match resolve_token(&profile_name)? {
                Some((_, TokenSource::Environment)) => {
                    println!("Profile '{profile_name}' uses the token from AIDO_TOKEN.");
                }
                Some((_, TokenSource::Keychain)) => {
                    println!("Profile '{profile_name}' has a token in the keychain.");
                }
                None => println!("Profile '{profile_name}' is not signed in."),
            }
            Ok(())
        }
        AuthCommands::Logout => {
            clear_stored_token(&profile_name)?;
            println!("Signed out profile '{profile_name}'");
            Ok(())
        }
    }
}

fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(Some(buffer))
}
