//! CLI API token helpers with secure keychain persistence.

#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::{Mutex, OnceLock};

use aido_core::config::ENV_TOKEN;
use aido_core::AuthToken;
#[cfg(not(test))]
use keyring::Entry;

use crate::error::CliError;

#[cfg(not(test))]
const KEYRING_SERVICE_NAME: &str = "aido-cli";

/// Where the token in use came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Environment,
    Keychain,
}

#[derive(Clone)]
struct TokenStore {
    username: String,
}

impl TokenStore {
    fn new(profile_name: &str) -> Self {
        Self {
            username: format!("api_token:{profile_name}"),
        }
    }

    #[cfg(test)]
    fn test_store() -> &'static Mutex<HashMap<String, String>> {
        static STORE: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();
        STORE.get_or_init(|| Mutex::new(HashMap::new()))
    }

    #[cfg(not(test))]
    fn entry(&self) -> Result<Entry, CliError> {
        Entry::new(KEYRING_SERVICE_NAME, &self.username)
            .map_err(|error| CliError::Auth(error.to_string()))
    }

    #[cfg(not(test))]
    fn load(&self) -> Result<Option<String>, CliError> {
        match self.entry()?.get_password() {
            Ok(raw) => Ok(Some(raw)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(CliError::Auth(error.to_string())),
        }
    }

    #[cfg(test)]
    fn load(&self) -> Result<Option<String>, CliError> {
        let guard = Self::test_store()
            .lock()
            .map_err(|error| CliError::Auth(error.to_string()))?;
        Ok(guard.get(&self.username).cloned())
    }

    #[cfg(not(test))]
    fn save(&self, token: &AuthToken) -> Result<(), CliError> {
        self.entry()?
            .set_password(token.expose())
            .map_err(|error| CliError::Auth(error.to_string()))
    }

    #[cfg(test)]
    fn save(&self, token: &AuthToken) -> Result<(), CliError> {
        let mut guard = Self::test_store()
            .lock()
            .map_err(|error| CliError::Auth(error.to_string()))?;
        guard.insert(self.username.clone(), token.expose().to_string());
        Ok(())
    }

    #[cfg(not(test))]
    fn clear(&self) -> Result<(), CliError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(CliError::Auth(error.to_string())),
        }
    }

    #[cfg(test)]
    fn clear(&self) -> Result<(), CliError> {
        let mut guard = Self::test_store()
            .lock()
            .map_err(|error| CliError::Auth(error.to_string()))?;
        guard.remove(&self.username);
        Ok(())
    }
}

pub fn save_token(profile_name: &str, token: &AuthToken) -> Result<(), CliError> {
    TokenStore::new(profile_name).save(token)
}

pub fn load_stored_token(profile_name: &str) -> Result<Option<AuthToken>, CliError> {
    Ok(TokenStore::new(profile_name)
        .load()?
        .and_then(AuthToken::new))
}

pub fn clear_stored_token(profile_name: &str) -> Result<(), CliError> {
    TokenStore::new(profile_name).clear()
}

/// Token for `profile_name`: `AIDO_TOKEN` first, then the keychain.
pub fn resolve_token(profile_name: &str) -> Result<Option<(AuthToken, TokenSource)>, CliError> {
    if let Some(token) = std::env::var(ENV_TOKEN).ok().and_then(AuthToken::new) {
        return Ok(Some((token, TokenSource::Environment)));
    }
    Ok(load_stored_token(profile_name)?.map(|token| (token, TokenSource::Keychain)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_token_roundtrip() {
        let profile = "auth-roundtrip";
        let token = AuthToken::new("secret").unwrap();

        save_token(profile, &token).unwrap();
        assert_eq!(load_stored_token(profile).unwrap(), Some(token));

        clear_stored_token(profile).unwrap();
        assert_eq!(load_stored_token(profile).unwrap(), None);
        clear_stored_token(profile).unwrap();
    }

    #[test]
    fn profiles_do_not_share_tokens() {
        save_token("auth-a", &AuthToken::new("a").unwrap()).unwrap();
        assert_eq!(load_stored_token("auth-b").unwrap(), None);
    }
}
