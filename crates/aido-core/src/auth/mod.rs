//! Bearer token used for every REST call.

use std::fmt;

use crate::error::{Error, Result};
use crate::util::normalize_text_option;

/// API bearer token. Never printed in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wrap a raw token; blank input yields `None`.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        normalize_text_option(Some(raw.into())).map(Self)
    }

    /// Resolve the token required for a sync pass.
    ///
    /// A missing token is a precondition failure: nothing may be sent.
    pub fn resolve(raw: Option<&str>) -> Result<Self> {
        raw.and_then(Self::new).ok_or(Error::NotAuthenticated)
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Value for the `Authorization` header.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_tuple("AuthToken").field(&"[REDACTED]").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_token() {
        let token = AuthToken::new("secret-token").unwrap();
        let debug = format!("{token:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn resolve_requires_a_non_blank_token() {
        assert!(matches!(AuthToken::resolve(None), Err(Error::NotAuthenticated)));
        assert!(matches!(
            AuthToken::resolve(Some("  ")),
            Err(Error::NotAuthenticated)
        ));
        assert_eq!(
            AuthToken::resolve(Some(" abc ")).unwrap().bearer(),
            "Bearer abc"
        );
    }
}
