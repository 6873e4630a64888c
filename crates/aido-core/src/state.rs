//! Sync status indicator shown by front ends.

use std::fmt;

use serde::Serialize;

/// Unified sync state derived from connectivity and the last pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Offline,
    Syncing,
    Synced,
    Error,
}

impl SyncState {
    /// Derive the indicator state.
    ///
    /// `last_pass_clean` is false when the last pass left retries, drops or
    /// conflicts behind.
    #[must_use]
    pub const fn derive(online: bool, syncing: bool, last_pass_clean: bool) -> Self {
        if syncing {
            Self::Syncing
        } else if !online {
            Self::Offline
        } else if last_pass_clean {
            Self::Synced
        } else {
            Self::Error
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Error => "needs attention",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syncing_wins_over_connectivity() {
        assert_eq!(SyncState::derive(false, true, true), SyncState::Syncing);
    }

    #[test]
    fn offline_and_error_states() {
        assert_eq!(SyncState::derive(false, false, true), SyncState::Offline);
        assert_eq!(SyncState::derive(true, false, false), SyncState::Error);
        assert_eq!(SyncState::derive(true, false, true), SyncState::Synced);
    }
}
