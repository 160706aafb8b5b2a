//! Coordinator configuration.

use std::time::Duration;

/// Configuration for a [`TransactionCoordinator`](crate::TransactionCoordinator)
/// and the store directory it runs over.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How long `begin(WRITE)` waits for the writer slot. `None` waits forever.
    pub begin_write_timeout: Option<Duration>,

    /// Whether to sync the journal after writing a COMMIT marker.
    ///
    /// Turning this off trades durability of the last commits for speed; it is
    /// meant for tests and bulk loads.
    pub sync_on_commit: bool,

    /// Whether to create the store directory if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            begin_write_timeout: None,
            sync_on_commit: true,
            create_if_missing: true,
        }
    }
}

impl CoordinatorConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long `begin(WRITE)` waits before failing with `WouldBlock`.
    #[must_use]
    pub const fn begin_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.begin_write_timeout = timeout;
        self
    }

    /// Sets whether to sync the journal on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets whether to create the store directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }
}
