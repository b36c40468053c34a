//! Expired change remover configuration.
//!
//! Controls the background job that deletes expired documents from every
//! tenant's change collection. The retention window itself is the
//! `changeStreams.expireAfterSeconds` cluster parameter, read from the
//! database on every sweep; this section only tunes how the job runs.
//!
//! # Example
//!
//! ```toml
//! [remover]
//! enabled = true
//! sleep_secs = 10
//! batch_size = 1000
//! max_deletes_per_tenant = 0
//! dry_run = false
//! ```

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Expired change remover configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoverConfig {
    /// Whether the remover runs at all.
    /// Default: true
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds to sleep between sweeps.
    /// Default: 10
    #[serde(default = "default_sleep_secs")]
    pub sleep_secs: u64,

    /// Maximum documents deleted per storage operation.
    /// Keeps each delete short so concurrent writers are not held up.
    /// Default: 1000
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,

    /// Maximum documents deleted per tenant per sweep.
    /// The remainder is picked up by later sweeps. Set to 0 for unlimited.
    /// Default: 0
    #[serde(default)]
    pub max_deletes_per_tenant: u64,

    /// If true, count what would be deleted without deleting anything.
    /// Default: false
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for RemoverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sleep_secs: default_sleep_secs(),
            batch_size: default_batch_size(),
            max_deletes_per_tenant: 0,
            dry_run: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_sleep_secs() -> u64 {
    10
}

fn default_batch_size() -> u64 {
    1000
}

impl RemoverConfig {
    /// Get the sleep interval as a Duration, never shorter than one second.
    pub fn sleep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sleep_secs.max(1))
    }

    /// Per-tenant delete cap, with 0 mapped to unlimited.
    pub fn max_deletes(&self) -> u64 {
        if self.max_deletes_per_tenant == 0 {
            u64::MAX
        } else {
            self.max_deletes_per_tenant
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sleep_secs == 0 {
            return Err(ConfigError::Validation(
                "remover.sleep_secs must be at least 1".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Validation(
                "remover.batch_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
