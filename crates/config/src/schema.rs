/// Config schema types for the job engine and its stores.
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lease duration used when nothing is configured (10 minutes).
pub const DEFAULT_LEASE_DURATION_SECS: u64 = 10 * 60;

/// Longest accepted lease (30 days).
pub const MAX_LEASE_DURATION_SECS: u64 = 30 * 24 * 60 * 60;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RotaConfig {
    pub scheduler: SchedulerConfig,
    pub store: StoreConfig,
}

/// Run-loop and lease timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How long a lease stays live without a refresh.
    pub lease_duration_secs: u64,
    /// Refresh period for leases held during execution. Unset means leases are
    /// never refreshed, so a job must finish well inside `lease_duration_secs`.
    pub lease_refresh_secs: Option<u64>,
    /// Pause after an execution attempt that did not succeed (lease missed,
    /// job failed).
    pub retry_pause_ms: u64,
    /// Backoff grows by this much per consecutive run-loop fault.
    pub backoff_step_ms: u64,
    /// Upper bound for the run-loop backoff.
    pub backoff_cap_ms: u64,
    /// How often a paused job re-checks the enablement predicate.
    pub disabled_poll_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lease_duration_secs: DEFAULT_LEASE_DURATION_SECS,
            lease_refresh_secs: None,
            retry_pause_ms: 1_000,
            backoff_step_ms: 1_000,
            backoff_cap_ms: 60_000,
            disabled_poll_ms: 1_000,
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    #[must_use]
    pub fn lease_refresh(&self) -> Option<Duration> {
        self.lease_refresh_secs.map(Duration::from_secs)
    }

    #[must_use]
    pub fn retry_pause(&self) -> Duration {
        Duration::from_millis(self.retry_pause_ms)
    }

    #[must_use]
    pub fn backoff_step(&self) -> Duration {
        Duration::from_millis(self.backoff_step_ms)
    }

    #[must_use]
    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }

    #[must_use]
    pub fn disabled_poll(&self) -> Duration {
        Duration::from_millis(self.disabled_poll_ms)
    }
}

/// Which persistence backend holds job state and leases.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local, lost on restart. Only safe for a single instance.
    #[default]
    Memory,
    Sqlite,
}

/// Persistence backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Connection URL, e.g. `sqlite://rota.db`. Required for `sqlite`.
    pub database_url: Option<String>,
    /// Table holding one row of timestamps per job id.
    pub job_info_table: String,
    /// Table holding one lease row per job id.
    pub lease_table: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            database_url: None,
            job_info_table: "rota_job_info".into(),
            lease_table: "rota_job_leases".into(),
        }
    }
}
