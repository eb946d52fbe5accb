//! Persisted job state.

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

/// Scheduling state persisted per job id. `None` means "never".
///
/// Only the executor writes it, always as a full read-modify-save while it
/// holds the job's lease.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
}

impl JobInfo {
    /// The record a store hands out for a job it has never seen.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Latest of the three timestamps.
    #[must_use]
    pub fn last_completion(&self) -> Option<DateTime<Utc>> {
        self.last_triggered
            .max(self.last_failure)
            .max(self.last_success)
    }
}

/// Which timestamp the next due time is counted from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TriggerCountMode {
    /// Count from the last time the job was triggered.
    #[default]
    CountSinceLastTrigger,
    /// Count from whichever of triggered/failed/succeeded happened last.
    CountSinceLastCompletion,
}

impl TriggerCountMode {
    /// Baseline for the next due time; `None` if the job never ran.
    #[must_use]
    pub fn baseline(self, info: &JobInfo) -> Option<DateTime<Utc>> {
        match self {
            Self::CountSinceLastTrigger => info.last_triggered,
            Self::CountSinceLastCompletion => info.last_completion(),
        }
    }
}
