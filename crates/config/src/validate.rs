//! Semantic checks on a loaded configuration.

use crate::schema::{MAX_LEASE_DURATION_SECS, RotaConfig, StoreBackend};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "scheduler.lease_refresh_secs"
    pub path: &'static str,
    pub message: String,
}

impl Diagnostic {
    fn error(path: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            path,
            message: message.into(),
        }
    }

    fn warning(path: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            path,
            message: message.into(),
        }
    }
}

/// True when `name` can be spliced into SQL as a bare table name.
#[must_use]
pub fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Check a configuration for values the engine cannot run with.
pub fn validate(config: &RotaConfig) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    let sched = &config.scheduler;

    if sched.lease_duration_secs == 0 {
        out.push(Diagnostic::error(
            "scheduler.lease_duration_secs",
            "lease duration must be > 0",
        ));
    } else if sched.lease_duration_secs > MAX_LEASE_DURATION_SECS {
        out.push(Diagnostic::error(
            "scheduler.lease_duration_secs",
            format!(
                "lease duration ({}s) must not exceed {MAX_LEASE_DURATION_SECS}s",
                sched.lease_duration_secs
            ),
        ));
    }
    if let Some(refresh) = sched.lease_refresh_secs {
        if refresh == 0 {
            out.push(Diagnostic::error(
                "scheduler.lease_refresh_secs",
                "refresh interval must be > 0",
            ));
        } else if refresh >= sched.lease_duration_secs {
            out.push(Diagnostic::error(
                "scheduler.lease_refresh_secs",
                format!(
                    "refresh interval ({refresh}s) must be shorter than the lease ({}s)",
                    sched.lease_duration_secs
                ),
            ));
        }
    }
    if sched.retry_pause_ms == 0 {
        out.push(Diagnostic::warning(
            "scheduler.retry_pause_ms",
            "a zero retry pause lets a contended job spin on the store",
        ));
    }
    if sched.disabled_poll_ms == 0 {
        out.push(Diagnostic::error(
            "scheduler.disabled_poll_ms",
            "disabled poll interval must be > 0",
        ));
    }
    if sched.backoff_step_ms == 0 {
        out.push(Diagnostic::warning(
            "scheduler.backoff_step_ms",
            "a zero backoff step retries faults without pausing",
        ));
    }
    if sched.backoff_cap_ms < sched.backoff_step_ms {
        out.push(Diagnostic::error(
            "scheduler.backoff_cap_ms",
            "backoff cap must be at least one backoff step",
        ));
    }

    let store = &config.store;
    if !is_sql_identifier(&store.job_info_table) {
        out.push(Diagnostic::error(
            "store.job_info_table",
            format!("not a plain SQL identifier: {:?}", store.job_info_table),
        ));
    }
    if !is_sql_identifier(&store.lease_table) {
        out.push(Diagnostic::error(
            "store.lease_table",
            format!("not a plain SQL identifier: {:?}", store.lease_table),
        ));
    }
    if store.job_info_table == store.lease_table {
        out.push(Diagnostic::error(
            "store.lease_table",
            "job info and lease tables must differ",
        ));
    }
    if store.backend == StoreBackend::Sqlite && store.database_url.is_none() {
        out.push(Diagnostic::error(
            "store.database_url",
            "the sqlite backend needs a database_url",
        ));
    }

    out
}
