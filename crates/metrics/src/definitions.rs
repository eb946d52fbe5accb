//! Metric name and label definitions.
//!
//! Every metric the engine records is named here so the set of exported series
//! is documented in one place.

/// Job execution and lease metrics
pub mod jobs {
    /// Lease acquisition attempts started
    pub const LOCK_ATTEMPTS_STARTED_TOTAL: &str = "rota_jobs_lock_attempts_started_total";
    /// Lease acquisition attempts finished, labelled by `status`
    /// (`acquired`, `missed`, `error`)
    pub const LOCK_ATTEMPTS_COMPLETED_TOTAL: &str = "rota_jobs_lock_attempts_completed_total";
    /// Time spent acquiring leases in seconds
    pub const LOCK_ATTEMPT_DURATION_SECONDS: &str = "rota_jobs_lock_attempt_duration_seconds";
    /// Job bodies started
    pub const EXECUTIONS_STARTED_TOTAL: &str = "rota_jobs_executions_started_total";
    /// Job bodies finished, labelled by `status` (`completed`, `failed`, `cancelled`)
    pub const EXECUTIONS_COMPLETED_TOTAL: &str = "rota_jobs_executions_completed_total";
    /// Job body duration in seconds
    pub const EXECUTION_DURATION_SECONDS: &str = "rota_jobs_execution_duration_seconds";
    /// Faults caught by a run-loop and retried with backoff
    pub const LOOP_FAULTS_TOTAL: &str = "rota_jobs_loop_faults_total";
    /// Lease refreshes that found the lease gone
    pub const LEASE_REFRESH_FAILURES_TOTAL: &str = "rota_jobs_lease_refresh_failures_total";
}

/// Common label keys
pub mod labels {
    pub const JOB_ID: &str = "job_id";
    pub const STATUS: &str = "status";
}

/// Values for the `status` label
pub mod status {
    pub const ACQUIRED: &str = "acquired";
    pub const MISSED: &str = "missed";
    pub const ERROR: &str = "error";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
    pub const CANCELLED: &str = "cancelled";
}
