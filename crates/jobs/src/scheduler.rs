//! Due-time strategies. Each registered job is bound to exactly one scheduler.

use std::sync::Arc;

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    tokio_util::sync::CancellationToken,
    tracing::debug,
};

use crate::{Result, clock::Clock, delay::Delayer, job::Job, types::JobInfo};

/// Decides whether a job is due, waiting for it if it is not.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Short name used in binding errors and logs.
    fn name(&self) -> &'static str;

    /// Whether this scheduler understands the job's trigger.
    fn can_handle(&self, job: &dyn Job) -> bool;

    /// `Ok(true)` if the job is due now. Otherwise waits until its next due
    /// time (or cancellation) and returns `Ok(false)`, so the caller re-reads
    /// the job's state before deciding again.
    async fn wait_until_next(
        &self,
        job: &dyn Job,
        info: &JobInfo,
        cancel: &CancellationToken,
    ) -> Result<bool>;
}

/// Shared tail of every scheduler: due now, or sleep until `next_due`.
pub(crate) async fn wait_until(
    clock: &Arc<dyn Clock>,
    delayer: &Arc<dyn Delayer>,
    job_id: &str,
    next_due: DateTime<Utc>,
    cancel: &CancellationToken,
) -> bool {
    let now = clock.now();
    if next_due <= now {
        return true;
    }

    let wait = (next_due - now).to_std().unwrap_or_default();
    debug!(job_id, next_due = %next_due, wait_ms = wait.as_millis() as u64, "job not due yet");
    delayer.delay(wait, cancel).await;
    false
}
