//! Runs one attempt of a job under its lease and records the outcome.

use std::{any::Any, convert::Infallible, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use {
    futures::FutureExt,
    tokio_util::sync::CancellationToken,
    tracing::{Instrument, debug, error, info, info_span, warn},
    uuid::Uuid,
};

#[cfg(feature = "metrics")]
use rota_metrics::{counter, histogram, jobs as job_metrics, labels, status};

use crate::{
    Result,
    clock::Clock,
    delay::Delayer,
    job::Job,
    store::{JobLease, JobStore, LeaseGuard},
};

/// How an execution attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The job body returned `Ok`.
    Completed,
    /// The job body returned `Err` and the run was not cancelled.
    Failed,
    /// The run was cancelled while the job body was executing.
    Cancelled,
    /// Another instance holds the lease.
    Skipped,
}

impl Outcome {
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Completed)
    }

    #[cfg(feature = "metrics")]
    fn status(self) -> &'static str {
        match self {
            Self::Completed => status::COMPLETED,
            Self::Failed => status::FAILED,
            Self::Cancelled => status::CANCELLED,
            Self::Skipped => status::MISSED,
        }
    }
}

/// Enforces mutual exclusion around job execution.
pub struct Executor {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    delayer: Arc<dyn Delayer>,
    lease_refresh: Option<Duration>,
}

impl Executor {
    pub fn new(store: Arc<dyn JobStore>, clock: Arc<dyn Clock>, delayer: Arc<dyn Delayer>) -> Self {
        Self {
            store,
            clock,
            delayer,
            lease_refresh: None,
        }
    }

    /// Refresh the lease every `period` while the job body runs. `None` keeps
    /// the lease at its initial expiry, so jobs must finish well within it.
    #[must_use]
    pub fn with_lease_refresh(mut self, period: Option<Duration>) -> Self {
        self.lease_refresh = period.filter(|p| !p.is_zero());
        self
    }

    /// Take the job's lease, run it once and persist the result.
    ///
    /// `Err` means the store failed; the job body's own errors are recorded
    /// and reported as [`Outcome::Failed`]. The lease is released on every
    /// path out of this function.
    pub async fn execute(&self, job: &dyn Job, cancel: &CancellationToken) -> Result<Outcome> {
        let job_id = job.id();
        let instance_id = Uuid::new_v4().to_string();

        let Some(lease) = self.acquire(job_id, &instance_id).await? else {
            debug!(job_id, "lease held by another instance, skipping");
            return Ok(Outcome::Skipped);
        };
        let guard = LeaseGuard::new(lease);

        let span = info_span!("job", job_id, instance_id = %instance_id);
        let outcome = self
            .run_leased(job, &guard, cancel)
            .instrument(span)
            .await;
        let released = guard.release().await;

        let outcome = outcome?;
        released?;
        Ok(outcome)
    }

    async fn acquire(&self, job_id: &str, instance_id: &str) -> Result<Option<Box<dyn JobLease>>> {
        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();
        #[cfg(feature = "metrics")]
        counter!(job_metrics::LOCK_ATTEMPTS_STARTED_TOTAL, labels::JOB_ID => job_id.to_string())
            .increment(1);

        let result = self.store.try_lock(job_id, instance_id).await;

        #[cfg(feature = "metrics")]
        {
            let attempt = match &result {
                Ok(Some(_)) => status::ACQUIRED,
                Ok(None) => status::MISSED,
                Err(_) => status::ERROR,
            };
            counter!(
                job_metrics::LOCK_ATTEMPTS_COMPLETED_TOTAL,
                labels::JOB_ID => job_id.to_string(),
                labels::STATUS => attempt
            )
            .increment(1);
            histogram!(job_metrics::LOCK_ATTEMPT_DURATION_SECONDS, labels::JOB_ID => job_id.to_string())
                .record(started.elapsed().as_secs_f64());
        }

        result
    }

    async fn run_leased(
        &self,
        job: &dyn Job,
        guard: &LeaseGuard,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let mut info = self.store.retrieve(job.id()).await?;
        info.last_triggered = Some(self.clock.now());
        self.store.save(&info).await?;

        debug!("executing job");
        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();
        #[cfg(feature = "metrics")]
        counter!(job_metrics::EXECUTIONS_STARTED_TOTAL, labels::JOB_ID => job.id().to_string())
            .increment(1);

        let outcome = match self.run_job(job, guard, cancel).await {
            Ok(()) => {
                info.last_success = Some(self.clock.now());
                debug!("job completed");
                Outcome::Completed
            },
            Err(e) if cancel.is_cancelled() => {
                info!(error = %e, "job cancelled");
                Outcome::Cancelled
            },
            Err(e) => {
                info.last_failure = Some(self.clock.now());
                error!(error = %e, "job failed");
                Outcome::Failed
            },
        };

        #[cfg(feature = "metrics")]
        {
            counter!(
                job_metrics::EXECUTIONS_COMPLETED_TOTAL,
                labels::JOB_ID => job.id().to_string(),
                labels::STATUS => outcome.status()
            )
            .increment(1);
            histogram!(job_metrics::EXECUTION_DURATION_SECONDS, labels::JOB_ID => job.id().to_string())
                .record(started.elapsed().as_secs_f64());
        }

        self.store.save(&info).await?;
        Ok(outcome)
    }

    async fn run_job(
        &self,
        job: &dyn Job,
        guard: &LeaseGuard,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        // Panics surface here only if the build unwinds; the release profile
        // must not switch to `panic = "abort"`.
        let body = AssertUnwindSafe(job.execute(cancel.clone()))
            .catch_unwind()
            .map(|result| {
                result.unwrap_or_else(|panic| {
                    Err(anyhow::anyhow!("job panicked: {}", panic_message(&*panic)))
                })
            });

        let Some(period) = self.lease_refresh else {
            return body.await;
        };

        tokio::select! {
            result = body => result,
            never = self.keep_alive(guard, period, cancel) => match never {},
        }
    }

    /// Refreshes the lease until it is lost or the run is cancelled, then
    /// parks so the job body decides when the attempt ends.
    async fn keep_alive(
        &self,
        guard: &LeaseGuard,
        period: Duration,
        cancel: &CancellationToken,
    ) -> Infallible {
        loop {
            self.delayer.delay(period, cancel).await;
            if cancel.is_cancelled() {
                break;
            }
            match guard.refresh().await {
                Ok(()) => debug!("lease refreshed"),
                Err(e) => {
                    warn!(error = %e, "lease lost while job was running, no longer refreshing");
                    #[cfg(feature = "metrics")]
                    counter!(job_metrics::LEASE_REFRESH_FAILURES_TOTAL).increment(1);
                    break;
                },
            }
        }
        std::future::pending().await
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
