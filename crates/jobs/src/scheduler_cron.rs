use std::sync::Arc;

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    tokio_util::sync::CancellationToken,
};

use crate::{
    Error, Result,
    clock::Clock,
    delay::Delayer,
    job::Job,
    scheduler::{Scheduler, wait_until},
    trigger::Trigger,
    types::JobInfo,
};

/// Handles [`Trigger::Cron`] jobs.
///
/// A job that never ran counts from the moment the scheduler was created, so a
/// fresh registration waits for the next occurrence rather than firing for
/// every occurrence since the epoch.
pub struct CronScheduler {
    clock: Arc<dyn Clock>,
    delayer: Arc<dyn Delayer>,
    started_at: DateTime<Utc>,
}

impl CronScheduler {
    pub fn new(clock: Arc<dyn Clock>, delayer: Arc<dyn Delayer>) -> Self {
        let started_at = clock.now();
        Self {
            clock,
            delayer,
            started_at,
        }
    }

    /// Next occurrence after the job's baseline.
    pub fn next_due(&self, job: &dyn Job, info: &JobInfo) -> Result<DateTime<Utc>> {
        let Trigger::Cron(trigger) = job.trigger() else {
            return Err(Error::UnsupportedTrigger {
                scheduler: self.name(),
                job_id: job.id().to_string(),
            });
        };

        let baseline = trigger.mode().baseline(info).unwrap_or(self.started_at);
        trigger
            .next_after(baseline)
            .ok_or_else(|| Error::NoMoreOccurrences {
                job_id: job.id().to_string(),
                trigger: job.trigger().to_string(),
            })
    }
}

#[async_trait]
impl Scheduler for CronScheduler {
    fn name(&self) -> &'static str {
        "cron"
    }

    fn can_handle(&self, job: &dyn Job) -> bool {
        matches!(job.trigger(), Trigger::Cron(_))
    }

    async fn wait_until_next(
        &self,
        job: &dyn Job,
        info: &JobInfo,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let next_due = self.next_due(job, info)?;
        Ok(wait_until(&self.clock, &self.delayer, job.id(), next_due, cancel).await)
    }
}
