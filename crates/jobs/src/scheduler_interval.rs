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

/// Handles [`Trigger::Interval`] jobs. A job that never ran is due at once.
pub struct IntervalScheduler {
    clock: Arc<dyn Clock>,
    delayer: Arc<dyn Delayer>,
}

impl IntervalScheduler {
    pub fn new(clock: Arc<dyn Clock>, delayer: Arc<dyn Delayer>) -> Self {
        Self { clock, delayer }
    }

    /// `baseline + interval`, or now for a job that never ran.
    pub fn next_due(&self, job: &dyn Job, info: &JobInfo) -> Result<DateTime<Utc>> {
        let Trigger::Interval(trigger) = job.trigger() else {
            return Err(Error::UnsupportedTrigger {
                scheduler: self.name(),
                job_id: job.id().to_string(),
            });
        };

        let Some(baseline) = trigger.mode().baseline(info) else {
            return Ok(self.clock.now());
        };
        trigger
            .next_after(baseline)
            .ok_or_else(|| Error::NoMoreOccurrences {
                job_id: job.id().to_string(),
                trigger: job.trigger().to_string(),
            })
    }
}

#[async_trait]
impl Scheduler for IntervalScheduler {
    fn name(&self) -> &'static str {
        "interval"
    }

    fn can_handle(&self, job: &dyn Job) -> bool {
        matches!(job.trigger(), Trigger::Interval(_))
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
