//! Binds jobs to schedulers and drives one run-loop per job.

use std::{
    collections::HashSet,
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    futures::{FutureExt, future::BoxFuture},
    rota_config::SchedulerConfig,
    tokio::task::{JoinHandle, JoinSet},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info},
};

#[cfg(feature = "metrics")]
use rota_metrics::{counter, jobs as job_metrics, labels};

use crate::{
    Error, Result,
    clock::{Clock, SystemClock},
    delay::{Delayer, TokioDelayer},
    executor::Executor,
    job::Job,
    scheduler::Scheduler,
    scheduler_cron::CronScheduler,
    scheduler_interval::IntervalScheduler,
    store::JobStore,
};

/// Predicate re-evaluated before every loop iteration. While it returns
/// `false` no job is considered due.
pub type EnabledFn = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

/// Delay before the next attempt after `faults` consecutive run-loop faults.
#[must_use]
pub fn backoff_delay(faults: u32, step: Duration, cap: Duration) -> Duration {
    step.saturating_mul(faults).min(cap)
}

// ── Builder ─────────────────────────────────────────────────────────────────

pub struct JobsWorkerBuilder {
    store: Arc<dyn JobStore>,
    jobs: Vec<Arc<dyn Job>>,
    schedulers: Vec<Arc<dyn Scheduler>>,
    default_schedulers: bool,
    clock: Arc<dyn Clock>,
    delayer: Arc<dyn Delayer>,
    enabled: Option<EnabledFn>,
    config: SchedulerConfig,
}

impl JobsWorkerBuilder {
    #[must_use]
    pub fn job(mut self, job: impl Job + 'static) -> Self {
        self.jobs.push(Arc::new(job));
        self
    }

    #[must_use]
    pub fn shared_job(mut self, job: Arc<dyn Job>) -> Self {
        self.jobs.push(job);
        self
    }

    /// Register a scheduler in addition to the built-in cron and interval
    /// ones.
    #[must_use]
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.schedulers.push(scheduler);
        self
    }

    /// Only use schedulers registered with [`Self::scheduler`].
    #[must_use]
    pub fn without_default_schedulers(mut self) -> Self {
        self.default_schedulers = false;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn delayer(mut self, delayer: Arc<dyn Delayer>) -> Self {
        self.delayer = delayer;
        self
    }

    #[must_use]
    pub fn enabled<F, Fut>(mut self, predicate: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.enabled = Some(Arc::new(move || predicate().boxed()));
        self
    }

    #[must_use]
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Bind every job to exactly one scheduler. Nothing runs if any job is
    /// duplicated, unschedulable or claimed by more than one scheduler.
    pub fn build(self) -> Result<JobsWorker> {
        let mut schedulers = Vec::with_capacity(self.schedulers.len() + 2);
        if self.default_schedulers {
            schedulers.push(Arc::new(CronScheduler::new(
                Arc::clone(&self.clock),
                Arc::clone(&self.delayer),
            )) as Arc<dyn Scheduler>);
            schedulers.push(Arc::new(IntervalScheduler::new(
                Arc::clone(&self.clock),
                Arc::clone(&self.delayer),
            )));
        }
        schedulers.extend(self.schedulers);

        let mut seen = HashSet::new();
        for job in &self.jobs {
            if !seen.insert(job.id()) {
                return Err(Error::DuplicateJobId {
                    job_id: job.id().to_string(),
                });
            }
        }

        let mut bindings = Vec::with_capacity(self.jobs.len());
        for job in &self.jobs {
            let matching: Vec<&Arc<dyn Scheduler>> = schedulers
                .iter()
                .filter(|s| s.can_handle(job.as_ref()))
                .collect();
            match matching.as_slice() {
                [] => {
                    return Err(Error::JobNotSchedulable {
                        job_id: job.id().to_string(),
                    });
                },
                [scheduler] => {
                    debug!(job_id = job.id(), scheduler = scheduler.name(), trigger = %job.trigger(), "job bound");
                    bindings.push(Binding {
                        job: Arc::clone(job),
                        scheduler: Arc::clone(scheduler),
                    });
                },
                many => {
                    return Err(Error::JobMultipleSchedulers {
                        job_id: job.id().to_string(),
                        schedulers: many.iter().map(|s| s.name()).collect(),
                    });
                },
            }
        }

        let executor = Executor::new(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            Arc::clone(&self.delayer),
        )
        .with_lease_refresh(self.config.lease_refresh());

        Ok(JobsWorker {
            inner: Arc::new(Inner {
                bindings,
                store: self.store,
                executor,
                delayer: self.delayer,
                enabled: self.enabled,
                config: self.config,
            }),
            running: Mutex::new(None),
        })
    }
}

// ── Worker ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct Binding {
    job: Arc<dyn Job>,
    scheduler: Arc<dyn Scheduler>,
}

struct Inner {
    bindings: Vec<Binding>,
    store: Arc<dyn JobStore>,
    executor: Executor,
    delayer: Arc<dyn Delayer>,
    enabled: Option<EnabledFn>,
    config: SchedulerConfig,
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

/// Runs every registered job on its schedule until cancelled.
pub struct JobsWorker {
    inner: Arc<Inner>,
    running: Mutex<Option<Running>>,
}

impl JobsWorker {
    pub fn builder(store: Arc<dyn JobStore>) -> JobsWorkerBuilder {
        JobsWorkerBuilder {
            store,
            jobs: Vec::new(),
            schedulers: Vec::new(),
            default_schedulers: true,
            clock: Arc::new(SystemClock),
            delayer: Arc::new(TokioDelayer),
            enabled: None,
            config: SchedulerConfig::default(),
        }
    }

    /// Ids of the bound jobs, in registration order.
    pub fn job_ids(&self) -> impl Iterator<Item = &str> {
        self.inner.bindings.iter().map(|b| b.job.id())
    }

    /// Run every job loop until `cancel` fires.
    ///
    /// A fatal fault in one loop (an exhausted cron expression, for instance)
    /// stops all of them and is returned.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        Arc::clone(&self.inner).run(cancel).await
    }

    /// Spawn [`Self::run`] in the background.
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.is_some() {
            return Err(Error::message("jobs worker is already running"));
        }

        let cancel = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { inner.run(token).await });
        *running = Some(Running { cancel, handle });
        Ok(())
    }

    /// Cancel a worker started with [`Self::start`] and wait for every loop to
    /// unwind. Returns the fatal fault that stopped it early, if any.
    pub async fn stop(&self) -> Result<()> {
        let running = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(Running { cancel, handle }) = running else {
            return Ok(());
        };

        cancel.cancel();
        handle
            .await
            .map_err(|e| Error::external("jobs worker task failed", e))?
    }
}

impl Inner {
    async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let cancel = cancel.child_token();
        info!(jobs = self.bindings.len(), "starting job loops");

        let mut loops = JoinSet::new();
        for binding in self.bindings.iter().cloned() {
            let inner = Arc::clone(&self);
            let cancel = cancel.clone();
            loops.spawn(async move { inner.run_loop(&binding, &cancel).await });
        }

        let mut first_error = None;
        while let Some(joined) = loops.join_next().await {
            match joined {
                Ok(Ok(())) => {},
                Ok(Err(e)) => {
                    error!(error = %e, "job loop stopped on a fatal error, stopping all jobs");
                    cancel.cancel();
                    first_error.get_or_insert(e);
                },
                Err(e) => {
                    error!(error = %e, "job loop task failed");
                    first_error.get_or_insert(Error::external("job loop task failed", e));
                },
            }
        }

        info!("job loops stopped");
        first_error.map_or(Ok(()), Err)
    }

    async fn run_loop(&self, binding: &Binding, cancel: &CancellationToken) -> Result<()> {
        let job_id = binding.job.id();
        let mut faults: u32 = 0;

        while !cancel.is_cancelled() {
            match self.iteration(binding, cancel).await {
                Ok(()) => faults = 0,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    faults = faults.saturating_add(1);
                    let delay = backoff_delay(
                        faults,
                        self.config.backoff_step(),
                        self.config.backoff_cap(),
                    );
                    error!(
                        job_id,
                        error = %e,
                        faults,
                        delay_ms = delay.as_millis() as u64,
                        "job loop fault, backing off"
                    );
                    #[cfg(feature = "metrics")]
                    counter!(job_metrics::LOOP_FAULTS_TOTAL, labels::JOB_ID => job_id.to_string())
                        .increment(1);
                    self.delayer.delay(delay, cancel).await;
                },
            }
        }

        debug!(job_id, "job loop cancelled");
        Ok(())
    }

    async fn iteration(&self, binding: &Binding, cancel: &CancellationToken) -> Result<()> {
        let job = binding.job.as_ref();

        if let Some(enabled) = &self.enabled
            && !enabled().await
        {
            self.delayer
                .delay(self.config.disabled_poll(), cancel)
                .await;
            return Ok(());
        }

        let info = self.store.retrieve(job.id()).await?;
        if !binding
            .scheduler
            .wait_until_next(job, &info, cancel)
            .await?
            || cancel.is_cancelled()
        {
            return Ok(());
        }

        let outcome = self.executor.execute(job, cancel).await?;
        if !outcome.is_success() {
            self.delayer.delay(self.config.retry_pause(), cancel).await;
        }
        Ok(())
    }
}
