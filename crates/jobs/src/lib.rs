//! Recurring jobs with lease-based mutual exclusion.
//!
//! Each registered job gets its own run-loop that waits for the job's trigger,
//! takes the job's lease from a shared [`JobStore`] and runs it. Any number of
//! processes may point at the same store; the lease guarantees a job id runs
//! in at most one of them at a time.

pub mod clock;
pub mod delay;
pub mod error;
pub mod executor;
pub mod job;
pub mod scheduler;
pub mod scheduler_cron;
pub mod scheduler_interval;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod trigger;
pub mod types;
pub mod worker;

use std::sync::Arc;

use rota_config::{RotaConfig, Severity, StoreBackend, validate};

pub use {
    clock::{Clock, SystemClock, VirtualClock},
    delay::{Delayer, TokioDelayer, VirtualDelayer},
    error::{Error, Result},
    executor::{Executor, Outcome},
    job::Job,
    scheduler::Scheduler,
    store::{DEFAULT_LEASE_DURATION, JobLease, JobStore},
    trigger::{CronTrigger, IntervalTrigger, Trigger},
    types::{JobInfo, TriggerCountMode},
    worker::{JobsWorker, JobsWorkerBuilder},
};

/// Open the store selected by `config.store`, with the configured lease
/// duration. Configs with error-level diagnostics are rejected.
pub async fn open_store(config: &RotaConfig, clock: Arc<dyn Clock>) -> Result<Arc<dyn JobStore>> {
    let errors: Vec<String> = validate(config)
        .into_iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| format!("{}: {}", d.path, d.message))
        .collect();
    if !errors.is_empty() {
        return Err(Error::message(format!(
            "invalid configuration: {}",
            errors.join("; ")
        )));
    }

    match config.store.backend {
        StoreBackend::Memory => Ok(Arc::new(store_memory::InMemoryStore::with_lease_duration(
            clock,
            config.scheduler.lease_duration(),
        ))),
        StoreBackend::Sqlite => Ok(Arc::new(
            store_sqlite::SqliteStore::from_config(config, clock).await?,
        )),
    }
}
