use {async_trait::async_trait, tokio_util::sync::CancellationToken};

use crate::trigger::Trigger;

/// A unit of recurring work.
///
/// `id` is the primary key for everything the store persists about the job, so
/// it must be stable across restarts and unique within a worker.
#[async_trait]
pub trait Job: Send + Sync {
    fn id(&self) -> &str;

    fn trigger(&self) -> &Trigger;

    /// Run the job once. Long-running bodies should watch `cancel` and return
    /// early once it fires; an error returned after cancellation is recorded as
    /// a cancellation, not a failure.
    async fn execute(&self, cancel: CancellationToken) -> anyhow::Result<()>;
}
