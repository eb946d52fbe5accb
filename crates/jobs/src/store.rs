//! Persistence contract: per-job state plus a lease lock for mutual exclusion.
//!
//! Every backend must guarantee, for a given job id:
//! - at most one live lease exists at any instant; `try_lock` returns `None`
//!   (not an error) while another instance holds it, and exactly one of any
//!   number of concurrent callers wins once it is released or expired;
//! - `retrieve` never fails for an unknown job, it returns [`JobInfo::new`];
//! - `save` replaces the whole record;
//! - `refresh` extends the lease only while it still belongs to the same
//!   instance, failing with [`Error::LockNotValid`] otherwise;
//! - `release` only removes the lease if it still belongs to the same instance,
//!   and is a no-op otherwise.

use std::time::Duration;

use {async_trait::async_trait, tracing::warn};

use crate::{Error, Result, types::JobInfo};

/// How long a lease stays live without a refresh.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(10 * 60);

/// Persistence backend for job state and leases.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Take the lease on `job_id` for `instance_id`, or `None` if it is held.
    async fn try_lock(&self, job_id: &str, instance_id: &str) -> Result<Option<Box<dyn JobLease>>>;
    async fn retrieve(&self, job_id: &str) -> Result<JobInfo>;
    async fn save(&self, info: &JobInfo) -> Result<()>;
}

/// A lease returned by [`JobStore::try_lock`].
#[async_trait]
pub trait JobLease: Send + Sync {
    fn job_id(&self) -> &str;
    fn instance_id(&self) -> &str;
    /// Push expiry to now + lease duration.
    async fn refresh(&self) -> Result<()>;
    async fn release(&self) -> Result<()>;
}

/// Holds a lease for the rest of a scope.
///
/// [`LeaseGuard::release`] is the normal exit. If the guard is dropped without
/// it (the owning future was cancelled, or unwound), the release is spawned
/// onto the current runtime so the lease never outlives its holder by more
/// than the backend round-trip.
pub struct LeaseGuard {
    lease: Option<Box<dyn JobLease>>,
    job_id: String,
    instance_id: String,
}

impl LeaseGuard {
    #[must_use]
    pub fn new(lease: Box<dyn JobLease>) -> Self {
        Self {
            job_id: lease.job_id().to_string(),
            instance_id: lease.instance_id().to_string(),
            lease: Some(lease),
        }
    }

    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub async fn refresh(&self) -> Result<()> {
        match &self.lease {
            Some(lease) => lease.refresh().await,
            None => Err(Error::lock_not_valid(&self.job_id, &self.instance_id)),
        }
    }

    pub async fn release(mut self) -> Result<()> {
        match self.lease.take() {
            Some(lease) => lease.release().await,
            None => Ok(()),
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = lease.release().await {
                        warn!(job_id = lease.job_id(), error = %e, "failed to release dropped lease");
                    }
                });
            },
            Err(_) => warn!(
                job_id = %self.job_id,
                instance_id = %self.instance_id,
                "lease dropped outside a runtime; it will only clear on expiry"
            ),
        }
    }
}
