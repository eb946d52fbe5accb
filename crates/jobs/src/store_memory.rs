//! In-memory store. Shared by every worker in this process, lost on exit.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use {
    async_trait::async_trait,
    chrono::{DateTime, TimeDelta, Utc},
};

use crate::{
    Error, Result,
    clock::{Clock, SystemClock},
    store::{DEFAULT_LEASE_DURATION, JobLease, JobStore},
    types::JobInfo,
};

struct LeaseRecord {
    instance_id: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    info: HashMap<String, JobInfo>,
    leases: HashMap<String, LeaseRecord>,
}

struct Inner {
    clock: Arc<dyn Clock>,
    lease_duration: TimeDelta,
    // One lock for both maps: there is no external atomic primitive here.
    state: Mutex<State>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn expiry_from_now(&self) -> DateTime<Utc> {
        self.clock
            .now()
            .checked_add_signed(self.lease_duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// `HashMap`-backed store. Leases expire against the injected clock.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_lease_duration(clock, DEFAULT_LEASE_DURATION)
    }

    pub fn with_lease_duration(clock: Arc<dyn Clock>, lease_duration: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                clock,
                lease_duration: TimeDelta::from_std(lease_duration).unwrap_or(TimeDelta::MAX),
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Holder and expiry of the lease on `job_id`, if one is recorded.
    #[must_use]
    pub fn lease_holder(&self, job_id: &str) -> Option<(String, DateTime<Utc>)> {
        self.inner
            .state()
            .leases
            .get(job_id)
            .map(|l| (l.instance_id.clone(), l.expires_at))
    }

    /// Drop the lease on `job_id` whoever holds it, as an operator would when
    /// clearing a stuck job by hand.
    pub fn clear_lease(&self, job_id: &str) {
        self.inner.state().leases.remove(job_id);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn try_lock(&self, job_id: &str, instance_id: &str) -> Result<Option<Box<dyn JobLease>>> {
        let now = self.inner.clock.now();
        let mut state = self.inner.state();

        if let Some(existing) = state.leases.get(job_id)
            && existing.expires_at > now
        {
            return Ok(None);
        }

        state.leases.insert(job_id.to_string(), LeaseRecord {
            instance_id: instance_id.to_string(),
            expires_at: self.inner.expiry_from_now(),
        });

        Ok(Some(Box::new(InMemoryLease {
            inner: Arc::clone(&self.inner),
            job_id: job_id.to_string(),
            instance_id: instance_id.to_string(),
        })))
    }

    async fn retrieve(&self, job_id: &str) -> Result<JobInfo> {
        let state = self.inner.state();
        Ok(state
            .info
            .get(job_id)
            .cloned()
            .unwrap_or_else(|| JobInfo::new(job_id)))
    }

    async fn save(&self, info: &JobInfo) -> Result<()> {
        self.inner
            .state()
            .info
            .insert(info.id.clone(), info.clone());
        Ok(())
    }
}

struct InMemoryLease {
    inner: Arc<Inner>,
    job_id: String,
    instance_id: String,
}

#[async_trait]
impl JobLease for InMemoryLease {
    fn job_id(&self) -> &str {
        &self.job_id
    }

    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    async fn refresh(&self) -> Result<()> {
        let now = self.inner.clock.now();
        let mut state = self.inner.state();
        match state.leases.get_mut(&self.job_id) {
            Some(lease) if lease.instance_id == self.instance_id && lease.expires_at > now => {
                lease.expires_at = self.inner.expiry_from_now();
                Ok(())
            },
            _ => Err(Error::lock_not_valid(&self.job_id, &self.instance_id)),
        }
    }

    async fn release(&self) -> Result<()> {
        let mut state = self.inner.state();
        if state
            .leases
            .get(&self.job_id)
            .is_some_and(|l| l.instance_id == self.instance_id)
        {
            state.leases.remove(&self.job_id);
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::clock::VirtualClock,
        chrono::TimeZone,
    };

    fn store_at_noon() -> (Arc<VirtualClock>, InMemoryStore) {
        let clock = VirtualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        let store = InMemoryStore::new(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn lease_expires_after_ten_minutes() {
        let (clock, store) = store_at_noon();
        let _held = store.try_lock("job", "a").await.unwrap().unwrap();

        clock.advance(Duration::from_secs(9 * 60)).unwrap();
        assert!(store.try_lock("job", "b").await.unwrap().is_none());

        clock.advance(Duration::from_secs(60)).unwrap();
        let taken = store.try_lock("job", "b").await.unwrap();
        assert!(taken.is_some());
        assert_eq!(store.lease_holder("job").unwrap().0, "b");
    }

    #[tokio::test]
    async fn refresh_extends_expiry() {
        let (clock, store) = store_at_noon();
        let lease = store.try_lock("job", "a").await.unwrap().unwrap();
        let (_, first_expiry) = store.lease_holder("job").unwrap();

        clock.advance(Duration::from_secs(5 * 60)).unwrap();
        lease.refresh().await.unwrap();

        let (_, refreshed) = store.lease_holder("job").unwrap();
        assert_eq!(refreshed - first_expiry, TimeDelta::minutes(5));
    }

    #[tokio::test]
    async fn expired_lease_cannot_be_refreshed() {
        let (clock, store) = store_at_noon();
        let lease = store.try_lock("job", "a").await.unwrap().unwrap();

        clock.advance(DEFAULT_LEASE_DURATION).unwrap();
        let err = lease.refresh().await.unwrap_err();
        assert!(matches!(err, Error::LockNotValid { .. }));
    }

    #[tokio::test]
    async fn stale_release_keeps_newer_lease() {
        let (clock, store) = store_at_noon();
        let stale = store.try_lock("job", "a").await.unwrap().unwrap();

        clock.advance(DEFAULT_LEASE_DURATION).unwrap();
        let _fresh = store.try_lock("job", "b").await.unwrap().unwrap();

        stale.release().await.unwrap();
        assert_eq!(store.lease_holder("job").unwrap().0, "b");
    }

    #[tokio::test]
    async fn custom_lease_duration() {
        let clock = VirtualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        let store = InMemoryStore::with_lease_duration(clock.clone(), Duration::from_secs(30));
        let _lease = store.try_lock("job", "a").await.unwrap().unwrap();

        clock.advance(Duration::from_secs(30)).unwrap();
        assert!(store.try_lock("job", "b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn oversized_lease_saturates_at_end_of_time() {
        let clock = VirtualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        let store = InMemoryStore::with_lease_duration(
            clock.clone(),
            Duration::from_secs(10_000_000_000_000),
        );

        let lease = store.try_lock("job", "a").await.unwrap().unwrap();
        assert_eq!(store.lease_holder("job").unwrap().1, DateTime::<Utc>::MAX_UTC);
        assert!(store.try_lock("job", "b").await.unwrap().is_none());
        lease.refresh().await.unwrap();
    }
}
