#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    chrono::{DateTime, TimeZone, Utc},
    rota_jobs::{
        Delayer, Job, JobInfo, JobLease, JobStore, Result, Trigger, VirtualClock, VirtualDelayer,
        store_memory::InMemoryStore, store_sqlite::SqliteStore,
    },
    tempfile::TempDir,
    tokio_util::sync::CancellationToken,
    tracing_subscriber::EnvFilter,
};

/// Route engine logs into the test harness output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rota_jobs=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

/// Virtual clock and delayer pair starting at `start`.
pub fn virtual_time(start: DateTime<Utc>) -> (Arc<VirtualClock>, Arc<VirtualDelayer>) {
    let clock = VirtualClock::new(start);
    let delayer = VirtualDelayer::new(&clock);
    (clock, delayer)
}

/// Wait until `count` delays are parked, failing the test if the engine never
/// gets there.
pub async fn settle(delayer: &VirtualDelayer, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), delayer.wait_for_sleepers(count))
        .await
        .expect("engine never went back to sleep");
}

/// Let spawned tasks run without moving time.
pub async fn yield_a_while() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

// ── Jobs ────────────────────────────────────────────────────────────────────

pub enum Body {
    Succeed,
    Fail,
    /// Sleep on the given delayer.
    Sleep(Arc<VirtualDelayer>, Duration),
    /// Run until cancelled, then report the interruption as an error.
    UntilCancelled,
}

/// Job that counts its executions.
pub struct CountingJob {
    id: String,
    trigger: Trigger,
    body: Body,
    runs: Arc<AtomicUsize>,
}

impl CountingJob {
    pub fn new(id: &str, trigger: Trigger, body: Body) -> (Self, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let job = Self {
            id: id.to_string(),
            trigger,
            body,
            runs: Arc::clone(&runs),
        };
        (job, runs)
    }
}

#[async_trait]
impl Job for CountingJob {
    fn id(&self) -> &str {
        &self.id
    }

    fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    async fn execute(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        match &self.body {
            Body::Succeed => Ok(()),
            Body::Fail => anyhow::bail!("job failed on purpose"),
            Body::Sleep(delayer, duration) => {
                delayer.delay(*duration, &cancel).await;
                Ok(())
            },
            Body::UntilCancelled => {
                cancel.cancelled().await;
                anyhow::bail!("interrupted")
            },
        }
    }
}

pub fn runs(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

// ── Stores ──────────────────────────────────────────────────────────────────

/// A store under test plus the out-of-band access an operator would have.
pub enum TestStore {
    Memory(InMemoryStore),
    Sqlite(Arc<SqliteStore>, TempDir),
}

impl TestStore {
    pub async fn open(kind: &str, clock: Arc<VirtualClock>) -> Self {
        match kind {
            "memory" => Self::Memory(InMemoryStore::new(clock)),
            "sqlite" => {
                let dir = TempDir::new().unwrap();
                let url = format!("sqlite://{}", dir.path().join("jobs.db").display());
                let pool = sqlx::sqlite::SqlitePoolOptions::new()
                    .max_connections(5)
                    .connect_with(
                        url.parse::<sqlx::sqlite::SqliteConnectOptions>()
                            .unwrap()
                            .create_if_missing(true),
                    )
                    .await
                    .unwrap();
                let store = SqliteStore::with_pool(pool, clock).await.unwrap();
                Self::Sqlite(Arc::new(store), dir)
            },
            other => panic!("unknown store kind {other}"),
        }
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        match self {
            Self::Memory(store) => Arc::new(store.clone()),
            Self::Sqlite(store, _) => Arc::clone(store) as Arc<dyn JobStore>,
        }
    }

    /// Delete the lease row behind the engine's back.
    pub async fn clear_lease(&self, job_id: &str) {
        match self {
            Self::Memory(store) => store.clear_lease(job_id),
            Self::Sqlite(store, _) => store.clear_lease(job_id).await.unwrap(),
        }
    }
}

/// Wraps a store and fails `retrieve` a configurable number of times.
pub struct FlakyStore {
    inner: Arc<dyn JobStore>,
    failures: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn JobStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failures: AtomicUsize::new(0),
        })
    }

    /// Make the next `n` retrieve calls fail.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn try_lock(&self, job_id: &str, instance_id: &str) -> Result<Option<Box<dyn JobLease>>> {
        self.inner.try_lock(job_id, instance_id).await
    }

    async fn retrieve(&self, job_id: &str) -> Result<JobInfo> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(rota_jobs::Error::message("store unavailable"));
        }
        self.inner.retrieve(job_id).await
    }

    async fn save(&self, info: &JobInfo) -> Result<()> {
        self.inner.save(info).await
    }
}
