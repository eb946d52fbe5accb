//! SQLite-backed job store using sqlx.
//!
//! Lease acquisition is a single conditional upsert, so mutual exclusion holds
//! across every process sharing the database file. Timestamps are stored as
//! epoch milliseconds, `NULL` meaning "never".

use std::{str::FromStr, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    rota_config::{RotaConfig, validate::is_sql_identifier},
    sqlx::{
        Row, SqlitePool,
        sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    },
    tracing::debug,
};

use crate::{
    Error, Result,
    clock::{Clock, SystemClock},
    store::{DEFAULT_LEASE_DURATION, JobLease, JobStore},
    types::JobInfo,
};

pub const DEFAULT_JOB_INFO_TABLE: &str = "rota_job_info";
pub const DEFAULT_LEASE_TABLE: &str = "rota_job_leases";

/// SQL text for one pair of table names, formatted once.
struct Statements {
    try_lock: String,
    refresh: String,
    release: String,
    clear: String,
    retrieve: String,
    save: String,
}

impl Statements {
    fn new(info: &str, lease: &str) -> Self {
        Self {
            try_lock: format!(
                "INSERT INTO {lease} (job_id, instance_id, expires_at_ms) VALUES (?, ?, ?)
                 ON CONFLICT(job_id) DO UPDATE SET
                     instance_id = excluded.instance_id,
                     expires_at_ms = excluded.expires_at_ms
                 WHERE {lease}.expires_at_ms <= ?"
            ),
            refresh: format!(
                "UPDATE {lease} SET expires_at_ms = ?
                 WHERE job_id = ? AND instance_id = ? AND expires_at_ms > ?"
            ),
            release: format!("DELETE FROM {lease} WHERE job_id = ? AND instance_id = ?"),
            clear: format!("DELETE FROM {lease} WHERE job_id = ?"),
            retrieve: format!(
                "SELECT last_triggered_ms, last_failure_ms, last_success_ms
                 FROM {info} WHERE job_id = ?"
            ),
            save: format!(
                "INSERT INTO {info} (job_id, last_triggered_ms, last_failure_ms, last_success_ms)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(job_id) DO UPDATE SET
                     last_triggered_ms = excluded.last_triggered_ms,
                     last_failure_ms = excluded.last_failure_ms,
                     last_success_ms = excluded.last_success_ms"
            ),
        }
    }
}

fn to_millis(at: Option<DateTime<Utc>>) -> Option<i64> {
    at.map(|t| t.timestamp_millis())
}

fn from_millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::from_timestamp_millis)
}

/// SQLite-backed persistence for job state and leases.
pub struct SqliteStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    lease_duration: Duration,
    sql: Arc<Statements>,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `database_url` with the
    /// default table names.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = connect(database_url).await?;
        Self::with_pool(pool, Arc::new(SystemClock)).await
    }

    /// Use an existing pool with the default table names. Tables are created if
    /// they do not exist yet.
    pub async fn with_pool(pool: SqlitePool, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::with_tables(pool, clock, DEFAULT_JOB_INFO_TABLE, DEFAULT_LEASE_TABLE).await
    }

    /// Use an existing pool and custom table names.
    pub async fn with_tables(
        pool: SqlitePool,
        clock: Arc<dyn Clock>,
        job_info_table: &str,
        lease_table: &str,
    ) -> Result<Self> {
        for name in [job_info_table, lease_table] {
            if !is_sql_identifier(name) {
                return Err(Error::InvalidIdentifier { name: name.into() });
            }
        }
        create_tables(&pool, job_info_table, lease_table).await?;
        Ok(Self {
            pool,
            clock,
            lease_duration: DEFAULT_LEASE_DURATION,
            sql: Arc::new(Statements::new(job_info_table, lease_table)),
        })
    }

    /// Build from the `store` and `scheduler` sections of a loaded config.
    pub async fn from_config(config: &RotaConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let url = config
            .store
            .database_url
            .as_deref()
            .ok_or_else(|| Error::message("store.database_url is required for the sqlite backend"))?;
        let pool = connect(url).await?;
        let store = Self::with_tables(
            pool,
            clock,
            &config.store.job_info_table,
            &config.store.lease_table,
        )
        .await?;
        Ok(store.with_lease_duration(config.scheduler.lease_duration()))
    }

    #[must_use]
    pub fn with_lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Drop the lease on `job_id` whoever holds it.
    pub async fn clear_lease(&self, job_id: &str) -> Result<()> {
        sqlx::query(&self.sql.clear)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn expiry_from_now(&self) -> i64 {
        expiry_ms(self.clock.now(), self.lease_duration)
    }
}

fn expiry_ms(now: DateTime<Utc>, lease_duration: Duration) -> i64 {
    let lease_ms = i64::try_from(lease_duration.as_millis()).unwrap_or(i64::MAX);
    now.timestamp_millis().saturating_add(lease_ms)
}

async fn connect(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(pool)
}

async fn create_tables(pool: &SqlitePool, info: &str, lease: &str) -> Result<()> {
    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {info} (
            job_id            TEXT PRIMARY KEY NOT NULL,
            last_triggered_ms INTEGER,
            last_failure_ms   INTEGER,
            last_success_ms   INTEGER
        )"
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {lease} (
            job_id        TEXT PRIMARY KEY NOT NULL,
            instance_id   TEXT NOT NULL,
            expires_at_ms INTEGER NOT NULL
        )"
    ))
    .execute(pool)
    .await?;

    debug!(info_table = info, lease_table = lease, "job tables ready");
    Ok(())
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn try_lock(&self, job_id: &str, instance_id: &str) -> Result<Option<Box<dyn JobLease>>> {
        let now = self.clock.now().timestamp_millis();
        let result = sqlx::query(&self.sql.try_lock)
            .bind(job_id)
            .bind(instance_id)
            .bind(self.expiry_from_now())
            .bind(now)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        Ok(Some(Box::new(SqliteLease {
            pool: self.pool.clone(),
            clock: Arc::clone(&self.clock),
            lease_duration: self.lease_duration,
            sql: Arc::clone(&self.sql),
            job_id: job_id.to_string(),
            instance_id: instance_id.to_string(),
        })))
    }

    async fn retrieve(&self, job_id: &str) -> Result<JobInfo> {
        let row = sqlx::query(&self.sql.retrieve)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(JobInfo::new(job_id));
        };
        Ok(JobInfo {
            id: job_id.to_string(),
            last_triggered: from_millis(row.try_get("last_triggered_ms")?),
            last_failure: from_millis(row.try_get("last_failure_ms")?),
            last_success: from_millis(row.try_get("last_success_ms")?),
        })
    }

    async fn save(&self, info: &JobInfo) -> Result<()> {
        sqlx::query(&self.sql.save)
            .bind(&info.id)
            .bind(to_millis(info.last_triggered))
            .bind(to_millis(info.last_failure))
            .bind(to_millis(info.last_success))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

struct SqliteLease {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    lease_duration: Duration,
    sql: Arc<Statements>,
    job_id: String,
    instance_id: String,
}

#[async_trait]
impl JobLease for SqliteLease {
    fn job_id(&self) -> &str {
        &self.job_id
    }

    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    async fn refresh(&self) -> Result<()> {
        let now = self.clock.now();
        let result = sqlx::query(&self.sql.refresh)
            .bind(expiry_ms(now, self.lease_duration))
            .bind(&self.job_id)
            .bind(&self.instance_id)
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::lock_not_valid(&self.job_id, &self.instance_id));
        }
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        sqlx::query(&self.sql.release)
            .bind(&self.job_id)
            .bind(&self.instance_id)
            .execute(&self.pool)
            .await?;
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
        tempfile::TempDir,
    };

    async fn make_store(dir: &TempDir) -> (Arc<VirtualClock>, SqliteStore) {
        let clock = VirtualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        let url = format!("sqlite://{}", dir.path().join("jobs.db").display());
        let pool = connect(&url).await.unwrap();
        let store = SqliteStore::with_pool(pool, clock.clone()).await.unwrap();
        (clock, store)
    }

    #[tokio::test]
    async fn unknown_job_has_empty_info() {
        let dir = TempDir::new().unwrap();
        let (_clock, store) = make_store(&dir).await;
        assert_eq!(store.retrieve("nope").await.unwrap(), JobInfo::new("nope"));
    }

    #[tokio::test]
    async fn save_overwrites_all_fields() {
        let dir = TempDir::new().unwrap();
        let (clock, store) = make_store(&dir).await;

        let mut info = JobInfo::new("job");
        info.last_triggered = Some(clock.now());
        info.last_failure = Some(clock.now());
        store.save(&info).await.unwrap();

        info.last_failure = None;
        info.last_success = Some(clock.now());
        store.save(&info).await.unwrap();

        assert_eq!(store.retrieve("job").await.unwrap(), info);
    }

    #[tokio::test]
    async fn upsert_only_steals_expired_lease() {
        let dir = TempDir::new().unwrap();
        let (clock, store) = make_store(&dir).await;

        let _held = store.try_lock("job", "a").await.unwrap().unwrap();
        assert!(store.try_lock("job", "b").await.unwrap().is_none());

        clock.advance(DEFAULT_LEASE_DURATION).unwrap();
        let stolen = store.try_lock("job", "b").await.unwrap().unwrap();
        assert_eq!(stolen.instance_id(), "b");
    }

    #[tokio::test]
    async fn cleared_lease_cannot_be_refreshed() {
        let dir = TempDir::new().unwrap();
        let (_clock, store) = make_store(&dir).await;

        let lease = store.try_lock("job", "a").await.unwrap().unwrap();
        lease.refresh().await.unwrap();

        store.clear_lease("job").await.unwrap();
        assert!(matches!(
            lease.refresh().await.unwrap_err(),
            Error::LockNotValid { .. }
        ));
    }

    #[tokio::test]
    async fn rejects_unsafe_table_names() {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("jobs.db").display());
        let pool = connect(&url).await.unwrap();
        let err = SqliteStore::with_tables(pool, Arc::new(SystemClock), "info; DROP", "leases")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidIdentifier { .. }));
    }

    #[tokio::test]
    async fn from_config_uses_configured_tables() {
        let dir = TempDir::new().unwrap();
        let mut config = RotaConfig::default();
        config.store.database_url = Some(format!(
            "sqlite://{}",
            dir.path().join("configured.db").display()
        ));
        config.store.job_info_table = "custom_info".into();
        config.store.lease_table = "custom_leases".into();

        let store = SqliteStore::from_config(&config, Arc::new(SystemClock))
            .await
            .unwrap();
        let _lease = store.try_lock("job", "a").await.unwrap().unwrap();

        let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM custom_leases")
            .fetch_one(store.pool())
            .await
            .unwrap()
            .get("n");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn from_config_requires_url() {
        let err = SqliteStore::from_config(&RotaConfig::default(), Arc::new(SystemClock))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Message { .. }));
    }
}
