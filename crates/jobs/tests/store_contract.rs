//! Behaviour every `JobStore` backend must share.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::{sync::Arc, time::Duration};

use {
    common::{TestStore, init_tracing, utc, virtual_time},
    futures::future::join_all,
    rota_jobs::{DEFAULT_LEASE_DURATION, Error, JobInfo, JobStore},
    rstest::rstest,
};

async fn contenders(store: &Arc<dyn JobStore>, job_id: &str, count: usize) -> usize {
    let attempts = (0..count).map(|i| {
        let store = Arc::clone(store);
        let job_id = job_id.to_string();
        tokio::spawn(async move { store.try_lock(&job_id, &format!("instance-{i}")).await })
    });

    let mut winners = 0;
    let mut leases = Vec::new();
    for joined in join_all(attempts).await {
        if let Some(lease) = joined.unwrap().unwrap() {
            winners += 1;
            leases.push(lease);
        }
    }
    for lease in leases {
        lease.release().await.unwrap();
    }
    winners
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exactly_one_concurrent_lock_wins(#[values("memory", "sqlite")] kind: &str) {
    init_tracing();
    let (clock, _delayer) = virtual_time(utc(2024, 1, 1, 0, 0, 0));
    let backend = TestStore::open(kind, clock).await;
    let store = backend.store();

    // Each round is a new generation once the previous winner released.
    for _ in 0..3 {
        assert_eq!(contenders(&store, "shared", 16).await, 1);
    }
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_jobs_lock_independently(#[values("memory", "sqlite")] kind: &str) {
    init_tracing();
    let (clock, _delayer) = virtual_time(utc(2024, 1, 1, 0, 0, 0));
    let backend = TestStore::open(kind, clock).await;
    let store = backend.store();

    let attempts = (0..8).map(|i| {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.try_lock(&format!("job-{i}"), "instance").await })
    });
    let acquired = join_all(attempts)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(Some(_)))))
        .count();
    assert_eq!(acquired, 8);
}

#[rstest]
#[tokio::test]
async fn saved_info_round_trips(#[values("memory", "sqlite")] kind: &str) {
    let (clock, _delayer) = virtual_time(utc(2024, 1, 1, 0, 0, 0));
    let backend = TestStore::open(kind, clock).await;
    let store = backend.store();

    let info = JobInfo {
        id: "reports".into(),
        last_triggered: Some(utc(2024, 1, 1, 8, 0, 0)),
        last_failure: None,
        last_success: Some(utc(2024, 1, 1, 8, 5, 30)),
    };
    store.save(&info).await.unwrap();
    assert_eq!(store.retrieve("reports").await.unwrap(), info);

    let overwritten = JobInfo {
        last_failure: Some(utc(2024, 1, 2, 8, 0, 0)),
        last_success: None,
        ..info
    };
    store.save(&overwritten).await.unwrap();
    assert_eq!(store.retrieve("reports").await.unwrap(), overwritten);
}

#[rstest]
#[tokio::test]
async fn unknown_job_yields_never_timestamps(#[values("memory", "sqlite")] kind: &str) {
    let (clock, _delayer) = virtual_time(utc(2024, 1, 1, 0, 0, 0));
    let backend = TestStore::open(kind, clock).await;

    let info = backend.store().retrieve("never-seen").await.unwrap();
    assert_eq!(info, JobInfo::new("never-seen"));
    assert_eq!(info.last_completion(), None);
}

#[rstest]
#[tokio::test]
async fn refresh_fails_once_lease_is_removed(#[values("memory", "sqlite")] kind: &str) {
    let (clock, _delayer) = virtual_time(utc(2024, 1, 1, 0, 0, 0));
    let backend = TestStore::open(kind, clock).await;
    let store = backend.store();

    let lease = store.try_lock("job", "a").await.unwrap().unwrap();
    lease.refresh().await.unwrap();

    backend.clear_lease("job").await;
    let err = lease.refresh().await.unwrap_err();
    assert!(matches!(err, Error::LockNotValid { .. }));
    assert!(!err.is_fatal());
}

#[rstest]
#[tokio::test]
async fn release_is_a_no_op_the_second_time(#[values("memory", "sqlite")] kind: &str) {
    let (clock, _delayer) = virtual_time(utc(2024, 1, 1, 0, 0, 0));
    let backend = TestStore::open(kind, clock).await;
    let store = backend.store();

    let lease = store.try_lock("job", "a").await.unwrap().unwrap();
    lease.release().await.unwrap();
    lease.release().await.unwrap();
    assert!(store.try_lock("job", "b").await.unwrap().is_some());
}

#[rstest]
#[tokio::test]
async fn expired_lease_is_taken_over_and_not_released_by_old_holder(
    #[values("memory", "sqlite")] kind: &str,
) {
    let (clock, _delayer) = virtual_time(utc(2024, 1, 1, 0, 0, 0));
    let backend = TestStore::open(kind, clock.clone()).await;
    let store = backend.store();

    let stale = store.try_lock("job", "a").await.unwrap().unwrap();
    clock
        .advance(DEFAULT_LEASE_DURATION - Duration::from_secs(1))
        .unwrap();
    assert!(store.try_lock("job", "b").await.unwrap().is_none());

    clock.advance(Duration::from_secs(1)).unwrap();
    let fresh = store.try_lock("job", "b").await.unwrap().unwrap();

    assert!(matches!(
        stale.refresh().await.unwrap_err(),
        Error::LockNotValid { .. }
    ));
    stale.release().await.unwrap();

    assert!(store.try_lock("job", "c").await.unwrap().is_none());
    fresh.refresh().await.unwrap();
}
