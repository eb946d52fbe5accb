//! Cancellable suspension, real and virtual.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    tokio::sync::{oneshot, watch},
    tokio_util::sync::CancellationToken,
};

use crate::clock::VirtualClock;

/// Suspends the caller for a duration or until `cancel` fires, whichever comes
/// first. Cancellation is a normal way to finish, not an error.
#[async_trait]
pub trait Delayer: Send + Sync {
    async fn delay(&self, duration: Duration, cancel: &CancellationToken);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDelayer;

#[async_trait]
impl Delayer for TokioDelayer {
    async fn delay(&self, duration: Duration, cancel: &CancellationToken) {
        tokio::select! {
            () = tokio::time::sleep(duration) => {},
            () = cancel.cancelled() => {},
        }
    }
}

// ── Virtual ─────────────────────────────────────────────────────────────────

struct Sleeper {
    remaining: Duration,
    wake: oneshot::Sender<()>,
}

#[derive(Default)]
struct SleepState {
    next_id: u64,
    sleepers: HashMap<u64, Sleeper>,
    requested: Vec<Duration>,
}

struct Shared {
    state: Mutex<SleepState>,
    parked: watch::Sender<usize>,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, SleepState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn elapse(&self, delta: Duration) {
        let mut state = self.lock();
        let due: Vec<u64> = state
            .sleepers
            .iter_mut()
            .filter_map(|(id, sleeper)| {
                if delta >= sleeper.remaining {
                    Some(*id)
                } else {
                    sleeper.remaining -= delta;
                    None
                }
            })
            .collect();

        for id in due {
            if let Some(sleeper) = state.sleepers.remove(&id) {
                let _ = sleeper.wake.send(());
            }
        }
        self.parked.send_replace(state.sleepers.len());
    }

    fn forget(&self, id: u64) {
        let mut state = self.lock();
        if state.sleepers.remove(&id).is_some() {
            self.parked.send_replace(state.sleepers.len());
        }
    }
}

/// Removes a sleeper whose delay future finished or was dropped early.
struct SleeperGuard<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for SleeperGuard<'_> {
    fn drop(&mut self) {
        self.shared.forget(self.id);
    }
}

/// Delays resolved by advancing a [`VirtualClock`] instead of by wall time.
///
/// Every requested duration is recorded, and the number of parked sleepers is
/// observable so tests can wait until all run-loops are suspended before
/// moving time.
pub struct VirtualDelayer {
    shared: Arc<Shared>,
}

impl VirtualDelayer {
    pub fn new(clock: &VirtualClock) -> Arc<Self> {
        let (parked, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            state: Mutex::new(SleepState::default()),
            parked,
        });

        let on_advance = Arc::clone(&shared);
        clock.on_advance(move |delta| on_advance.elapse(delta));

        Arc::new(Self { shared })
    }

    /// Every duration passed to [`Delayer::delay`], in call order.
    #[must_use]
    pub fn requested(&self) -> Vec<Duration> {
        self.shared.lock().requested.clone()
    }

    /// Number of delays currently waiting for time to move.
    #[must_use]
    pub fn sleepers(&self) -> usize {
        self.shared.lock().sleepers.len()
    }

    /// Resolve once at least `count` delays are parked.
    pub async fn wait_for_sleepers(&self, count: usize) {
        let mut parked = self.shared.parked.subscribe();
        let _ = parked.wait_for(|n| *n >= count).await;
    }
}

#[async_trait]
impl Delayer for VirtualDelayer {
    async fn delay(&self, duration: Duration, cancel: &CancellationToken) {
        let (wake, woken) = oneshot::channel();
        let id = {
            let mut state = self.shared.lock();
            state.requested.push(duration);
            if duration.is_zero() || cancel.is_cancelled() {
                return;
            }
            let id = state.next_id;
            state.next_id += 1;
            state.sleepers.insert(id, Sleeper {
                remaining: duration,
                wake,
            });
            self.shared.parked.send_replace(state.sleepers.len());
            id
        };
        let _guard = SleeperGuard {
            shared: &self.shared,
            id,
        };

        tokio::select! {
            _ = woken => {},
            () = cancel.cancelled() => {},
        }
    }
}
