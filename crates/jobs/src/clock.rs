//! Time sources.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};

use crate::{Error, Result};

/// Supplies the current time to schedulers, the executor and stores.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

type AdvanceListener = Box<dyn Fn(Duration) + Send + Sync>;

/// Manually driven time for tests. Only moves forward; every move notifies
/// the registered listeners with the elapsed delta.
pub struct VirtualClock {
    now: Mutex<DateTime<Utc>>,
    listeners: Mutex<Vec<AdvanceListener>>,
}

impl VirtualClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Register a callback run synchronously after each advance.
    pub fn on_advance(&self, listener: impl Fn(Duration) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Box::new(listener));
    }

    /// Move time forward by `delta`.
    pub fn advance(&self, delta: Duration) -> Result<()> {
        let target = TimeDelta::from_std(delta)
            .ok()
            .and_then(|d| self.now().checked_add_signed(d))
            .ok_or_else(|| Error::message(format!("cannot advance virtual time by {delta:?}")))?;
        self.set(target)
    }

    /// Jump to `target`, which must not be earlier than now.
    pub fn set(&self, target: DateTime<Utc>) -> Result<()> {
        let delta = {
            let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
            if target < *now {
                return Err(Error::TimeTravel {
                    now: *now,
                    requested: target,
                });
            }
            let delta = (target - *now).to_std().unwrap_or_default();
            *now = target;
            delta
        };

        // Listeners may read the clock, so the time lock is released first.
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        for listener in listeners.iter() {
            listener(delta);
        }
        Ok(())
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
