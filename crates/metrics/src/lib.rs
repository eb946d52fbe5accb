//! Metrics for the rota job engine.
//!
//! Names are recorded through the `metrics` crate facade. Nothing is exported
//! from here: the host process installs whatever recorder it wants (Prometheus,
//! statsd, ...) and the engine's counters show up there.
//!
//! # Usage
//!
//! ```rust,ignore
//! use rota_metrics::{counter, jobs, labels};
//!
//! counter!(jobs::EXECUTIONS_STARTED_TOTAL, labels::JOB_ID => "nightly-report").increment(1);
//! ```

mod definitions;

pub use definitions::*;

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
