//! Liveness monitoring runtime.
//!
//! The scheduler fans periodic per-agent checks out to a bounded worker
//! pool; each check reads a chain snapshot and hands it to the evaluator,
//! which drives the severity ladder, maintains missing-heartbeat reports,
//! and publishes events into the hub. The supervisor owns construction and
//! top-down shutdown of the whole arrangement.

#![warn(missing_docs, clippy::pedantic)]

mod evaluator;
mod locks;
mod scheduler;
mod supervisor;
mod tracker;

pub use evaluator::{AbandonmentSink, LivenessEvaluator};
pub use locks::{KeyedGuard, KeyedLocks};
pub use scheduler::{Scheduler, SchedulerMetrics};
pub use supervisor::{Supervisor, SupervisorBuilder};
pub use tracker::{AgentTracker, CountObservation, TrackedAgent};
