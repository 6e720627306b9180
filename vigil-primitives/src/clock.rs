//! Time sources.
//!
//! Evaluation logic never reads the system clock directly; it goes through
//! [`Clock`] so tests can pin `now` to exact values.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{TimeZone, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current time, epoch seconds.
    fn epoch_secs(&self) -> u64;

    /// Current time, epoch milliseconds.
    fn epoch_millis(&self) -> u64;
}

/// Production clock backed by [`SystemTime`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn epoch_secs(&self) -> u64 {
        self.epoch_millis() / 1000
    }

    fn epoch_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Manually driven clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    /// Creates a clock pinned to the given epoch seconds.
    #[must_use]
    pub fn at_secs(secs: u64) -> Self {
        Self {
            millis: AtomicU64::new(secs * 1000),
        }
    }

    /// Pins the clock to the given epoch seconds.
    pub fn set_secs(&self, secs: u64) {
        self.millis.store(secs * 1000, Ordering::SeqCst);
    }

    /// Advances the clock by the given number of seconds.
    pub fn advance_secs(&self, secs: u64) {
        self.millis.fetch_add(secs * 1000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn epoch_secs(&self) -> u64 {
        self.millis.load(Ordering::SeqCst) / 1000
    }

    fn epoch_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Renders epoch seconds as an RFC 3339 UTC timestamp for human-facing
/// strings such as report resolutions.
#[must_use]
pub fn format_epoch(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .map_or_else(|| format!("epoch {secs}"), |t| t.to_rfc3339())
}
