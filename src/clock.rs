//! Millisecond clock used by time-windowed counters.
//!
//! # Design Decisions
//! - Injected as `Arc<dyn Clock>` so windows can be driven deterministically
//! - Milliseconds since the Unix epoch, matching the window widths in config
//! - `SystemClock` reads the wall clock once and advances with `Instant`, so
//!   readings never go backwards when the system time is stepped

use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Source of the current time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync + Debug {
    fn now_millis(&self) -> i64;
}

/// Monotonic clock reporting epoch milliseconds.
///
/// The epoch offset is taken at construction; later readings add the
/// elapsed monotonic time to it.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    epoch_millis: i64,
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        let epoch_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Self {
            epoch_millis,
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        self.epoch_millis + self.start.elapsed().as_millis() as i64
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(start_millis),
        }
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
