//! Outcome counters backing the circuit breaker.
//!
//! # Responsibilities
//! - Record successes and failures
//! - Report the rate (percent) or streak length the breaker compares
//!   against its thresholds
//!
//! # Design Decisions
//! - Counters are single threaded; the breaker serializes access
//! - Rates stay at 0 until the effective sample floor is reached
//! - Window expiry is checked before recording, never after

use std::fmt::Debug;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::schema::CounterSpec;

/// Counts request outcomes for a circuit breaker.
pub trait Counter: Send + Debug {
    /// Record a success and return the success rate.
    fn success(&mut self) -> u32;
    /// Record a failure and return the failure rate.
    fn failure(&mut self) -> u32;
    /// Forget everything recorded so far.
    fn reset(&mut self);
}

/// Minimum sample counts before a rate is reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EffectiveSamples {
    pub success: u32,
    pub failure: u32,
}

/// Build the counter described by `spec`.
pub fn build_counter(
    spec: &CounterSpec,
    effective: EffectiveSamples,
    clock: Arc<dyn Clock>,
) -> Box<dyn Counter> {
    match *spec {
        CounterSpec::Consecutive => Box::new(ConsecutiveCounter::default()),
        CounterSpec::CountFixedWindow { samples } => {
            Box::new(CountFixedWindow::new(samples, effective))
        }
        CounterSpec::TimeFixedWindow { window_width } => Box::new(TimeFixedWindow::new(
            secs_to_millis(window_width),
            effective,
            clock,
        )),
        CounterSpec::CountSlidingWindow {
            samples,
            history_limit,
        } => Box::new(CountSlidingWindow::new(samples, history_limit, effective)),
        CounterSpec::TimeSlidingWindow {
            window_width,
            history_limit,
        } => Box::new(TimeSlidingWindow::new(
            secs_to_millis(window_width),
            history_limit,
            effective,
            clock,
        )),
    }
}

fn secs_to_millis(secs: u64) -> i64 {
    i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
}

/// Success and failure counts of one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Tally {
    success: u32,
    failure: u32,
}

impl Tally {
    fn total(&self) -> u32 {
        self.success.saturating_add(self.failure)
    }

    fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Success => self.success = self.success.saturating_add(1),
            Outcome::Failure => self.failure = self.failure.saturating_add(1),
        }
    }

    fn subtract(&mut self, other: Tally) {
        self.success = self.success.saturating_sub(other.success);
        self.failure = self.failure.saturating_sub(other.failure);
    }

    fn rate(&self, outcome: Outcome, effective: EffectiveSamples) -> u32 {
        let (count, floor) = match outcome {
            Outcome::Success => (self.success, effective.success),
            Outcome::Failure => (self.failure, effective.failure),
        };
        let total = self.total();
        if total == 0 || total < floor {
            return 0;
        }
        (100 * u64::from(count) / u64::from(total)) as u32
    }
}

/// Reports the length of the current success or failure streak.
#[derive(Debug, Default)]
pub struct ConsecutiveCounter {
    successes: u32,
    failures: u32,
}

impl Counter for ConsecutiveCounter {
    fn success(&mut self) -> u32 {
        self.failures = 0;
        self.successes = self.successes.saturating_add(1);
        self.successes
    }

    fn failure(&mut self) -> u32 {
        self.successes = 0;
        self.failures = self.failures.saturating_add(1);
        self.failures
    }

    fn reset(&mut self) {
        self.successes = 0;
        self.failures = 0;
    }
}

/// Fixed window holding at most `samples` outcomes.
#[derive(Debug)]
pub struct CountFixedWindow {
    samples: u32,
    window: Tally,
    effective: EffectiveSamples,
}

impl CountFixedWindow {
    pub fn new(samples: u32, effective: EffectiveSamples) -> Self {
        Self {
            samples,
            window: Tally::default(),
            effective,
        }
    }

    fn record(&mut self, outcome: Outcome) -> u32 {
        if self.window.total() >= self.samples {
            self.window = Tally::default();
        }
        self.window.add(outcome);
        self.window.rate(outcome, self.effective)
    }
}

impl Counter for CountFixedWindow {
    fn success(&mut self) -> u32 {
        self.record(Outcome::Success)
    }

    fn failure(&mut self) -> u32 {
        self.record(Outcome::Failure)
    }

    fn reset(&mut self) {
        self.window = Tally::default();
    }
}

/// Fixed window spanning `width_ms` milliseconds.
#[derive(Debug)]
pub struct TimeFixedWindow {
    width_ms: i64,
    last_reset: i64,
    window: Tally,
    effective: EffectiveSamples,
    clock: Arc<dyn Clock>,
}

impl TimeFixedWindow {
    pub fn new(width_ms: i64, effective: EffectiveSamples, clock: Arc<dyn Clock>) -> Self {
        Self {
            width_ms,
            last_reset: clock.now_millis(),
            window: Tally::default(),
            effective,
            clock,
        }
    }

    fn record(&mut self, outcome: Outcome) -> u32 {
        let now = self.clock.now_millis();
        if window_expired(self.width_ms, self.last_reset, now) {
            self.window = Tally::default();
            self.last_reset = now;
        }
        self.window.add(outcome);
        self.window.rate(outcome, self.effective)
    }
}

impl Counter for TimeFixedWindow {
    fn success(&mut self) -> u32 {
        self.record(Outcome::Success)
    }

    fn failure(&mut self) -> u32 {
        self.record(Outcome::Failure)
    }

    fn reset(&mut self) {
        self.window = Tally::default();
        self.last_reset = self.clock.now_millis();
    }
}

fn window_expired(width_ms: i64, last_reset: i64, now: i64) -> bool {
    width_ms <= 0 || now.saturating_sub(last_reset) > width_ms
}

/// Current window plus a ring of closed windows.
///
/// `cumulative` always equals `current` plus every slot in `history`.
#[derive(Debug)]
struct SlidingWindow {
    current: Tally,
    cumulative: Tally,
    history: Vec<Tally>,
    oldest: usize,
}

impl SlidingWindow {
    fn new(history_limit: u32) -> Self {
        Self {
            current: Tally::default(),
            cumulative: Tally::default(),
            history: vec![Tally::default(); history_limit as usize],
            oldest: 0,
        }
    }

    fn add(&mut self, outcome: Outcome) {
        self.current.add(outcome);
        self.cumulative.add(outcome);
    }

    /// Close the current window into the oldest history slot.
    fn rotate(&mut self) {
        if self.history.is_empty() {
            self.cumulative.subtract(self.current);
        } else {
            let evicted = std::mem::replace(&mut self.history[self.oldest], self.current);
            self.cumulative.subtract(evicted);
            self.oldest = (self.oldest + 1) % self.history.len();
        }
        self.current = Tally::default();
    }

    fn clear(&mut self) {
        self.current = Tally::default();
        self.cumulative = Tally::default();
        self.history.iter_mut().for_each(|slot| *slot = Tally::default());
        self.oldest = 0;
    }
}

/// Sliding window of `samples` outcomes per window and `history_limit`
/// closed windows.
#[derive(Debug)]
pub struct CountSlidingWindow {
    samples: u32,
    window: SlidingWindow,
    effective: EffectiveSamples,
}

impl CountSlidingWindow {
    pub fn new(samples: u32, history_limit: u32, effective: EffectiveSamples) -> Self {
        Self {
            samples,
            window: SlidingWindow::new(history_limit),
            effective,
        }
    }

    fn record(&mut self, outcome: Outcome) -> u32 {
        if self.window.current.total() >= self.samples {
            self.window.rotate();
        }
        self.window.add(outcome);
        self.window.cumulative.rate(outcome, self.effective)
    }
}

impl Counter for CountSlidingWindow {
    fn success(&mut self) -> u32 {
        self.record(Outcome::Success)
    }

    fn failure(&mut self) -> u32 {
        self.record(Outcome::Failure)
    }

    fn reset(&mut self) {
        self.window.clear();
    }
}

/// Sliding window whose windows span `width_ms` milliseconds.
#[derive(Debug)]
pub struct TimeSlidingWindow {
    width_ms: i64,
    last_rotation: i64,
    window: SlidingWindow,
    effective: EffectiveSamples,
    clock: Arc<dyn Clock>,
}

impl TimeSlidingWindow {
    pub fn new(
        width_ms: i64,
        history_limit: u32,
        effective: EffectiveSamples,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            width_ms,
            last_rotation: clock.now_millis(),
            window: SlidingWindow::new(history_limit),
            effective,
            clock,
        }
    }

    fn record(&mut self, outcome: Outcome) -> u32 {
        let now = self.clock.now_millis();
        if window_expired(self.width_ms, self.last_rotation, now) {
            self.window.rotate();
            self.last_rotation = now;
        }
        self.window.add(outcome);
        self.window.cumulative.rate(outcome, self.effective)
    }
}

impl Counter for TimeSlidingWindow {
    fn success(&mut self) -> u32 {
        self.record(Outcome::Success)
    }

    fn failure(&mut self) -> u32 {
        self.record(Outcome::Failure)
    }

    fn reset(&mut self) {
        self.window.clear();
        self.last_rotation = self.clock.now_millis();
    }
}
