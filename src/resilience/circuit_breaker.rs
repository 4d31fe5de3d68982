//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, failures are counted
//! - Open: upstream assumed down, no traffic admitted
//! - Half-Open: probing, successes are counted
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure rate >= failure threshold
//! Open → Half-Open: after the wait duration
//! Half-Open → Closed: success rate >= success threshold
//! Half-Open → Open: any failure
//! ```
//!
//! # Design Decisions
//! - Per-upstream circuit breaker (not global)
//! - `active()` is a single atomic load; mutations go through one mutex
//! - Every transition resets the counter exactly once
//! - The open timer holds a weak handle; a dropped breaker ignores it

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::config::schema::CircuitBreakerSpec;
use crate::observability::metrics;
use crate::resilience::counter::{build_counter, Counter, EffectiveSamples};

/// Breaker state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for BreakerState {
    fn from(val: u8) -> Self {
        match val {
            1 => BreakerState::Open,
            2 => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }
}

/// Thresholds and timing of a breaker.
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub wait: Duration,
}

impl From<&CircuitBreakerSpec> for BreakerSettings {
    fn from(spec: &CircuitBreakerSpec) -> Self {
        Self {
            failure_threshold: spec.failure_threshold,
            success_threshold: spec.success_threshold,
            wait: Duration::from_secs(spec.wait_duration),
        }
    }
}

#[derive(Debug)]
struct Inner {
    counter: Box<dyn Counter>,
    /// Bumped on every transition so stale open timers can be ignored.
    generation: u64,
}

/// Three-state circuit breaker fed by request outcomes.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    state: AtomicU8,
    inner: Mutex<Inner>,
    settings: BreakerSettings,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        settings: BreakerSettings,
        counter: Box<dyn Counter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: AtomicU8::new(BreakerState::Closed as u8),
            inner: Mutex::new(Inner {
                counter,
                generation: 0,
            }),
            settings,
        })
    }

    /// Build a breaker and its counter from config.
    pub fn from_spec(
        name: impl Into<String>,
        spec: &CircuitBreakerSpec,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let effective = EffectiveSamples {
            success: spec.effective_success_samples,
            failure: spec.effective_failure_samples,
        };
        let counter = build_counter(&spec.counter, effective, clock);
        Self::new(name, BreakerSettings::from(spec), counter)
    }

    pub fn state(&self) -> BreakerState {
        BreakerState::from(self.state.load(Ordering::Acquire))
    }

    /// Return true unless the breaker is open.
    pub fn active(&self) -> bool {
        self.state() != BreakerState::Open
    }

    /// Report a success. Only counted while half-open.
    pub fn count_success(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        if self.state() != BreakerState::HalfOpen {
            return;
        }
        let rate = inner.counter.success();
        if rate >= self.settings.success_threshold {
            self.transition(&mut inner, BreakerState::Closed);
        }
    }

    /// Report a failure. Counted while closed; reopens a half-open breaker.
    pub fn count_failure(self: &Arc<Self>) {
        let mut inner = self.inner.lock();
        match self.state() {
            BreakerState::Closed => {
                let rate = inner.counter.failure();
                if rate >= self.settings.failure_threshold {
                    self.open(&mut inner);
                }
            }
            BreakerState::HalfOpen => self.open(&mut inner),
            BreakerState::Open => {}
        }
    }

    fn open(self: &Arc<Self>, inner: &mut Inner) {
        self.transition(inner, BreakerState::Open);

        let generation = inner.generation;
        let breaker: Weak<Self> = Arc::downgrade(self);
        spawn_deferred(self.settings.wait, move || {
            if let Some(breaker) = breaker.upgrade() {
                breaker.half_open(generation);
            }
        });
    }

    fn half_open(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if self.state() == BreakerState::Open && inner.generation == generation {
            self.transition(&mut inner, BreakerState::HalfOpen);
        }
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState) {
        let from = self.state();
        self.state.store(to as u8, Ordering::Release);
        inner.counter.reset();
        inner.generation = inner.generation.wrapping_add(1);

        tracing::info!(upstream = %self.name, ?from, ?to, "Circuit breaker state changed");
        metrics::record_breaker_state(&self.name, to);
    }
}

/// Run `f` after `wait` without blocking the caller.
fn spawn_deferred(wait: Duration, f: impl FnOnce() + Send + 'static) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                tokio::time::sleep(wait).await;
                f();
            });
        }
        Err(_) => {
            std::thread::spawn(move || {
                std::thread::sleep(wait);
                f();
            });
        }
    }
}
