//! Per-worker circuit breaker with lock-free atomics.
//!
//! Unlike a combinator that wraps an arbitrary future, this breaker exposes
//! bare query and mutation methods: the router calls `is_available()` before
//! selecting a worker and `record_success()`/`record_failure()` after the
//! proxied call returns, since the operation it guards crosses a process
//! boundary (the worker's HTTP endpoint) and cannot be owned by the breaker
//! itself.

use crate::clock::{Clock, MonotonicClock};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

/// Observable state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: usize,
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

struct Inner {
    state: AtomicU8,
    failure_count: AtomicUsize,
    opened_at_millis: AtomicU64,
    half_open_probe_in_flight: AtomicBool,
}

/// A single worker's circuit breaker.
///
/// Cheap to clone: all mutable state lives behind the shared `Arc<Inner>`.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Inner>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, MonotonicClock::default())
    }

    pub fn with_clock<C: Clock + 'static>(config: CircuitBreakerConfig, clock: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(STATE_CLOSED),
                failure_count: AtomicUsize::new(0),
                opened_at_millis: AtomicU64::new(0),
                half_open_probe_in_flight: AtomicBool::new(false),
            }),
            config,
            clock: Arc::new(clock),
        }
    }

    /// Current state without mutating anything. Use `is_available()` to
    /// drive routing decisions, since that path performs the Open →
    /// HalfOpen transition when the recovery timeout has elapsed.
    pub fn state(&self) -> CircuitState {
        match self.inner.state.load(Ordering::Acquire) {
            STATE_CLOSED => CircuitState::Closed,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Open,
        }
    }

    pub fn failure_count(&self) -> usize {
        self.inner.failure_count.load(Ordering::Acquire)
    }

    /// Whether a request may currently be routed to the worker this breaker
    /// guards. Closed and HalfOpen (with no probe already in flight) are
    /// available; Open is not unless the recovery timeout has elapsed, in
    /// which case this call performs the Open → HalfOpen transition and
    /// admits exactly one caller as the probe.
    pub fn is_available(&self) -> bool {
        match self.inner.state.load(Ordering::Acquire) {
            STATE_CLOSED => true,
            STATE_HALF_OPEN => {
                // Only the caller that wins the probe flag may proceed;
                // everyone else waits for that probe's outcome.
                self.inner
                    .half_open_probe_in_flight
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            }
            STATE_OPEN => {
                let opened_at = self.inner.opened_at_millis.load(Ordering::Acquire);
                let elapsed = self.clock.now_millis().saturating_sub(opened_at);
                if elapsed < self.config.recovery_timeout.as_millis() as u64 {
                    return false;
                }
                match self.inner.state.compare_exchange(
                    STATE_OPEN,
                    STATE_HALF_OPEN,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        tracing::info!("circuit breaker: open -> half_open");
                        self.inner.half_open_probe_in_flight.store(true, Ordering::Release);
                        true
                    }
                    Err(_) => false,
                }
            }
            _ => false,
        }
    }

    /// Record a successful call. Closes the breaker from HalfOpen, or resets
    /// the failure count while Closed.
    pub fn record_success(&self) {
        match self.inner.state.load(Ordering::Acquire) {
            STATE_HALF_OPEN => {
                if self
                    .inner
                    .state
                    .compare_exchange(STATE_HALF_OPEN, STATE_CLOSED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.inner.failure_count.store(0, Ordering::Release);
                    self.inner.opened_at_millis.store(0, Ordering::Release);
                    self.inner.half_open_probe_in_flight.store(false, Ordering::Release);
                    tracing::info!("circuit breaker: half_open -> closed");
                }
            }
            STATE_CLOSED => {
                self.inner.failure_count.store(0, Ordering::Release);
            }
            _ => {}
        }
    }

    /// Record a failed call. Reopens from HalfOpen immediately, or opens
    /// from Closed once `failure_threshold` consecutive failures accrue.
    pub fn record_failure(&self) {
        let state = self.inner.state.load(Ordering::Acquire);
        let failures = self.inner.failure_count.fetch_add(1, Ordering::AcqRel) + 1;

        match state {
            STATE_HALF_OPEN => {
                if self
                    .inner
                    .state
                    .compare_exchange(STATE_HALF_OPEN, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.inner.opened_at_millis.store(self.clock.now_millis(), Ordering::Release);
                    self.inner.half_open_probe_in_flight.store(false, Ordering::Release);
                    tracing::warn!(failures, "circuit breaker: half_open probe failed -> open");
                }
            }
            STATE_CLOSED => {
                if failures >= self.config.failure_threshold
                    && self
                        .inner
                        .state
                        .compare_exchange(STATE_CLOSED, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    self.inner.opened_at_millis.store(self.clock.now_millis(), Ordering::Release);
                    tracing::error!(
                        failures,
                        threshold = self.config.failure_threshold,
                        "circuit breaker: closed -> open"
                    );
                }
            }
            _ => {}
        }
    }

    /// Release a half-open probe that was admitted by `is_available()` but
    /// never actually sent — e.g. the router discarded the candidate at a
    /// later filtering step. Without this, a probe that never resolves to
    /// `record_success`/`record_failure` leaves `half_open_probe_in_flight`
    /// set forever, wedging the breaker so no future call can ever probe it
    /// again. No-op if the breaker has since left HalfOpen.
    pub fn release_wasted_probe(&self) {
        if self.inner.state.load(Ordering::Acquire) == STATE_HALF_OPEN {
            self.inner.half_open_probe_in_flight.store(false, Ordering::Release);
        }
    }

    /// Force the breaker back to Closed with a clean slate. Used when an
    /// operator drains and re-admits a worker.
    pub fn reset(&self) {
        self.inner.state.store(STATE_CLOSED, Ordering::Release);
        self.inner.failure_count.store(0, Ordering::Release);
        self.inner.opened_at_millis.store(0, Ordering::Release);
        self.inner.half_open_probe_in_flight.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64 as TestAtomicU64;

    #[derive(Debug, Clone)]
    struct FakeClock {
        now: Arc<TestAtomicU64>,
    }

    impl FakeClock {
        fn new() -> Self {
            Self { now: Arc::new(TestAtomicU64::new(0)) }
        }

        fn advance(&self, millis: u64) {
            self.now.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for FakeClock {
        fn now_millis(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }
    }

    fn config(threshold: usize, recovery_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: Duration::from_millis(recovery_ms),
        }
    }

    #[test]
    fn starts_closed_and_available() {
        let cb = CircuitBreaker::new(config(3, 1000));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.is_available());
    }

    #[test]
    fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new(config(3, 1000));
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.is_available());
    }

    #[test]
    fn success_resets_failure_count_while_closed() {
        let cb = CircuitBreaker::new(config(3, 1000));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn transitions_to_half_open_after_recovery_timeout() {
        let clock = FakeClock::new();
        let cb = CircuitBreaker::with_clock(config(1, 100), clock.clone());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.is_available());

        clock.advance(150);
        assert!(cb.is_available());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn only_one_half_open_probe_admitted_at_a_time() {
        let clock = FakeClock::new();
        let cb = CircuitBreaker::with_clock(config(1, 100), clock.clone());
        cb.record_failure();
        clock.advance(150);

        assert!(cb.is_available());
        // A second caller observing half_open before the first probe
        // resolves must not also be admitted.
        assert!(!cb.is_available());
    }

    #[test]
    fn half_open_success_closes_breaker() {
        let clock = FakeClock::new();
        let cb = CircuitBreaker::with_clock(config(1, 100), clock.clone());
        cb.record_failure();
        clock.advance(150);
        assert!(cb.is_available());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.is_available());
    }

    #[test]
    fn half_open_failure_reopens_breaker() {
        let clock = FakeClock::new();
        let cb = CircuitBreaker::with_clock(config(1, 100), clock.clone());
        cb.record_failure();
        clock.advance(150);
        assert!(cb.is_available());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.is_available());
    }

    #[test]
    fn release_wasted_probe_lets_a_later_caller_probe_again() {
        let clock = FakeClock::new();
        let cb = CircuitBreaker::with_clock(config(1, 100), clock.clone());
        cb.record_failure();
        clock.advance(150);

        assert!(cb.is_available());
        assert!(!cb.is_available(), "a second caller must not also be admitted");

        cb.release_wasted_probe();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.is_available(), "releasing the wasted probe re-admits a caller");
    }

    #[test]
    fn release_wasted_probe_is_a_no_op_once_the_breaker_has_moved_on() {
        let cb = CircuitBreaker::new(config(3, 1000));
        cb.release_wasted_probe();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn reset_returns_breaker_to_closed() {
        let cb = CircuitBreaker::new(config(1, 1000));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
        assert!(cb.is_available());
    }
}
