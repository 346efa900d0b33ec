//! Per-route circuit breaker.
//!
//! Explicit CLOSED → OPEN → HALF_OPEN state machine over a fixed-size rolling
//! outcome window. One breaker guards one logical route (the target service
//! name), so load spread across multiple endpoints of that service shares a
//! single breaker budget.
//!
//! The state lives behind a small per-route mutex: transitions touch the
//! window, the state and the open timer together, and unrelated routes never
//! contend on it.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use crate::types::CircuitBreakerConfig;

/// Breaker state for one logical route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through and outcomes are recorded.
    Closed,
    /// Calls are short-circuited until the open timer elapses.
    Open,
    /// A limited number of probe calls are admitted.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Rolling outcomes, `true` = failure. Capped at `window_size`.
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    probes_in_flight: u32,
}

/// Decision handed back by [`CircuitBreaker::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    /// Proceed with the call and report the outcome.
    Allowed,
    /// Short-circuit: the breaker is open (or half-open with no probe budget).
    Rejected,
}

/// Circuit breaker for a single logical route.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                probes_in_flight: 0,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Current state, advancing OPEN → HALF_OPEN if the open timer elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        Self::advance_open(&mut inner, &self.config);
        inner.state
    }

    /// Ask permission to place one call. A permit must be paired with exactly
    /// one `record_success`/`record_failure` call.
    pub fn try_acquire(&self) -> Permit {
        let mut inner = self.lock();
        Self::advance_open(&mut inner, &self.config);

        match inner.state {
            CircuitState::Closed => Permit::Allowed,
            CircuitState::Open => Permit::Rejected,
            CircuitState::HalfOpen => {
                if inner.probes_in_flight < self.config.half_open_max_probes {
                    inner.probes_in_flight += 1;
                    Permit::Allowed
                } else {
                    Permit::Rejected
                }
            }
        }
    }

    /// Report a successful call.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                // Probe succeeded: close and reset the window.
                inner.state = CircuitState::Closed;
                inner.window.clear();
                inner.opened_at = None;
                inner.probes_in_flight = 0;
                tracing::info!("circuit closed after successful probe");
            }
            CircuitState::Closed => {
                Self::push_outcome(&mut inner, false, &self.config);
            }
            CircuitState::Open => {
                // Late result from a call admitted before the breaker opened.
            }
        }
    }

    /// Report a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                // Probe failed: reopen and restart the timer.
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probes_in_flight = 0;
                tracing::warn!("circuit reopened after failed probe");
            }
            CircuitState::Closed => {
                Self::push_outcome(&mut inner, true, &self.config);
                if Self::should_open(&inner, &self.config) {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    tracing::warn!(
                        "circuit opened: {}/{} recent calls failed",
                        inner.window.iter().filter(|&&f| f).count(),
                        inner.window.len()
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    fn push_outcome(inner: &mut BreakerInner, failed: bool, config: &CircuitBreakerConfig) {
        inner.window.push_back(failed);
        while inner.window.len() > config.window_size.max(1) {
            inner.window.pop_front();
        }
    }

    fn should_open(inner: &BreakerInner, config: &CircuitBreakerConfig) -> bool {
        let calls = inner.window.len();
        if calls < config.min_calls.max(1) {
            return false;
        }
        let failures = inner.window.iter().filter(|&&failed| failed).count();
        let rate = failures as f64 / calls as f64;
        rate >= config.failure_rate_threshold
    }

    fn advance_open(inner: &mut BreakerInner, config: &CircuitBreakerConfig) {
        if inner.state != CircuitState::Open {
            return;
        }
        let elapsed = inner
            .opened_at
            .map(|t| t.elapsed() >= config.open_duration)
            .unwrap_or(true);
        if elapsed {
            inner.state = CircuitState::HalfOpen;
            inner.probes_in_flight = 0;
            tracing::info!("circuit half-open, admitting probe calls");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn trip_fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            window_size: 5,
            min_calls: 5,
            failure_rate_threshold: 1.0,
            open_duration: Duration::from_millis(50),
            half_open_max_probes: 1,
        }
    }

    fn fail_n(breaker: &CircuitBreaker, n: usize) {
        for _ in 0..n {
            assert_eq!(breaker.try_acquire(), Permit::Allowed);
            breaker.record_failure();
        }
    }

    #[test]
    fn stays_closed_below_min_calls() {
        let breaker = CircuitBreaker::new(trip_fast_config());
        fail_n(&breaker, 4);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.try_acquire(), Permit::Allowed);
    }

    #[test]
    fn opens_at_threshold_and_short_circuits() {
        let breaker = CircuitBreaker::new(trip_fast_config());
        fail_n(&breaker, 5);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.try_acquire(), Permit::Rejected);
    }

    #[test]
    fn successes_keep_rate_below_threshold() {
        let config = CircuitBreakerConfig {
            failure_rate_threshold: 0.6,
            ..trip_fast_config()
        };
        let breaker = CircuitBreaker::new(config);
        // 2 failures / 5 calls = 0.4 < 0.6
        for failed in [true, false, true, false, false] {
            assert_eq!(breaker.try_acquire(), Permit::Allowed);
            if failed {
                breaker.record_failure();
            } else {
                breaker.record_success();
            }
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_after_open_duration_admits_single_probe() {
        let breaker = CircuitBreaker::new(trip_fast_config());
        fail_n(&breaker, 5);
        assert_eq!(breaker.try_acquire(), Permit::Rejected);

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.try_acquire(), Permit::Allowed);
        // Probe budget exhausted until an outcome is recorded.
        assert_eq!(breaker.try_acquire(), Permit::Rejected);
    }

    #[test]
    fn probe_success_closes_and_resets_window() {
        let breaker = CircuitBreaker::new(trip_fast_config());
        fail_n(&breaker, 5);
        std::thread::sleep(Duration::from_millis(60));

        assert_eq!(breaker.try_acquire(), Permit::Allowed);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);

        // Window was reset: a single new failure must not re-open.
        assert_eq!(breaker.try_acquire(), Permit::Allowed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn probe_failure_reopens_with_fresh_timer() {
        let breaker = CircuitBreaker::new(trip_fast_config());
        fail_n(&breaker, 5);
        std::thread::sleep(Duration::from_millis(60));

        assert_eq!(breaker.try_acquire(), Permit::Allowed);
        breaker.record_failure();
        assert_eq!(breaker.try_acquire(), Permit::Rejected);

        // After another open_duration the breaker probes again.
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(breaker.try_acquire(), Permit::Allowed);
    }

    #[test]
    fn window_is_rolling_not_cumulative() {
        let config = CircuitBreakerConfig {
            window_size: 3,
            min_calls: 3,
            failure_rate_threshold: 1.0,
            open_duration: Duration::from_millis(50),
            half_open_max_probes: 1,
        };
        let breaker = CircuitBreaker::new(config);
        // Two old failures scroll out of the window as successes arrive.
        for failed in [true, true, false, false, false] {
            assert_eq!(breaker.try_acquire(), Permit::Allowed);
            if failed {
                breaker.record_failure();
            } else {
                breaker.record_success();
            }
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
