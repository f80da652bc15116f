//! Per-server circuit breaker.
//!
//! Closed → (consecutive failures reach the threshold) → open for a
//! configured duration → half-open on the next attempt → closed on
//! success. While open, acquisition fails immediately with the
//! remaining wait time and no network attempt is made.

use std::time::{Duration, Instant};

use crate::config::BreakerConfig;

/// Circuit breaker state for one server.
///
/// All methods take `now` explicitly so the state machine is testable
/// without sleeping.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    open_duration: Duration,
    /// Consecutive failure count since the last success.
    failures: u32,
    /// When the last failure was recorded.
    last_failure: Option<Instant>,
    /// The circuit is open if and only if `now < open_until`.
    open_until: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            open_duration: config.open_duration(),
            failures: 0,
            last_failure: None,
            open_until: None,
        }
    }

    /// Check whether an attempt is permitted at `now`.
    ///
    /// Returns `Err(remaining)` while the circuit is open. Once
    /// `open_until` has elapsed the breaker is half-open: the check
    /// passes, and the outcome of that single probe decides whether it
    /// closes ([`record_success`](Self::record_success)) or re-opens for
    /// the full duration ([`record_failure`](Self::record_failure)).
    pub fn check(&self, now: Instant) -> Result<(), Duration> {
        match self.open_until {
            Some(until) if now < until => Err(until - now),
            _ => Ok(()),
        }
    }

    /// Record a connection failure, opening the circuit at the threshold.
    pub fn record_failure(&mut self, now: Instant) {
        self.failures += 1;
        self.last_failure = Some(now);
        if self.failures >= self.failure_threshold {
            self.open_until = Some(now + self.open_duration);
        }
    }

    /// Record a successful connection, unconditionally clearing the breaker.
    pub fn record_success(&mut self) {
        self.failures = 0;
        self.last_failure = None;
        self.open_until = None;
    }

    /// Current consecutive failure count.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Whether the circuit is open at `now`.
    pub fn is_open(&self, now: Instant) -> bool {
        self.check(now).is_err()
    }
}
