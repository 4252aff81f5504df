//! Per-provider circuit breaker
//!
//! Consecutive classified failures open the circuit; after the reset
//! window one probe call is admitted. The probe's outcome either closes
//! the circuit or re-opens it for another window.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Observable circuit state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, calls flow through
    Closed,
    /// Calls are refused until the reset window elapses
    Open,
    /// One probe is allowed to test recovery
    HalfOpen,
}

/// Outcome of asking the breaker to admit a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed, call proceeds
    Admitted,
    /// Circuit recovering; this caller holds the single probe slot
    Probe,
    /// Circuit open, the call must not be made
    Rejected,
}

enum Inner {
    Closed { consecutive_failures: u32 },
    Open { until: Instant },
    HalfOpen { probe_in_flight: bool },
}

/// Circuit breaker for one provider
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    reset_after: Duration,
}

impl CircuitBreaker {
    /// Create a closed breaker
    #[must_use]
    pub const fn new(failure_threshold: u32, reset_after: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::Closed {
                consecutive_failures: 0,
            }),
            failure_threshold,
            reset_after,
        }
    }

    /// Decide whether a call may proceed
    ///
    /// An open circuit whose reset window has elapsed transitions to
    /// half-open and hands the caller the probe slot; at most one probe is
    /// ever in flight.
    pub fn admit(&self) -> Admission {
        let mut inner = self.lock();
        match &mut *inner {
            Inner::Closed { .. } => Admission::Admitted,
            Inner::Open { until } => {
                if Instant::now() >= *until {
                    *inner = Inner::HalfOpen { probe_in_flight: true };
                    Admission::Probe
                } else {
                    Admission::Rejected
                }
            }
            Inner::HalfOpen { probe_in_flight } => {
                if *probe_in_flight {
                    Admission::Rejected
                } else {
                    *probe_in_flight = true;
                    Admission::Probe
                }
            }
        }
    }

    /// Record a successful call; closes the circuit from any state
    pub fn record_success(&self) {
        *self.lock() = Inner::Closed {
            consecutive_failures: 0,
        };
    }

    /// Record a classified failure
    ///
    /// Trips the circuit at the consecutive-failure threshold, and
    /// immediately re-opens it when a half-open probe fails. Failures of
    /// calls that began before the circuit opened leave the window as is.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match &mut *inner {
            Inner::Closed { consecutive_failures } => {
                *consecutive_failures += 1;
                if *consecutive_failures >= self.failure_threshold {
                    *inner = Inner::Open {
                        until: Instant::now() + self.reset_after,
                    };
                }
            }
            Inner::HalfOpen { .. } => {
                *inner = Inner::Open {
                    until: Instant::now() + self.reset_after,
                };
            }
            Inner::Open { .. } => {}
        }
    }

    /// Current state for observability
    pub fn state(&self) -> CircuitState {
        match &*self.lock() {
            Inner::Closed { .. } => CircuitState::Closed,
            Inner::Open { until } => {
                if Instant::now() >= *until {
                    CircuitState::HalfOpen
                } else {
                    CircuitState::Open
                }
            }
            Inner::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
