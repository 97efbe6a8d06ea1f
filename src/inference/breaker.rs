//! Per-dependency circuit breaker.
//!
//! One instance is held per external dependency name ("completion",
//! "embedding") so failure of one does not trip the other. Shared across all
//! sessions, so the inner state sits behind a mutex.

use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::BreakerConfig;

/// Breaker states: closed passes calls through, open fails fast, half-open
/// admits a small trial budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trials_remaining: u32,
}

/// Fault-isolation state machine for one external dependency.
///
/// closed → open after `failure_threshold` consecutive failures; open →
/// half-open once `open_duration` elapses; half-open → closed on a recorded
/// success, or back to open on a recorded failure.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    open_duration: Duration,
    half_open_trials: u32,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: &str, config: &BreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            failure_threshold: config.failure_threshold.max(1),
            open_duration: Duration::from_secs(config.open_duration_secs),
            half_open_trials: config.half_open_trials.max(1),
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trials_remaining: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a call may be attempted right now. A `false` result must be
    /// treated identically to a call failure by the caller: fail fast, no
    /// network attempt.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Open {
            let elapsed = inner
                .opened_at
                .map(|t| t.elapsed() >= self.open_duration)
                .unwrap_or(true);
            if elapsed {
                inner.state = CircuitState::HalfOpen;
                inner.trials_remaining = self.half_open_trials;
                info!(breaker = %self.name, "circuit half-open, admitting trial calls");
            }
        }

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.trials_remaining > 0 {
                    inner.trials_remaining -= 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Report a successful call. Closes the circuit from half-open.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            info!(breaker = %self.name, "trial call succeeded, circuit closed");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    /// Report a failed or timed-out call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!(breaker = %self.name, "trial call failed, circuit re-opened");
            }
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "failure threshold reached, circuit opened"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }
}
