use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;

use crate::config::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("circuit breaker is open")]
pub struct CircuitOpenError;

struct State {
    circuit: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    /// Whether the single half-open probe slot is currently occupied.
    probe_in_flight: bool,
}

/// Per-target circuit breaker state machine (spec.md §4.6). One instance
/// guards one `(target_component, action)` edge; state is mutated by a
/// single dispatch task at a time for that target, so a plain mutex
/// suffices — concurrency across targets is free since each target owns its
/// own breaker.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<State>,
}

/// A permit acquired from [`CircuitBreaker::try_acquire`]. The caller must
/// report the outcome of the call it guards via [`record_success`] or
/// [`record_failure`].
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    is_probe: bool,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        CircuitBreaker {
            config,
            state: Mutex::new(State {
                circuit: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure_at: None,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.maybe_transition_to_half_open();
        self.state.lock().circuit
    }

    fn maybe_transition_to_half_open(&self) {
        let mut state = self.state.lock();
        if state.circuit == CircuitState::Open {
            if let Some(opened_at) = state.opened_at {
                let elapsed = Utc::now().signed_duration_since(opened_at);
                if elapsed.to_std().unwrap_or_default() >= self.config.open_timeout {
                    state.circuit = CircuitState::HalfOpen;
                    state.probe_in_flight = false;
                }
            }
        }
    }

    /// Attempts to acquire a call permit. `open` short-circuits without
    /// invoking the target; `half_open` allows exactly one probe in flight.
    pub fn try_acquire(&self) -> Result<Permit<'_>, CircuitOpenError> {
        self.maybe_transition_to_half_open();
        let mut state = self.state.lock();
        match state.circuit {
            CircuitState::Closed => Ok(Permit {
                breaker: self,
                is_probe: false,
            }),
            CircuitState::HalfOpen => {
                if state.probe_in_flight {
                    Err(CircuitOpenError)
                } else {
                    state.probe_in_flight = true;
                    Ok(Permit {
                        breaker: self,
                        is_probe: true,
                    })
                }
            }
            CircuitState::Open => Err(CircuitOpenError),
        }
    }

    fn record_success(&self, is_probe: bool) {
        let mut state = self.state.lock();
        if is_probe || state.circuit == CircuitState::HalfOpen {
            state.circuit = CircuitState::Closed;
        }
        state.consecutive_failures = 0;
        state.opened_at = None;
        state.probe_in_flight = false;
    }

    fn record_failure(&self, is_probe: bool) {
        let mut state = self.state.lock();
        if is_probe || state.circuit == CircuitState::HalfOpen {
            state.circuit = CircuitState::Open;
            state.opened_at = Some(Utc::now());
            state.probe_in_flight = false;
            state.last_failure_at = state.opened_at;
            return;
        }
        state.consecutive_failures += 1;
        state.last_failure_at = Some(Utc::now());
        if state.consecutive_failures >= self.config.failure_threshold {
            state.circuit = CircuitState::Open;
            state.opened_at = state.last_failure_at;
        }
    }
}

impl<'a> Permit<'a> {
    pub fn success(self) {
        self.breaker.record_success(self.is_probe);
    }

    pub fn failure(self) {
        self.breaker.record_failure(self.is_probe);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::default().with_failure_threshold(3));
        for _ in 0..2 {
            breaker.try_acquire().unwrap().failure();
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        breaker.try_acquire().unwrap().failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_acquire().is_err());
    }

    #[test]
    fn half_open_allows_single_probe_and_closes_on_success() {
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_open_timeout(Duration::from_millis(0)),
        );
        breaker.try_acquire().unwrap().failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        // open_timeout is zero, so the next acquire observes half-open.
        let permit = breaker.try_acquire().expect("probe permit");
        assert!(breaker.try_acquire().is_err(), "second concurrent probe must be rejected");
        permit.success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_probe_failure_reopens_circuit() {
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_open_timeout(Duration::from_millis(0)),
        );
        breaker.try_acquire().unwrap().failure();
        let permit = breaker.try_acquire().expect("probe permit");
        permit.failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn success_resets_failure_count_in_closed_state() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::default().with_failure_threshold(2));
        breaker.try_acquire().unwrap().failure();
        breaker.try_acquire().unwrap().success();
        breaker.try_acquire().unwrap().failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
