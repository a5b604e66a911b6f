//! Per-provider circuit breaker.
//!
//! Closed counts consecutive failures; at the threshold the circuit
//! opens and requests fail fast until the recovery deadline passes.
//! Half-open admits a small probe; enough consecutive successes close
//! the circuit, any failure reopens it with a fresh deadline.
//!
//! The registry consults the breaker between permit acquisition and the
//! retry loop, so one user-visible call is one breaker observation.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::error::ProviderError;

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, requests pass through
    Closed,
    /// Failing fast until the recovery deadline
    Open,
    /// Probing whether the provider recovered
    HalfOpen,
}

/// Tuning for one breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing
    #[serde(with = "crate::duration_serde")]
    pub recovery_timeout: Duration,
    /// Consecutive half-open successes that close the circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    /// When an open circuit may transition to half-open
    retry_at: Option<Instant>,
    half_open_inflight: u32,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            retry_at: None,
            half_open_inflight: 0,
        }
    }
}

/// Point-in-time view of a breaker for logging and stats endpoints.
#[derive(Debug, Clone)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

/// Circuit breaker guarding one provider. All transitions happen under
/// a per-breaker lock; concurrent callers observe them idempotently.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Gate a request. `Err(CircuitOpen)` means fail fast without
    /// touching the provider.
    pub fn check(&self) -> Result<(), ProviderError> {
        let mut state = self.lock();

        match state.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let recovered = state
                    .retry_at
                    .map(|deadline| Instant::now() >= deadline)
                    .unwrap_or(false);
                if recovered {
                    state.state = CircuitState::HalfOpen;
                    state.half_open_inflight = 1;
                    state.consecutive_successes = 0;
                    info!(breaker = %self.name, "circuit half-open, probing provider");
                    Ok(())
                } else {
                    Err(ProviderError::CircuitOpen {
                        provider: self.name.clone(),
                    })
                }
            }
            CircuitState::HalfOpen => {
                if state.half_open_inflight < self.config.success_threshold {
                    state.half_open_inflight += 1;
                    Ok(())
                } else {
                    // Probe quota spent; wait for results.
                    Err(ProviderError::CircuitOpen {
                        provider: self.name.clone(),
                    })
                }
            }
        }
    }

    /// Record the outcome of a call admitted by [`check`].
    /// `Cancelled` and `InvalidRequest` do not count against the
    /// provider.
    pub fn record(&self, result: &Result<(), &ProviderError>) {
        match result {
            Ok(()) => self.record_success(),
            Err(error) if error.counts_as_failure() => self.record_failure(),
            Err(_) => {}
        }
    }

    pub fn record_success(&self) {
        let mut state = self.lock();
        state.consecutive_failures = 0;
        state.consecutive_successes += 1;

        if state.state == CircuitState::HalfOpen
            && state.consecutive_successes >= self.config.success_threshold
        {
            state.state = CircuitState::Closed;
            state.half_open_inflight = 0;
            state.retry_at = None;
            info!(breaker = %self.name, "circuit closed after successful probes");
        }
    }

    pub fn record_failure(&self) {
        let mut state = self.lock();
        state.consecutive_successes = 0;
        state.consecutive_failures += 1;

        match state.state {
            CircuitState::Closed => {
                if state.consecutive_failures >= self.config.failure_threshold {
                    state.state = CircuitState::Open;
                    state.retry_at = Some(Instant::now() + self.config.recovery_timeout);
                    warn!(
                        breaker = %self.name,
                        failures = state.consecutive_failures,
                        "circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                state.state = CircuitState::Open;
                state.retry_at = Some(Instant::now() + self.config.recovery_timeout);
                state.half_open_inflight = 0;
                warn!(breaker = %self.name, "probe failed, circuit reopened");
            }
            CircuitState::Open => {
                // Late failure from a request admitted before the open.
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let state = self.lock();
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: state.state,
            consecutive_failures: state.consecutive_failures,
            consecutive_successes: state.consecutive_successes,
        }
    }

    /// Manually trip the breaker, for tests and operator tooling.
    pub fn force_open(&self) {
        let mut state = self.lock();
        state.state = CircuitState::Open;
        state.retry_at = Some(Instant::now() + self.config.recovery_timeout);
    }

    /// Manually reset the breaker.
    pub fn force_closed(&self) {
        let mut state = self.lock();
        *state = BreakerState::default();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
