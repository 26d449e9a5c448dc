//! Circuit breaker guarding the remote lock path.
//!
//! ```text
//!            failures >= threshold            cooldown elapsed
//!   Closed ─────────────────────────► Open ─────────────────────► HalfOpen
//!     ▲                                ▲                             │
//!     │        trial succeeded         │       trial failed          │
//!     └────────────────────────────────┼─────────────────────────────┤
//!                                      └─────────────────────────────┘
//! ```
//!
//! All state lives behind one mutex and every transition happens inside a
//! single critical section, so concurrent callers observe each transition
//! exactly once. While half-open, exactly one trial is in flight.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::CircuitBreakerConfig;

/// State of the remote path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Remote path is attempted.
    #[default]
    Closed,
    /// One trial is testing whether the remote path recovered.
    HalfOpen,
    /// Remote path is skipped until the cooldown elapses.
    Open,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::HalfOpen => "HALF_OPEN",
            CircuitState::Open => "OPEN",
        }
    }

    fn gauge_value(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point-in-time view of the breaker, for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    // Monotonic twin of `opened_at`, used for the cooldown.
    opened_instant: Option<Instant>,
    trial_in_flight: bool,
}

/// Decision for one call about whether to try the remote path.
#[derive(Debug)]
pub enum Admission<'a> {
    /// Try the remote path and report the outcome on the permit.
    Attempt(RemotePermit<'a>),
    /// Skip the remote path entirely.
    Bypass,
}

/// Permission to make one remote attempt.
///
/// The outcome must be reported with [`succeed`](Self::succeed) or
/// [`fail`](Self::fail). An abandoned trial permit counts as a failed trial.
#[derive(Debug)]
pub struct RemotePermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl RemotePermit<'_> {
    /// Returns true if this permit is the single half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    pub fn fail(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }
}

impl Drop for RemotePermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.on_failure(true);
        }
    }
}

/// Process-wide health tracker for the remote lock service.
///
/// Not persisted; a restarted process starts closed.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.lock();
        CircuitBreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_failure_at: inner.last_failure_at,
            opened_at: inner.opened_at,
        }
    }

    /// Decides whether the caller may try the remote path.
    ///
    /// Moves Open to HalfOpen once the cooldown has elapsed and hands the
    /// trial to exactly one caller; everyone else bypasses until it settles.
    pub fn admit(&self) -> Admission<'_> {
        let mut inner = self.lock();
        let trial = match inner.state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return Admission::Bypass;
                }
                true
            }
            CircuitState::Open => {
                let cooled_down = inner
                    .opened_instant
                    .is_none_or(|opened| opened.elapsed() >= self.config.cooldown);
                if !cooled_down {
                    return Admission::Bypass;
                }
                self.transition(&mut inner, CircuitState::HalfOpen);
                true
            }
        };

        if trial {
            inner.trial_in_flight = true;
        }

        Admission::Attempt(RemotePermit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen if trial => {
                inner.trial_in_flight = false;
                self.transition(&mut inner, CircuitState::Closed);
            }
            // A call admitted before the circuit opened says nothing about
            // the service now.
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure_at = Some(Utc::now());

        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen if trial => {
                inner.trial_in_flight = false;
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }

        match to {
            CircuitState::Open => {
                inner.opened_at = Some(Utc::now());
                inner.opened_instant = Some(Instant::now());
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.opened_instant = None;
            }
            CircuitState::HalfOpen => {}
        }
        inner.state = to;

        tracing::warn!(breaker = %self.name, %from, %to, "circuit breaker state transition");
        metrics::counter!(
            "circuit_breaker_transitions_total",
            "breaker" => self.name.clone(),
            "from" => from.as_str(),
            "to" => to.as_str()
        )
        .increment(1);
        metrics::gauge!("circuit_breaker_state", "breaker" => self.name.clone())
            .set(to.gauge_value());
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
