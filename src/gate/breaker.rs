//! The per-dependency circuit breaker.

use std::future::Future;
use std::time::Instant;

use chrono::Utc;
use crossbeam_channel::Sender;
use parking_lot::Mutex;

use super::{CircuitState, CircuitStats, GateStatus, GateThresholds};
use crate::adaptive::{ControllerEvent, PerformanceEvent};
use crate::error::{RemoraError, Result};

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    thresholds: GateThresholds,
    failure_count: u32,
    consecutive_successes: u32,
    half_open_in_flight: u32,
    opened_at: Option<Instant>,
    stats: CircuitStats,
}

/// Circuit breaker guarding one remote dependency.
///
/// All transitions happen under one mutex over the state block; the
/// protected future runs outside the lock. Every invocation (success,
/// failure, or rejection) emits a [`PerformanceEvent`] into the controller
/// channel without ever blocking the caller.
pub struct CircuitBreaker {
    name: String,
    half_open_max_calls: u32,
    inner: Mutex<BreakerState>,
    events: Option<Sender<ControllerEvent>>,
}

/// Admission ticket for one gated call.
///
/// A half-open admission reserves one of the bounded trial slots. The slot
/// is released on drop, so a caller that cancels the protected future mid
/// flight (a query deadline aborting a straggler task) still hands the slot
/// back instead of wedging the gate.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    holds_trial_slot: bool,
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if self.holds_trial_slot {
            let mut inner = self.breaker.inner.lock();
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }
}

impl CircuitBreaker {
    /// Create a closed breaker with the given thresholds.
    pub fn new<S: Into<String>>(
        name: S,
        thresholds: GateThresholds,
        half_open_max_calls: u32,
        events: Option<Sender<ControllerEvent>>,
    ) -> Self {
        let name = name.into();
        log::info!("circuit breaker '{name}' initialized in closed state");
        Self {
            name,
            half_open_max_calls,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                thresholds,
                failure_count: 0,
                consecutive_successes: 0,
                half_open_in_flight: 0,
                opened_at: None,
                stats: CircuitStats::default(),
            }),
            events: events.clone(),
        }
    }

    /// Dependency name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute `future` under the gate.
    ///
    /// While open, calls are rejected immediately with
    /// [`RemoraError::GateOpen`] and the dependency is not touched. While
    /// half-open, at most `half_open_max_calls` concurrent trials are
    /// admitted; excess callers are rejected as if the gate were open.
    pub async fn call<T, F>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let Some(_admission) = self.admit() else {
            self.emit(0, false);
            return Err(RemoraError::gate_open(&self.name));
        };

        let start = Instant::now();
        let result = future.await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => self.on_success(),
            Err(error) => self.on_failure(error),
        }
        self.emit(latency_ms, result.is_ok());

        result
    }

    /// Execute `future` under the gate, substituting `fallback()` for any
    /// degradable outcome (rejection, timeout, unavailability).
    pub async fn call_with_fallback<T, F, FB>(&self, future: F, fallback: FB) -> Result<T>
    where
        F: Future<Output = Result<T>>,
        FB: FnOnce() -> T,
    {
        match self.call(future).await {
            Ok(value) => Ok(value),
            Err(error) if error.is_degradable() => {
                log::debug!("gate '{}' serving fallback: {error}", self.name);
                Ok(fallback())
            }
            Err(error) => Err(error),
        }
    }

    /// Admission decision, made atomically with any due state transition.
    fn admit(&self) -> Option<Admission<'_>> {
        let mut inner = self.inner.lock();
        inner.stats.total_calls += 1;

        match inner.state {
            CircuitState::Closed => Some(Admission {
                breaker: self,
                holds_trial_slot: false,
            }),
            CircuitState::Open => {
                let cooldown_elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed().as_millis() as u64 >= inner.thresholds.timeout_ms)
                    .unwrap_or(true);
                if cooldown_elapsed {
                    Self::transition(&mut inner, &self.name, CircuitState::HalfOpen);
                    inner.half_open_in_flight = 1;
                    Some(Admission {
                        breaker: self,
                        holds_trial_slot: true,
                    })
                } else {
                    inner.stats.rejected_calls += 1;
                    log::warn!(
                        "circuit breaker '{}' is open, rejecting call (failures: {})",
                        self.name,
                        inner.failure_count
                    );
                    None
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.half_open_max_calls {
                    inner.half_open_in_flight += 1;
                    Some(Admission {
                        breaker: self,
                        holds_trial_slot: true,
                    })
                } else {
                    inner.stats.rejected_calls += 1;
                    log::warn!(
                        "circuit breaker '{}' half-open trial limit reached, rejecting call",
                        self.name
                    );
                    None
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        inner.stats.successful_calls += 1;
        inner.stats.last_success_time = Some(Utc::now());

        match inner.state {
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                log::info!(
                    "circuit breaker '{}' half-open success ({}/{})",
                    self.name,
                    inner.consecutive_successes,
                    inner.thresholds.success_threshold
                );
                if inner.consecutive_successes >= inner.thresholds.success_threshold {
                    Self::transition(&mut inner, &self.name, CircuitState::Closed);
                }
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            // A call admitted before a concurrent open completed late.
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, error: &RemoraError) {
        let mut inner = self.inner.lock();
        inner.stats.failed_calls += 1;
        inner.stats.last_failure_time = Some(Utc::now());

        log::warn!("circuit breaker '{}' call failed: {error}", self.name);

        match inner.state {
            CircuitState::HalfOpen => {
                // Any half-open failure reopens the circuit.
                Self::transition(&mut inner, &self.name, CircuitState::Open);
            }
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= inner.thresholds.failure_threshold {
                    Self::transition(&mut inner, &self.name, CircuitState::Open);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn transition(inner: &mut BreakerState, name: &str, to: CircuitState) {
        inner.stats.state_changes += 1;
        match to {
            CircuitState::Open => {
                inner.opened_at = Some(Instant::now());
                log::error!(
                    "circuit breaker '{name}' opened (failures: {}, threshold: {})",
                    inner.failure_count,
                    inner.thresholds.failure_threshold
                );
            }
            CircuitState::HalfOpen => {
                inner.consecutive_successes = 0;
                inner.half_open_in_flight = 0;
                log::info!(
                    "circuit breaker '{name}' half-open, probing recovery after {}ms cooldown",
                    inner.thresholds.timeout_ms
                );
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.consecutive_successes = 0;
                inner.half_open_in_flight = 0;
                inner.opened_at = None;
                log::info!("circuit breaker '{name}' closed (recovered)");
            }
        }
        inner.state = to;
    }

    fn emit(&self, latency_ms: u64, success: bool) {
        if let Some(sender) = &self.events {
            let event = PerformanceEvent::new(self.name.clone(), latency_ms, success);
            // A congested controller must never slow the call path.
            let _ = sender.try_send(ControllerEvent::Performance(event));
        }
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Whether the gate currently rejects calls.
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Whether the gate operates normally.
    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    /// Whether the gate is probing recovery.
    pub fn is_half_open(&self) -> bool {
        self.state() == CircuitState::HalfOpen
    }

    /// Replace the adaptable thresholds. Takes effect on the next call.
    pub fn set_thresholds(&self, thresholds: GateThresholds) {
        let mut inner = self.inner.lock();
        if inner.thresholds != thresholds {
            log::info!(
                "circuit breaker '{}' thresholds retuned: failures {} -> {}, cooldown {}ms -> {}ms",
                self.name,
                inner.thresholds.failure_threshold,
                thresholds.failure_threshold,
                inner.thresholds.timeout_ms,
                thresholds.timeout_ms
            );
            inner.thresholds = thresholds;
        }
    }

    /// Currently effective thresholds.
    pub fn thresholds(&self) -> GateThresholds {
        self.inner.lock().thresholds
    }

    /// Manually force the breaker back to closed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        Self::transition(&mut inner, &self.name, CircuitState::Closed);
        log::info!("circuit breaker '{}' manually reset", self.name);
    }

    /// Point-in-time status for health reporting.
    pub fn status(&self) -> GateStatus {
        let inner = self.inner.lock();
        GateStatus {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            consecutive_successes: inner.consecutive_successes,
            thresholds: inner.thresholds,
            stats: inner.stats.clone(),
        }
    }
}
