//! Resilience gates.
//!
//! Every remote dependency (embedding provider, graph store) is wrapped in a
//! per-dependency circuit breaker. Breakers live in a [`GateRegistry`] keyed
//! by dependency name so that tests can instantiate isolated gate sets and
//! concurrent calls to different dependencies never contend.

pub mod breaker;
pub mod registry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use breaker::CircuitBreaker;
pub use registry::{GateHealth, GateRegistry};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation; calls pass through.
    Closed,
    /// Failure threshold reached; calls are rejected immediately.
    Open,
    /// Probing recovery; a bounded number of trial calls are admitted.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        write!(f, "{name}")
    }
}

/// The adaptable portion of a gate's configuration. The adaptive controller
/// retunes these within the bounds declared in
/// [`GateConfig`](crate::config::GateConfig).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateThresholds {
    /// Consecutive failures before the gate opens.
    pub failure_threshold: u32,
    /// Cooldown before an open gate probes recovery, in milliseconds.
    pub timeout_ms: u64,
    /// Consecutive half-open successes before the gate closes.
    pub success_threshold: u32,
}

impl From<&crate::config::GateConfig> for GateThresholds {
    fn from(config: &crate::config::GateConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            timeout_ms: config.timeout_ms,
            success_threshold: config.success_threshold,
        }
    }
}

/// Running statistics for one breaker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CircuitStats {
    /// Calls attempted against the gate, including rejections.
    pub total_calls: u64,
    /// Calls that completed successfully.
    pub successful_calls: u64,
    /// Calls that completed with a failure.
    pub failed_calls: u64,
    /// Calls rejected without being attempted.
    pub rejected_calls: u64,
    /// Number of state transitions.
    pub state_changes: u64,
    /// Wall-clock time of the most recent failure.
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Wall-clock time of the most recent success.
    pub last_success_time: Option<DateTime<Utc>>,
}

impl CircuitStats {
    /// Fraction of attempted calls that succeeded.
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.successful_calls as f64 / self.total_calls as f64
    }
}

/// Point-in-time view of one gate, exposed for health reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateStatus {
    /// Dependency name.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures observed while closed.
    pub failure_count: u32,
    /// Consecutive successes observed while half-open.
    pub consecutive_successes: u32,
    /// Currently effective thresholds.
    pub thresholds: GateThresholds,
    /// Running statistics.
    pub stats: CircuitStats,
}
