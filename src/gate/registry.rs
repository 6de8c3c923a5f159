//! Registry of circuit breakers keyed by dependency name.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{CircuitBreaker, CircuitState, GateStatus, GateThresholds};
use crate::adaptive::ControllerEvent;
use crate::config::GateConfig;

/// Aggregate gate health, exposed for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateHealth {
    /// Total registered gates.
    pub total: usize,
    /// Gates in the closed state.
    pub closed: usize,
    /// Gates in the open state.
    pub open: usize,
    /// Gates in the half-open state.
    pub half_open: usize,
    /// Percentage of gates operating normally.
    pub health_percentage: f64,
    /// State per dependency.
    pub states: HashMap<String, CircuitState>,
}

/// Per-dependency breaker arena.
///
/// Breakers are created lazily on first use with the configured defaults.
/// The adaptive controller pushes retuned thresholds through
/// [`GateRegistry::apply_thresholds`], which clamps them to the configured
/// bounds before they reach the breaker.
pub struct GateRegistry {
    config: GateConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    events: Option<Sender<ControllerEvent>>,
}

impl GateRegistry {
    /// Create an empty registry.
    pub fn new(config: GateConfig, events: Option<Sender<ControllerEvent>>) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Get the breaker for a dependency, creating it with defaults if absent.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(name) {
            return breaker.clone();
        }

        let mut breakers = self.breakers.write();
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    name,
                    GateThresholds::from(&self.config),
                    self.config.half_open_max_calls,
                    self.events.clone(),
                ))
            })
            .clone()
    }

    /// Look up an existing breaker.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(name).cloned()
    }

    /// Registered dependency names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Clamp `thresholds` to the configured bounds and apply them to the
    /// dependency's breaker, creating it if necessary.
    pub fn apply_thresholds(&self, name: &str, thresholds: GateThresholds) -> GateThresholds {
        let clamped = self.clamp(thresholds);
        self.get_or_create(name).set_thresholds(clamped);
        clamped
    }

    /// Clamp thresholds to the configured adaptation bounds.
    pub fn clamp(&self, thresholds: GateThresholds) -> GateThresholds {
        GateThresholds {
            failure_threshold: thresholds.failure_threshold.clamp(
                self.config.min_failure_threshold,
                self.config.max_failure_threshold,
            ),
            timeout_ms: thresholds
                .timeout_ms
                .clamp(self.config.min_timeout_ms, self.config.max_timeout_ms),
            success_threshold: thresholds.success_threshold.max(1),
        }
    }

    /// Status of one gate.
    pub fn status(&self, name: &str) -> Option<GateStatus> {
        self.get(name).map(|breaker| breaker.status())
    }

    /// Force every registered breaker back to closed.
    pub fn reset_all(&self) {
        for breaker in self.breakers.read().values() {
            breaker.reset();
        }
        log::info!("all circuit breakers reset");
    }

    /// Aggregate health summary.
    pub fn health(&self) -> GateHealth {
        let breakers = self.breakers.read();
        let mut closed = 0;
        let mut open = 0;
        let mut half_open = 0;
        let mut states = HashMap::new();

        for (name, breaker) in breakers.iter() {
            let state = breaker.state();
            match state {
                CircuitState::Closed => closed += 1,
                CircuitState::Open => open += 1,
                CircuitState::HalfOpen => half_open += 1,
            }
            states.insert(name.clone(), state);
        }

        let total = breakers.len();
        let health_percentage = if total == 0 {
            100.0
        } else {
            closed as f64 / total as f64 * 100.0
        };

        GateHealth {
            total,
            closed,
            open,
            half_open,
            health_percentage,
            states,
        }
    }
}
