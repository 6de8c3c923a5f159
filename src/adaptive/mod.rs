//! Adaptive parameters and the online learning event model.
//!
//! All learning state is owned by the [`controller`] task, the single
//! writer. Queries never read mutable learning state: they take an
//! immutable [`AdaptiveParameters`] snapshot from the [`SnapshotStore`]
//! (an `Arc` clone behind a short read lock), and the controller publishes
//! replacements wholesale via copy-then-swap. Readers never block on the
//! writer and the writer never blocks on readers.

pub mod bandit;
pub mod controller;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::{LearningConfig, MixArm};
use crate::error::{RemoraError, Result};
use crate::gate::GateThresholds;

pub use controller::{AdaptiveController, ControllerHandle};

/// Tolerance on the fusion weight sum invariant.
pub const WEIGHT_EPSILON: f32 = 1e-3;

/// Feedback polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackLabel {
    /// The result helped.
    Positive,
    /// The result did not help.
    Negative,
}

/// User feedback on one result of one query. Consumed exactly once by the
/// controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEvent {
    /// Query the feedback refers to.
    pub query_id: String,
    /// Document the feedback refers to.
    pub doc_id: String,
    /// Explicit polarity, if given.
    pub label: Option<FeedbackLabel>,
    /// Rating on a 0-5 scale, if given.
    pub rating: Option<f32>,
    /// When the feedback was recorded.
    pub timestamp: DateTime<Utc>,
}

impl FeedbackEvent {
    /// Create a feedback event with an explicit label.
    pub fn labeled<S: Into<String>>(query_id: S, doc_id: S, label: FeedbackLabel) -> Self {
        Self {
            query_id: query_id.into(),
            doc_id: doc_id.into(),
            label: Some(label),
            rating: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a feedback event carrying only a rating.
    pub fn rated<S: Into<String>>(query_id: S, doc_id: S, rating: f32) -> Self {
        Self {
            query_id: query_id.into(),
            doc_id: doc_id.into(),
            label: None,
            rating: Some(rating),
            timestamp: Utc::now(),
        }
    }
}

/// One latency/outcome measurement for a strategy or gated dependency.
/// Emitted by the resilience gate after every call, including rejections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceEvent {
    /// Strategy or dependency that produced the measurement.
    pub strategy: String,
    /// Call latency in milliseconds (zero for rejected calls).
    pub latency_ms: u64,
    /// Whether the call succeeded.
    pub success: bool,
    /// When the measurement was taken.
    pub timestamp: DateTime<Utc>,
}

impl PerformanceEvent {
    /// Create a performance event timestamped now.
    pub fn new<S: Into<String>>(strategy: S, latency_ms: u64, success: bool) -> Self {
        Self {
            strategy: strategy.into(),
            latency_ms,
            success,
            timestamp: Utc::now(),
        }
    }
}

/// Per-query attribution the facade reports after fusing, so the controller
/// can later join feedback to the strategies (and bandit arm) that produced
/// each result.
#[derive(Debug, Clone)]
pub struct QueryAttribution {
    /// Query id minted by the facade.
    pub query_id: String,
    /// Bandit arm that selected the strategy mix, if the bandit ran.
    pub arm: Option<String>,
    /// Per document: each contributing strategy's share of the fused score.
    pub contributions: HashMap<String, HashMap<String, f32>>,
}

/// Events flowing into the controller.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    /// User feedback.
    Feedback(FeedbackEvent),
    /// Gate or caller-reported performance measurement.
    Performance(PerformanceEvent),
    /// Post-query attribution from the facade.
    Attribution(QueryAttribution),
}

/// Beta-Bernoulli state of one bandit arm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArmState {
    /// Success pseudo-count.
    pub alpha: f64,
    /// Failure pseudo-count.
    pub beta: f64,
}

impl Default for ArmState {
    fn default() -> Self {
        // Beta(1, 1): uniform prior.
        Self { alpha: 1.0, beta: 1.0 }
    }
}

impl ArmState {
    /// Posterior mean alpha / (alpha + beta).
    pub fn expected_value(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Record one reward observation.
    pub fn observe(&mut self, success: bool) {
        if success {
            self.alpha += 1.0;
        } else {
            self.beta += 1.0;
        }
    }
}

/// The pipeline's adaptive parameters. Owned exclusively by the controller;
/// exposed to queries only as immutable snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveParameters {
    /// Fusion weight per strategy. Invariant: sums to 1 within
    /// [`WEIGHT_EPSILON`].
    pub weights: HashMap<String, f32>,
    /// Bandit arm states keyed by arm name.
    pub bandit: HashMap<String, ArmState>,
    /// Effective gate thresholds keyed by dependency name.
    pub gate_thresholds: HashMap<String, GateThresholds>,
}

impl AdaptiveParameters {
    /// Build the startup parameters: uniform weights over the given
    /// strategies, uniform bandit priors over the configured arms, gate
    /// defaults for the given dependencies.
    pub fn initial(
        strategies: &[String],
        learning: &LearningConfig,
        gate_defaults: GateThresholds,
        dependencies: &[String],
    ) -> Self {
        let mut weights = HashMap::new();
        if !strategies.is_empty() {
            let uniform = 1.0 / strategies.len() as f32;
            for name in strategies {
                weights.insert(name.clone(), uniform);
            }
        }

        let bandit = learning
            .arms
            .iter()
            .map(|arm: &MixArm| (arm.name.clone(), ArmState::default()))
            .collect();

        let gate_thresholds = dependencies
            .iter()
            .map(|name| (name.clone(), gate_defaults))
            .collect();

        Self {
            weights,
            bandit,
            gate_thresholds,
        }
    }

    /// Validate the snapshot invariants.
    pub fn validate(&self) -> Result<()> {
        if self.weights.is_empty() {
            return Err(RemoraError::invalid_parameters("no fusion weights"));
        }

        let mut sum = 0.0f32;
        for (name, weight) in &self.weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(RemoraError::invalid_parameters(format!(
                    "weight for '{name}' is not a non-negative finite number"
                )));
            }
            sum += weight;
        }
        if (sum - 1.0).abs() > WEIGHT_EPSILON {
            return Err(RemoraError::invalid_parameters(format!(
                "weights sum to {sum}, expected 1"
            )));
        }

        for (name, arm) in &self.bandit {
            if !(arm.alpha.is_finite() && arm.beta.is_finite()) || arm.alpha <= 0.0 || arm.beta <= 0.0
            {
                return Err(RemoraError::invalid_parameters(format!(
                    "bandit arm '{name}' has invalid parameters"
                )));
            }
        }

        for (name, thresholds) in &self.gate_thresholds {
            if thresholds.failure_threshold == 0
                || thresholds.success_threshold == 0
                || thresholds.timeout_ms == 0
            {
                return Err(RemoraError::invalid_parameters(format!(
                    "gate thresholds for '{name}' contain zeros"
                )));
            }
        }

        Ok(())
    }

    /// Renormalize weights so they sum to 1. No-op on an all-zero vector.
    pub fn renormalize_weights(&mut self) {
        let sum: f32 = self.weights.values().sum();
        if sum > 0.0 {
            for weight in self.weights.values_mut() {
                *weight /= sum;
            }
        }
    }
}

/// Counters describing the learning pipeline, exposed for status reporting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningStats {
    /// Feedback events received.
    pub total_feedback: u64,
    /// Positive feedback events.
    pub positive_feedback: u64,
    /// Negative feedback events.
    pub negative_feedback: u64,
    /// Feedback dropped because it could not be attributed.
    pub dropped_malformed: u64,
    /// Performance events received.
    pub performance_events: u64,
    /// Successful snapshot publications.
    pub snapshots_published: u64,
    /// Candidate snapshots rejected by validation.
    pub snapshots_rejected: u64,
    /// Gate threshold adaptations applied.
    pub threshold_adaptations: u64,
    /// Time of the most recent publication.
    pub last_publication: Option<DateTime<Utc>>,
}

/// Shared holder for the current parameter snapshot.
///
/// Readers call [`SnapshotStore::load`] and get an `Arc` that stays valid for
/// the whole query regardless of later publications. Only the controller
/// calls [`SnapshotStore::store`].
#[derive(Debug)]
pub struct SnapshotStore {
    current: RwLock<Arc<AdaptiveParameters>>,
}

impl SnapshotStore {
    /// Create a store with an initial snapshot.
    pub fn new(initial: AdaptiveParameters) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// Current snapshot.
    pub fn load(&self) -> Arc<AdaptiveParameters> {
        self.current.read().clone()
    }

    /// Publish a replacement snapshot.
    pub fn store(&self, next: Arc<AdaptiveParameters>) {
        *self.current.write() = next;
    }
}
