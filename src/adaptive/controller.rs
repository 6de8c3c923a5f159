//! The single-writer online learning controller.
//!
//! One tokio task owns all mutable learning state. Events arrive over a
//! crossbeam channel (feedback, performance measurements, per-query
//! attributions) and are drained on a fixed tick. Each tick may update
//! fusion weights, bandit posteriors, and gate thresholds, then publish a
//! fresh validated [`AdaptiveParameters`] snapshot. Invalid candidate
//! snapshots are rejected and the previous snapshot stays live.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::Receiver;
use parking_lot::RwLock;
use tokio::time::MissedTickBehavior;

use super::{
    AdaptiveParameters, ControllerEvent, FeedbackEvent, FeedbackLabel, LearningStats,
    PerformanceEvent, QueryAttribution, SnapshotStore,
};
use crate::config::LearningConfig;
use crate::gate::{GateRegistry, GateThresholds};

/// Relative failure-rate increase that triggers threshold tightening.
const FAILURE_TREND_MARGIN: f64 = 0.1;

/// Latency growth factor that triggers threshold loosening when the
/// failure rate stays stable.
const LATENCY_TREND_FACTOR: f64 = 1.5;

/// Handle to a spawned controller task.
pub struct ControllerHandle {
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
}

impl ControllerHandle {
    /// Request shutdown and wait for the final drain and publication.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
    }
}

/// Owns the learning state and applies adaptation on every tick.
pub struct AdaptiveController {
    config: LearningConfig,
    snapshots: Arc<SnapshotStore>,
    gates: Arc<GateRegistry>,
    stats: Arc<RwLock<LearningStats>>,
    receiver: Receiver<ControllerEvent>,
    /// Working copy of the published parameters.
    params: AdaptiveParameters,
    /// Per-dependency sliding performance windows.
    windows: HashMap<String, VecDeque<PerformanceEvent>>,
    /// Attributions awaiting feedback, keyed by query id.
    attributions: HashMap<String, QueryAttribution>,
    /// FIFO eviction order for attributions.
    attribution_order: VecDeque<String>,
    dirty: bool,
}

impl AdaptiveController {
    /// Create a controller seeded from the store's current snapshot.
    pub fn new(
        config: LearningConfig,
        snapshots: Arc<SnapshotStore>,
        gates: Arc<GateRegistry>,
        receiver: Receiver<ControllerEvent>,
        stats: Arc<RwLock<LearningStats>>,
    ) -> Self {
        let params = (*snapshots.load()).clone();
        Self {
            config,
            snapshots,
            gates,
            stats,
            receiver,
            params,
            windows: HashMap::new(),
            attributions: HashMap::new(),
            attribution_order: VecDeque::new(),
            dirty: false,
        }
    }

    /// Spawn the controller loop onto the tokio runtime.
    pub fn spawn(mut self) -> ControllerHandle {
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let period = Duration::from_millis(self.config.tick_interval_ms.max(1));
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            log::info!("adaptive controller started (tick every {period:?})");

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        self.run_tick();
                    }
                    _ = &mut shutdown_rx => {
                        // Final drain so late feedback is not lost.
                        self.run_tick();
                        log::info!("adaptive controller stopped");
                        break;
                    }
                }
            }
        });

        ControllerHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    /// One controller tick: drain the channel, adapt, publish.
    fn run_tick(&mut self) {
        for event in self.receiver.try_iter().collect::<Vec<_>>() {
            self.handle_event(event);
        }
        self.adapt_thresholds();
        self.publish_if_dirty();
    }

    fn handle_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::Feedback(feedback) => self.handle_feedback(feedback),
            ControllerEvent::Performance(performance) => self.handle_performance(performance),
            ControllerEvent::Attribution(attribution) => self.handle_attribution(attribution),
        }
    }

    /// Map feedback to a binary outcome. Unlabeled feedback uses the rating
    /// against the configured threshold; feedback with neither is malformed.
    fn resolve_outcome(&self, feedback: &FeedbackEvent) -> Option<bool> {
        match feedback.label {
            Some(FeedbackLabel::Positive) => Some(true),
            Some(FeedbackLabel::Negative) => Some(false),
            None => feedback
                .rating
                .filter(|rating| rating.is_finite() && (0.0..=5.0).contains(rating))
                .map(|rating| rating >= self.config.positive_rating_threshold),
        }
    }

    fn handle_feedback(&mut self, feedback: FeedbackEvent) {
        let Some(positive) = self.resolve_outcome(&feedback) else {
            log::debug!(
                "dropping malformed feedback for query '{}': no label or usable rating",
                feedback.query_id
            );
            self.stats.write().dropped_malformed += 1;
            return;
        };

        let Some(shares) = self
            .attributions
            .get(&feedback.query_id)
            .and_then(|attribution| attribution.contributions.get(&feedback.doc_id))
            .cloned()
        else {
            log::debug!(
                "dropping unattributable feedback for query '{}' doc '{}'",
                feedback.query_id,
                feedback.doc_id
            );
            self.stats.write().dropped_malformed += 1;
            return;
        };

        let target = if positive { 1.0 } else { 0.0 };
        let rate = self.config.learning_rate;
        for (strategy, share) in &shares {
            if let Some(weight) = self.params.weights.get_mut(strategy) {
                *weight += rate * share * (target - *weight);
            }
        }
        self.params.renormalize_weights();

        if let Some(arm_name) = self
            .attributions
            .get(&feedback.query_id)
            .and_then(|attribution| attribution.arm.clone())
            && let Some(arm) = self.params.bandit.get_mut(&arm_name)
        {
            arm.observe(positive);
        }

        let mut stats = self.stats.write();
        stats.total_feedback += 1;
        if positive {
            stats.positive_feedback += 1;
        } else {
            stats.negative_feedback += 1;
        }
        drop(stats);

        self.dirty = true;
    }

    fn handle_performance(&mut self, performance: PerformanceEvent) {
        let window = self.windows.entry(performance.strategy.clone()).or_default();
        window.push_back(performance);
        while window.len() > self.config.performance_window {
            window.pop_front();
        }
        self.stats.write().performance_events += 1;
    }

    fn handle_attribution(&mut self, attribution: QueryAttribution) {
        let query_id = attribution.query_id.clone();
        if self.attributions.insert(query_id.clone(), attribution).is_none() {
            self.attribution_order.push_back(query_id);
        }
        while self.attribution_order.len() > self.config.max_attributions {
            if let Some(evicted) = self.attribution_order.pop_front() {
                self.attributions.remove(&evicted);
            }
        }
    }

    /// Retune gate thresholds per dependency from its performance window.
    ///
    /// The window splits into an older and a recent half. A rising failure
    /// rate tightens the gate (fewer failures to open, shorter cooldown); a
    /// latency climb with a stable failure rate loosens it. Consumed halves
    /// are discarded so one trend adapts at most once.
    fn adapt_thresholds(&mut self) {
        let dependencies: Vec<String> = self.windows.keys().cloned().collect();
        for name in dependencies {
            // Windows are also keyed by strategy for attribution purposes.
            // Only keys with a registered gate have thresholds to retune;
            // adapting the rest would mint breakers for ungated callers.
            let Some(breaker) = self.gates.get(&name) else {
                continue;
            };

            let window = &self.windows[&name];
            if window.len() < self.config.adaptation_min_samples.max(4) {
                continue;
            }

            let mid = window.len() / 2;
            let older = window.iter().take(mid);
            let recent = window.iter().skip(mid);
            let (older_failure, older_latency) = summarize(older);
            let (recent_failure, recent_latency) = summarize(recent);

            let current = self
                .params
                .gate_thresholds
                .get(&name)
                .copied()
                .unwrap_or_else(|| breaker.thresholds());

            let retuned = if recent_failure > older_failure + FAILURE_TREND_MARGIN {
                Some(GateThresholds {
                    failure_threshold: current.failure_threshold.saturating_sub(1).max(1),
                    timeout_ms: ((current.timeout_ms as f64) * 0.8) as u64,
                    success_threshold: current.success_threshold,
                })
            } else if recent_latency > older_latency * LATENCY_TREND_FACTOR
                && recent_failure <= older_failure + FAILURE_TREND_MARGIN / 2.0
            {
                Some(GateThresholds {
                    failure_threshold: current.failure_threshold.saturating_add(1),
                    timeout_ms: ((current.timeout_ms as f64) * 1.25) as u64,
                    success_threshold: current.success_threshold,
                })
            } else {
                None
            };

            // Drop the older half so the same samples never adapt twice.
            if let Some(window) = self.windows.get_mut(&name) {
                window.drain(..mid);
            }

            if let Some(candidate) = retuned {
                let applied = self.gates.apply_thresholds(&name, candidate);
                if applied != current {
                    log::info!(
                        "gate '{name}' retuned: failures {} -> {}, cooldown {}ms -> {}ms",
                        current.failure_threshold,
                        applied.failure_threshold,
                        current.timeout_ms,
                        applied.timeout_ms
                    );
                    self.params.gate_thresholds.insert(name, applied);
                    self.stats.write().threshold_adaptations += 1;
                    self.dirty = true;
                }
            }
        }
    }

    /// Validate and publish the working parameters if anything changed.
    fn publish_if_dirty(&mut self) {
        if !self.dirty {
            return;
        }
        self.dirty = false;

        match self.params.validate() {
            Ok(()) => {
                self.snapshots.store(Arc::new(self.params.clone()));
                let mut stats = self.stats.write();
                stats.snapshots_published += 1;
                stats.last_publication = Some(Utc::now());
            }
            Err(err) => {
                log::warn!("rejecting parameter snapshot: {err}");
                // Fall back to the last good snapshot.
                self.params = (*self.snapshots.load()).clone();
                self.stats.write().snapshots_rejected += 1;
            }
        }
    }
}

/// Failure rate and mean latency of an event slice.
fn summarize<'a, I: Iterator<Item = &'a PerformanceEvent>>(events: I) -> (f64, f64) {
    let mut total = 0usize;
    let mut failures = 0usize;
    let mut latency_sum = 0u64;
    for event in events {
        total += 1;
        if !event.success {
            failures += 1;
        }
        latency_sum += event.latency_ms;
    }
    if total == 0 {
        return (0.0, 0.0);
    }
    (
        failures as f64 / total as f64,
        latency_sum as f64 / total as f64,
    )
}
