//! Configuration for the retrieval pipeline.
//!
//! [`RemoraConfig`] aggregates the per-component configurations. Everything
//! here is a tunable default; the adaptive controller moves fusion weights
//! and gate thresholds at runtime within the bounds declared below.

use serde::{Deserialize, Serialize};

use crate::error::{RemoraError, Result};

/// Well-known strategy names used by the built-in indices.
pub mod strategy_names {
    /// BM25 lexical strategy.
    pub const LEXICAL: &str = "lexical";
    /// Embedding nearest-neighbor strategy.
    pub const SEMANTIC: &str = "semantic";
    /// Relationship-graph strategy.
    pub const GRAPH: &str = "graph";
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoraConfig {
    /// Lexical (BM25) index configuration.
    pub lexical: LexicalConfig,
    /// Vector strategy configuration.
    pub vector: VectorConfig,
    /// Graph strategy configuration.
    pub graph: GraphConfig,
    /// Rank fusion configuration.
    pub fusion: FusionConfig,
    /// Reranker configuration.
    pub rerank: RerankConfig,
    /// Resilience gate defaults and adaptation bounds.
    pub gates: GateConfig,
    /// Online learning configuration.
    pub learning: LearningConfig,
    /// Facade-level search configuration.
    pub search: SearchConfig,
}

impl RemoraConfig {
    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.fusion.rrf_k <= 0.0 {
            return Err(RemoraError::config("fusion.rrf_k must be positive"));
        }
        if self.search.max_query_len == 0 {
            return Err(RemoraError::config("search.max_query_len must be positive"));
        }
        if self.gates.failure_threshold == 0 || self.gates.success_threshold == 0 {
            return Err(RemoraError::config("gate thresholds must be positive"));
        }
        if !(0.0..=1.0).contains(&self.learning.learning_rate) {
            return Err(RemoraError::config("learning.learning_rate must be in [0, 1]"));
        }
        Ok(())
    }
}

/// BM25 parameters for the lexical index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexicalConfig {
    /// Term frequency saturation parameter.
    pub k1: f32,
    /// Length normalization parameter.
    pub b: f32,
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

/// Vector strategy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    /// Minimum cosine similarity for a candidate to be returned.
    pub min_similarity: f32,
    /// Per-call timeout for the embedding provider, in milliseconds.
    pub call_timeout_ms: u64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            min_similarity: 0.1,
            call_timeout_ms: 2_000,
        }
    }
}

/// Graph strategy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Number of lexical seed documents to expand from.
    pub seed_count: usize,
    /// Maximum traversal depth.
    pub max_depth: usize,
    /// Score decay applied per hop.
    pub hop_decay: f32,
    /// Per-call timeout for the graph store, in milliseconds.
    pub call_timeout_ms: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            seed_count: 3,
            max_depth: 2,
            hop_decay: 0.5,
            call_timeout_ms: 2_000,
        }
    }
}

/// Rank fusion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    /// RRF smoothing constant `k` in `1 / (k + rank)`. Typically 60.
    pub rrf_k: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self { rrf_k: 60.0 }
    }
}

/// Reranker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankConfig {
    /// Bonus when the whole query appears verbatim in the body.
    pub exact_phrase_bonus: f32,
    /// Bonus when any query term appears in the title.
    pub title_match_bonus: f32,
    /// Maximum recency bonus, decayed exponentially with age.
    pub recency_bonus: f32,
    /// Half-life of the recency decay, in days.
    pub recency_half_life_days: f32,
    /// Bonus for concise documents (shorter than `short_doc_chars`).
    pub short_doc_bonus: f32,
    /// Penalty for outlier-long documents (longer than `long_doc_chars`).
    pub long_doc_penalty: f32,
    /// Character count below which a document is considered concise.
    pub short_doc_chars: usize,
    /// Character count above which a document is considered an outlier.
    pub long_doc_chars: usize,
    /// Lower clamp on the combined adjustment.
    pub min_adjustment: f32,
    /// Upper clamp on the combined adjustment.
    pub max_adjustment: f32,
    /// Maximum number of positions any candidate may move.
    pub max_position_shift: usize,
    /// Number of top candidates the reranker is allowed to touch.
    pub window: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            exact_phrase_bonus: 0.3,
            title_match_bonus: 0.2,
            recency_bonus: 0.15,
            recency_half_life_days: 30.0,
            short_doc_bonus: 0.1,
            long_doc_penalty: 0.1,
            short_doc_chars: 500,
            long_doc_chars: 2_000,
            min_adjustment: -0.3,
            max_adjustment: 0.5,
            max_position_shift: 3,
            window: 50,
        }
    }
}

/// Resilience gate defaults plus the bounds the adaptive controller must
/// respect when retuning thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Consecutive failures before a gate opens.
    pub failure_threshold: u32,
    /// Cooldown before an open gate probes recovery, in milliseconds.
    pub timeout_ms: u64,
    /// Consecutive half-open successes before a gate closes.
    pub success_threshold: u32,
    /// Maximum concurrent trial calls admitted while half-open.
    pub half_open_max_calls: u32,
    /// Lowest failure threshold adaptation may set.
    pub min_failure_threshold: u32,
    /// Highest failure threshold adaptation may set.
    pub max_failure_threshold: u32,
    /// Shortest cooldown adaptation may set, in milliseconds.
    pub min_timeout_ms: u64,
    /// Longest cooldown adaptation may set, in milliseconds.
    pub max_timeout_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_ms: 60_000,
            success_threshold: 2,
            half_open_max_calls: 3,
            min_failure_threshold: 2,
            max_failure_threshold: 10,
            min_timeout_ms: 5_000,
            max_timeout_ms: 300_000,
        }
    }
}

/// A named strategy mix the bandit can select.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixArm {
    /// Arm name.
    pub name: String,
    /// Strategies dispatched when this arm is selected.
    pub strategies: Vec<String>,
}

impl MixArm {
    /// Create a new arm.
    pub fn new<S: Into<String>>(name: S, strategies: &[&str]) -> Self {
        Self {
            name: name.into(),
            strategies: strategies.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Online learning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Learning rate for fusion weight updates.
    pub learning_rate: f32,
    /// Controller tick interval, in milliseconds.
    pub tick_interval_ms: u64,
    /// Maximum buffered performance events per dependency.
    pub performance_window: usize,
    /// Maximum retained query attributions for feedback joining.
    pub max_attributions: usize,
    /// Performance events required per dependency before thresholds adapt.
    pub adaptation_min_samples: usize,
    /// Rating at or above which feedback without a label counts positive.
    pub positive_rating_threshold: f32,
    /// Strategy mixes available to the bandit. Empty disables the bandit.
    pub arms: Vec<MixArm>,
}

impl Default for LearningConfig {
    fn default() -> Self {
        use strategy_names::{GRAPH, LEXICAL, SEMANTIC};
        Self {
            learning_rate: 0.1,
            tick_interval_ms: 250,
            performance_window: 256,
            max_attributions: 1_024,
            adaptation_min_samples: 20,
            positive_rating_threshold: 3.0,
            arms: vec![
                MixArm::new("all", &[LEXICAL, SEMANTIC, GRAPH]),
                MixArm::new("lexical-semantic", &[LEXICAL, SEMANTIC]),
                MixArm::new("semantic-graph", &[SEMANTIC, GRAPH]),
                MixArm::new("lexical-only", &[LEXICAL]),
            ],
        }
    }
}

/// Facade-level search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Per-query fan-in timeout, in milliseconds.
    pub query_timeout_ms: u64,
    /// Maximum accepted query length in characters.
    pub max_query_len: usize,
    /// Per-strategy overfetch multiplier applied to `k` before fusion.
    pub overfetch: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: 5_000,
            max_query_len: 1_024,
            overfetch: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RemoraConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_values() {
        let config = RemoraConfig::default();
        assert_eq!(config.lexical.k1, 1.5);
        assert_eq!(config.lexical.b, 0.75);
        assert_eq!(config.fusion.rrf_k, 60.0);
        assert_eq!(config.gates.failure_threshold, 5);
        assert_eq!(config.gates.success_threshold, 2);
        assert_eq!(config.rerank.max_position_shift, 3);
        assert_eq!(config.learning.arms.len(), 4);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = RemoraConfig::default();
        config.fusion.rrf_k = 0.0;
        assert!(config.validate().is_err());

        let mut config = RemoraConfig::default();
        config.learning.learning_rate = 1.5;
        assert!(config.validate().is_err());

        let mut config = RemoraConfig::default();
        config.gates.failure_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = RemoraConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: RemoraConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.fusion.rrf_k, config.fusion.rrf_k);
        assert_eq!(back.gates.timeout_ms, config.gates.timeout_ms);
    }
}
