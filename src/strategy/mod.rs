//! Retrieval strategies.
//!
//! Every index is modeled as the same capability: given a query and a limit,
//! produce an ordered list of [`ScoredCandidate`]s. Strategies are registered
//! by name in a [`StrategyRegistry`]; fusion only ever sees the registry, so
//! adding a strategy never touches the fusion code.

pub mod graph;
pub mod lexical;
pub mod vector;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use graph::GraphStrategy;
pub use lexical::{LexicalIndex, LexicalStrategy};
pub use vector::VectorStrategy;

/// A candidate produced by one strategy for one query. Ephemeral; owned by
/// the query call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCandidate {
    /// Document identifier.
    pub doc_id: String,
    /// Raw, strategy-local score. Not comparable across strategies.
    pub raw_score: f32,
    /// 1-based rank within the producing strategy's list.
    pub rank: usize,
    /// Name of the producing strategy.
    pub strategy: String,
}

impl ScoredCandidate {
    /// Create a new candidate.
    pub fn new<S: Into<String>>(doc_id: S, raw_score: f32, rank: usize, strategy: S) -> Self {
        Self {
            doc_id: doc_id.into(),
            raw_score,
            rank,
            strategy: strategy.into(),
        }
    }
}

/// Assign 1-based ranks to an already score-sorted candidate list.
pub(crate) fn assign_ranks(candidates: &mut [ScoredCandidate]) {
    for (index, candidate) in candidates.iter_mut().enumerate() {
        candidate.rank = index + 1;
    }
}

/// A retrieval strategy: deterministic ranked lookup given fixed index
/// content.
#[async_trait]
pub trait SearchStrategy: Send + Sync {
    /// Name under which the strategy is registered.
    fn name(&self) -> &str;

    /// Search for the top `k` candidates. The returned list is sorted by
    /// descending raw score with ranks already assigned, and has length <= k.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredCandidate>>;
}

/// Registry of strategies keyed by name.
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn SearchStrategy>>,
}

impl StrategyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a strategy under its own name. Replaces any previous
    /// registration with the same name.
    pub fn register(&mut self, strategy: Arc<dyn SearchStrategy>) {
        self.strategies.insert(strategy.name().to_string(), strategy);
    }

    /// Look up a strategy by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn SearchStrategy>> {
        self.strategies.get(name).cloned()
    }

    /// Registered strategy names, sorted for deterministic iteration.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.strategies.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered strategies.
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
