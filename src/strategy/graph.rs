//! Relationship-graph strategy.
//!
//! Seeds from the lexical index's top hits for the query, then walks the
//! external graph store breadth-first, accumulating co-occurrence scores
//! with a per-hop decay. Every store call passes through the graph store's
//! resilience gate; once some scores have been accumulated, a degradable
//! failure ends the walk early instead of failing the strategy.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::lexical::LexicalIndex;
use super::{ScoredCandidate, SearchStrategy, assign_ranks};
use crate::config::{GraphConfig, strategy_names};
use crate::document::GraphStore;
use crate::error::{RemoraError, Result};
use crate::gate::CircuitBreaker;

/// [`SearchStrategy`] scoring documents by graph adjacency to lexical seeds.
pub struct GraphStrategy {
    config: GraphConfig,
    store: Arc<dyn GraphStore>,
    breaker: Arc<CircuitBreaker>,
    lexical: Arc<LexicalIndex>,
}

impl GraphStrategy {
    /// Create a strategy over the given store, gated by `breaker`, seeding
    /// from `lexical`.
    pub fn new(
        config: GraphConfig,
        store: Arc<dyn GraphStore>,
        breaker: Arc<CircuitBreaker>,
        lexical: Arc<LexicalIndex>,
    ) -> Self {
        Self {
            config,
            store,
            breaker,
            lexical,
        }
    }

    async fn gated_neighbors(&self, doc_id: &str) -> Result<HashSet<String>> {
        let timeout = Duration::from_millis(self.config.call_timeout_ms);
        let store = self.store.clone();
        let doc_id = doc_id.to_string();
        self.breaker
            .call(async move {
                match tokio::time::timeout(timeout, store.related_doc_ids(&doc_id, 1)).await {
                    Ok(result) => result,
                    Err(_) => Err(RemoraError::timeout(format!(
                        "related_doc_ids call exceeded {}ms",
                        timeout.as_millis()
                    ))),
                }
            })
            .await
    }
}

#[async_trait]
impl SearchStrategy for GraphStrategy {
    fn name(&self) -> &str {
        strategy_names::GRAPH
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredCandidate>> {
        let seeds = self.lexical.search(query, self.config.seed_count);
        if seeds.is_empty() {
            return Ok(Vec::new());
        }

        let max_seed_score = seeds[0].raw_score.max(f32::EPSILON);
        let mut scores: HashMap<String, f32> = HashMap::new();
        let mut visited: HashSet<String> = seeds.iter().map(|s| s.doc_id.clone()).collect();

        // (doc, weight carried into the next hop)
        let mut frontier: Vec<(String, f32)> = seeds
            .iter()
            .map(|s| (s.doc_id.clone(), s.raw_score / max_seed_score))
            .collect();

        'walk: for _depth in 0..self.config.max_depth {
            let mut next_frontier: Vec<(String, f32)> = Vec::new();

            for (doc_id, weight) in &frontier {
                let neighbors = match self.gated_neighbors(doc_id).await {
                    Ok(neighbors) => neighbors,
                    Err(error) if error.is_degradable() && !scores.is_empty() => {
                        log::warn!("graph walk ended early: {error}");
                        break 'walk;
                    }
                    Err(error) => return Err(error),
                };

                let hop_weight = weight * self.config.hop_decay;
                // Deterministic accumulation order.
                let mut sorted: Vec<&String> = neighbors.iter().collect();
                sorted.sort();
                for neighbor in sorted {
                    *scores.entry(neighbor.clone()).or_insert(0.0) += hop_weight;
                    if visited.insert(neighbor.clone()) {
                        next_frontier.push((neighbor.clone(), hop_weight));
                    }
                }
            }

            if next_frontier.is_empty() {
                break;
            }
            frontier = next_frontier;
        }

        let mut candidates: Vec<ScoredCandidate> = scores
            .into_iter()
            .map(|(doc_id, score)| ScoredCandidate {
                doc_id,
                raw_score: score,
                rank: 0,
                strategy: strategy_names::GRAPH.to_string(),
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        candidates.truncate(k);
        assign_ranks(&mut candidates);
        Ok(candidates)
    }
}
