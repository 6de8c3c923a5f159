//! Weighted Reciprocal Rank Fusion.
//!
//! Per-strategy ranked lists are merged with
//! `fused(doc) = sum_s weight[s] * 1 / (k + rank_s(doc))`, where a strategy
//! that did not return the document contributes nothing. Ordering is fully
//! deterministic: exact score ties fall back to the raw score in the
//! document's highest-weighted contributing strategy, then to ascending
//! document id. The same inputs always produce the same output, regardless
//! of the order the per-strategy lists arrived in.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::FusionConfig;
use crate::strategy::ScoredCandidate;

/// A fused result for one document. Produced once per query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedResult {
    /// Document identifier.
    pub doc_id: String,
    /// Weighted RRF score, possibly adjusted later by the reranker.
    pub fused_score: f32,
    /// 1-based rank per contributing strategy.
    pub contributing_ranks: HashMap<String, usize>,
    /// Per-factor reranker contributions, filled by the reranker.
    pub rerank_factors: HashMap<String, f32>,
}

/// Weighted RRF merger.
#[derive(Debug, Clone)]
pub struct RankFusion {
    config: FusionConfig,
}

impl RankFusion {
    /// Create a merger with the given configuration.
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    /// The RRF term `1 / (k + rank)` for a 1-based rank.
    fn rrf_term(&self, rank: usize) -> f32 {
        1.0 / (self.config.rrf_k + rank as f32)
    }

    /// Merge per-strategy lists under a fusion weight snapshot.
    pub fn fuse(
        &self,
        lists: &HashMap<String, Vec<ScoredCandidate>>,
        weights: &HashMap<String, f32>,
    ) -> Vec<FusedResult> {
        struct Accumulated {
            fused_score: f32,
            contributing_ranks: HashMap<String, usize>,
            raw_scores: HashMap<String, f32>,
        }

        let mut accumulated: HashMap<String, Accumulated> = HashMap::new();

        for (strategy, candidates) in lists {
            let weight = *weights.get(strategy).unwrap_or(&0.0);
            for candidate in candidates {
                let entry = accumulated
                    .entry(candidate.doc_id.clone())
                    .or_insert_with(|| Accumulated {
                        fused_score: 0.0,
                        contributing_ranks: HashMap::new(),
                        raw_scores: HashMap::new(),
                    });
                entry.fused_score += weight * self.rrf_term(candidate.rank);
                entry.contributing_ranks.insert(strategy.clone(), candidate.rank);
                entry.raw_scores.insert(strategy.clone(), candidate.raw_score);
            }
        }

        let mut fused: Vec<(FusedResult, f32)> = accumulated
            .into_iter()
            .map(|(doc_id, acc)| {
                let tie_break = reference_raw_score(&acc.raw_scores, weights);
                (
                    FusedResult {
                        doc_id,
                        fused_score: acc.fused_score,
                        contributing_ranks: acc.contributing_ranks,
                        rerank_factors: HashMap::new(),
                    },
                    tie_break,
                )
            })
            .collect();

        fused.sort_by(|(a, tie_a), (b, tie_b)| {
            b.fused_score
                .partial_cmp(&a.fused_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    tie_b
                        .partial_cmp(tie_a)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });

        fused.into_iter().map(|(result, _)| result).collect()
    }

    /// Each contributing strategy's share of one result's fused score,
    /// used for feedback credit attribution.
    pub fn contribution_shares(
        &self,
        result: &FusedResult,
        weights: &HashMap<String, f32>,
    ) -> HashMap<String, f32> {
        if result.fused_score <= 0.0 {
            return HashMap::new();
        }
        result
            .contributing_ranks
            .iter()
            .map(|(strategy, rank)| {
                let weight = *weights.get(strategy).unwrap_or(&0.0);
                let share = weight * self.rrf_term(*rank) / result.fused_score;
                (strategy.clone(), share)
            })
            .collect()
    }
}

/// Raw score of the document's highest-weighted contributing strategy.
/// Weight ties break on strategy name so the reference is deterministic.
fn reference_raw_score(
    raw_scores: &HashMap<String, f32>,
    weights: &HashMap<String, f32>,
) -> f32 {
    let mut best: Option<(&String, f32)> = None;
    for (strategy, _) in raw_scores {
        let weight = *weights.get(strategy).unwrap_or(&0.0);
        let better = match best {
            None => true,
            Some((best_name, best_weight)) => {
                weight > best_weight || (weight == best_weight && strategy < best_name)
            }
        };
        if better {
            best = Some((strategy, weight));
        }
    }
    best.and_then(|(strategy, _)| raw_scores.get(strategy).copied())
        .unwrap_or(0.0)
}
