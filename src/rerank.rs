//! Deterministic secondary ranking signals.
//!
//! The reranker applies bounded adjustments on top of fused scores:
//! exact-phrase and title-match bonuses, exponential recency decay, and a
//! length-outlier penalty. The combined adjustment is clamped, and the final
//! reorder limits every candidate to a configured number of positions of
//! movement within the rerank window, so no single heuristic can dominate
//! the ranking. Per-factor contributions are retained for explainability.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::config::RerankConfig;
use crate::document::Document;
use crate::fusion::FusedResult;
use crate::strategy::lexical::tokenize;

/// Factor names recorded in [`FusedResult::rerank_factors`].
pub mod factor_names {
    /// Whole-query verbatim match in the body.
    pub const EXACT_PHRASE: &str = "exact_phrase";
    /// Query term present in the title.
    pub const TITLE_MATCH: &str = "title_match";
    /// Exponentially decayed recency bonus.
    pub const RECENCY: &str = "recency";
    /// Length bonus/penalty.
    pub const LENGTH: &str = "length";
    /// Final clamped adjustment applied to the fused score.
    pub const ADJUSTMENT: &str = "adjustment";
}

/// Deterministic reranker over fused results.
#[derive(Debug, Clone)]
pub struct Reranker {
    config: RerankConfig,
}

impl Reranker {
    /// Create a reranker with the given configuration.
    pub fn new(config: RerankConfig) -> Self {
        Self { config }
    }

    /// Adjust and reorder `results` in place.
    ///
    /// Only the first `window` candidates are touched; documents missing
    /// from `documents` receive no adjustment. `now` anchors the recency
    /// decay so tests can pin it.
    pub fn rerank(
        &self,
        query: &str,
        results: &mut Vec<FusedResult>,
        documents: &HashMap<String, Document>,
        now: DateTime<Utc>,
    ) {
        if results.len() < 2 {
            if let Some(result) = results.first_mut() {
                if let Some(doc) = documents.get(&result.doc_id) {
                    self.adjust(query, result, doc, now);
                }
            }
            return;
        }

        let window = self.config.window.min(results.len());

        for result in results.iter_mut().take(window) {
            if let Some(doc) = documents.get(&result.doc_id) {
                self.adjust(query, result, doc, now);
            }
        }

        let reordered = self.bounded_reorder(&results[..window]);
        let tail = results.split_off(window);
        let head = std::mem::take(results);
        let mut merged: Vec<FusedResult> = reordered
            .into_iter()
            .map(|index| head[index].clone())
            .collect();
        merged.extend(tail);
        *results = merged;
    }

    /// Compute and apply the clamped adjustment for one result.
    fn adjust(&self, query: &str, result: &mut FusedResult, doc: &Document, now: DateTime<Utc>) {
        let query_lower = query.to_lowercase();
        let text_lower = doc.text.to_lowercase();
        let title_lower = doc.title.to_lowercase();
        let query_terms = tokenize(query);

        let exact_phrase = if !query_lower.is_empty() && text_lower.contains(&query_lower) {
            self.config.exact_phrase_bonus
        } else {
            0.0
        };

        let title_match = if query_terms.iter().any(|term| title_lower.contains(term)) {
            self.config.title_match_bonus
        } else {
            0.0
        };

        let age_days = (now - doc.created_at).num_seconds().max(0) as f32 / 86_400.0;
        let recency =
            self.config.recency_bonus * (-age_days / self.config.recency_half_life_days).exp();

        let length = if doc.text.len() < self.config.short_doc_chars {
            self.config.short_doc_bonus
        } else if doc.text.len() > self.config.long_doc_chars {
            -self.config.long_doc_penalty
        } else {
            0.0
        };

        let adjustment = (exact_phrase + title_match + recency + length)
            .clamp(self.config.min_adjustment, self.config.max_adjustment);

        result.rerank_factors.insert(factor_names::EXACT_PHRASE.to_string(), exact_phrase);
        result.rerank_factors.insert(factor_names::TITLE_MATCH.to_string(), title_match);
        result.rerank_factors.insert(factor_names::RECENCY.to_string(), recency);
        result.rerank_factors.insert(factor_names::LENGTH.to_string(), length);
        result.rerank_factors.insert(factor_names::ADJUSTMENT.to_string(), adjustment);

        result.fused_score *= 1.0 + adjustment;
    }

    /// Order the window by adjusted score while limiting every candidate to
    /// `max_position_shift` positions of movement from its pre-rerank slot.
    ///
    /// Greedy and deterministic: at each output slot, a candidate that has
    /// fallen the maximum allowed distance is placed first; otherwise the
    /// best-scored candidate eligible to move up into the slot wins, with
    /// original position as the tie-break.
    fn bounded_reorder(&self, window: &[FusedResult]) -> Vec<usize> {
        let shift = self.config.max_position_shift;
        let n = window.len();
        let mut remaining: Vec<usize> = (0..n).collect();
        let mut order = Vec::with_capacity(n);

        for slot in 0..n {
            // A candidate at original position `slot - shift` cannot fall
            // any further; it must be placed now.
            let forced = remaining
                .iter()
                .position(|&orig| slot >= shift && orig <= slot - shift);

            let pick = match forced {
                Some(position) => position,
                None => {
                    let mut best: Option<usize> = None;
                    for (position, &orig) in remaining.iter().enumerate() {
                        if orig > slot + shift {
                            continue; // would move up too far
                        }
                        best = match best {
                            None => Some(position),
                            Some(current) => {
                                let current_orig = remaining[current];
                                let better = window[orig]
                                    .fused_score
                                    .partial_cmp(&window[current_orig].fused_score)
                                    .unwrap_or(std::cmp::Ordering::Equal);
                                if better == std::cmp::Ordering::Greater {
                                    Some(position)
                                } else {
                                    Some(current)
                                }
                            }
                        };
                    }
                    // Eligible set is never empty: the candidate at `slot`
                    // itself always qualifies.
                    best.unwrap_or(0)
                }
            };

            order.push(remaining.remove(pick));
        }

        order
    }
}
