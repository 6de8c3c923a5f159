//! BM25 lexical index and strategy.
//!
//! The lexical index is local and in-process, so unlike the vector and graph
//! strategies it does not pass through a resilience gate. Scoring follows
//! the plus-one IDF variant: `idf = ln((N - df + 0.5) / (df + 0.5) + 1)`,
//! which keeps IDF non-negative for terms present in most documents.

use ahash::AHashMap;
use async_trait::async_trait;
use lazy_static::lazy_static;
use parking_lot::RwLock;
use regex::Regex;

use super::{ScoredCandidate, SearchStrategy, assign_ranks};
use crate::config::{LexicalConfig, strategy_names};
use crate::document::Document;
use crate::error::Result;

lazy_static! {
    static ref TOKEN_RE: Regex = Regex::new(r"[a-z0-9]+").expect("static token pattern");
}

/// Lowercase alphanumeric tokenizer. Tokens of one or two characters are
/// dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    TOKEN_RE
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .filter(|t| t.len() > 2)
        .collect()
}

#[derive(Debug, Default)]
struct IndexState {
    /// Per-document term frequencies.
    term_counts: AHashMap<String, AHashMap<String, u32>>,
    /// Per-document token counts.
    doc_lengths: AHashMap<String, usize>,
    /// Number of documents containing each term.
    doc_freqs: AHashMap<String, u32>,
    /// Precomputed IDF per term.
    idf: AHashMap<String, f32>,
    avg_doc_length: f32,
    num_docs: usize,
}

/// In-memory BM25 index over document bodies.
#[derive(Debug)]
pub struct LexicalIndex {
    config: LexicalConfig,
    state: RwLock<IndexState>,
}

impl LexicalIndex {
    /// Create an empty index.
    pub fn new(config: LexicalConfig) -> Self {
        Self {
            config,
            state: RwLock::new(IndexState::default()),
        }
    }

    /// Rebuild the index from a document set. Replaces any previous content.
    pub fn index_documents(&self, documents: &[Document]) {
        let mut state = IndexState {
            num_docs: documents.len(),
            ..IndexState::default()
        };

        for doc in documents {
            let tokens = tokenize(&doc.text);
            state.doc_lengths.insert(doc.id.clone(), tokens.len());

            let mut counts: AHashMap<String, u32> = AHashMap::new();
            for token in tokens {
                *counts.entry(token).or_insert(0) += 1;
            }
            for term in counts.keys() {
                *state.doc_freqs.entry(term.clone()).or_insert(0) += 1;
            }
            state.term_counts.insert(doc.id.clone(), counts);
        }

        if !state.doc_lengths.is_empty() {
            state.avg_doc_length = state.doc_lengths.values().sum::<usize>() as f32
                / state.doc_lengths.len() as f32;
        }

        let num_docs = state.num_docs as f32;
        for (term, df) in &state.doc_freqs {
            let df = *df as f32;
            let idf = ((num_docs - df + 0.5) / (df + 0.5) + 1.0).ln();
            state.idf.insert(term.clone(), idf);
        }

        log::info!(
            "BM25 indexed {} documents with {} unique terms",
            state.num_docs,
            state.idf.len()
        );

        *self.state.write() = state;
    }

    /// BM25 score of one document for a tokenized query.
    fn score_doc(&self, state: &IndexState, doc_id: &str, query_terms: &[String]) -> f32 {
        let Some(counts) = state.term_counts.get(doc_id) else {
            return 0.0;
        };
        let doc_length = *state.doc_lengths.get(doc_id).unwrap_or(&0) as f32;
        let avg_len = state.avg_doc_length.max(1.0);

        let mut score = 0.0;
        for term in query_terms {
            if let Some(&tf) = counts.get(term) {
                let tf = tf as f32;
                let idf = *state.idf.get(term).unwrap_or(&0.0);
                let numerator = tf * (self.config.k1 + 1.0);
                let denominator =
                    tf + self.config.k1 * (1.0 - self.config.b + self.config.b * (doc_length / avg_len));
                score += idf * (numerator / denominator);
            }
        }
        score
    }

    /// Top-`k` documents for a query, sorted by descending BM25 score with
    /// ascending doc id as the tie-break.
    pub fn search(&self, query: &str, k: usize) -> Vec<ScoredCandidate> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return Vec::new();
        }

        let state = self.state.read();
        let mut candidates: Vec<ScoredCandidate> = state
            .term_counts
            .keys()
            .filter_map(|doc_id| {
                let score = self.score_doc(&state, doc_id, &query_terms);
                if score > 0.0 {
                    Some(ScoredCandidate::new(
                        doc_id.as_str(),
                        score,
                        0,
                        strategy_names::LEXICAL,
                    ))
                } else {
                    None
                }
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
        candidates
    }

    /// Number of indexed documents.
    pub fn doc_count(&self) -> usize {
        self.state.read().num_docs
    }

    /// Number of distinct indexed terms.
    pub fn term_count(&self) -> usize {
        self.state.read().idf.len()
    }
}

/// [`SearchStrategy`] adapter over a shared [`LexicalIndex`].
pub struct LexicalStrategy {
    index: std::sync::Arc<LexicalIndex>,
}

impl LexicalStrategy {
    /// Create a strategy over an existing index.
    pub fn new(index: std::sync::Arc<LexicalIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl SearchStrategy for LexicalStrategy {
    fn name(&self) -> &str {
        strategy_names::LEXICAL
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredCandidate>> {
        Ok(self.index.search(query, k))
    }
}
