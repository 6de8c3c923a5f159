//! Embedding nearest-neighbor strategy.
//!
//! Documents are embedded once at index time and the query once per search,
//! both through the embedding provider's resilience gate with a per-call
//! timeout. Similarity is cosine over the stored vectors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{ScoredCandidate, SearchStrategy, assign_ranks};
use crate::config::{VectorConfig, strategy_names};
use crate::document::{Document, EmbeddingProvider};
use crate::error::{RemoraError, Result};
use crate::gate::CircuitBreaker;

/// Cosine similarity of two vectors. Zero when dimensions differ or either
/// vector is all-zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 0.0 { dot / denom } else { 0.0 }
}

/// [`SearchStrategy`] scoring stored document embeddings against the query
/// embedding.
pub struct VectorStrategy {
    config: VectorConfig,
    provider: Arc<dyn EmbeddingProvider>,
    breaker: Arc<CircuitBreaker>,
    vectors: RwLock<HashMap<String, Vec<f32>>>,
}

impl VectorStrategy {
    /// Create a strategy over the given provider, gated by `breaker`.
    pub fn new(
        config: VectorConfig,
        provider: Arc<dyn EmbeddingProvider>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            config,
            provider,
            breaker,
            vectors: RwLock::new(HashMap::new()),
        }
    }

    /// Embed `text` through the gate with the configured per-call timeout.
    async fn gated_embed(&self, text: &str) -> Result<Vec<f32>> {
        let timeout = Duration::from_millis(self.config.call_timeout_ms);
        let provider = self.provider.clone();
        let text = text.to_string();
        self.breaker
            .call(async move {
                match tokio::time::timeout(timeout, provider.embed(&text)).await {
                    Ok(result) => result,
                    Err(_) => Err(RemoraError::timeout(format!(
                        "embed call exceeded {}ms",
                        timeout.as_millis()
                    ))),
                }
            })
            .await
    }

    /// Rebuild the vector store from a document set. Replaces any previous
    /// content. Individual embedding failures are skipped; an open gate
    /// aborts the rebuild early with whatever was already embedded.
    pub async fn index_documents(&self, documents: &[Document]) -> usize {
        let mut embedded: HashMap<String, Vec<f32>> = HashMap::new();

        for doc in documents {
            let text = if doc.title.is_empty() {
                doc.text.clone()
            } else {
                format!("{} {}", doc.title, doc.text)
            };
            match self.gated_embed(&text).await {
                Ok(vector) => {
                    embedded.insert(doc.id.clone(), vector);
                }
                Err(RemoraError::GateOpen { .. }) => {
                    log::warn!(
                        "embedding gate open, stopping vector indexing after {} of {} documents",
                        embedded.len(),
                        documents.len()
                    );
                    break;
                }
                Err(error) => {
                    log::warn!("skipping document '{}' during vector indexing: {error}", doc.id);
                }
            }
        }

        let count = embedded.len();
        *self.vectors.write() = embedded;
        log::info!("vector index rebuilt with {count} embeddings");
        count
    }

    /// Number of stored embeddings.
    pub fn vector_count(&self) -> usize {
        self.vectors.read().len()
    }
}

#[async_trait]
impl SearchStrategy for VectorStrategy {
    fn name(&self) -> &str {
        strategy_names::SEMANTIC
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredCandidate>> {
        let query_vector = self.gated_embed(query).await?;

        let vectors = self.vectors.read();
        let mut candidates: Vec<ScoredCandidate> = vectors
            .iter()
            .filter_map(|(doc_id, vector)| {
                let similarity = cosine_similarity(&query_vector, vector);
                if similarity >= self.config.min_similarity {
                    Some(ScoredCandidate::new(
                        doc_id.as_str(),
                        similarity,
                        0,
                        strategy_names::SEMANTIC,
                    ))
                } else {
                    None
                }
            })
            .collect();
        drop(vectors);

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
