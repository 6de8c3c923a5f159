//! Documents and the external collaborator traits.
//!
//! Remora does not own documents. The source of truth lives in an external
//! store reached through [`DocumentStore`]; embeddings come from an
//! [`EmbeddingProvider`] and relationships from a [`GraphStore`]. Indices
//! hold derived representations only. Remote providers are always invoked
//! through the resilience gate by their adapters, never directly.
//!
//! In-memory implementations of all three traits are provided for tests and
//! the demo CLI.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A document as seen by the retrieval pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Stable document identifier.
    pub id: String,
    /// Document title.
    #[serde(default)]
    pub title: String,
    /// Full text body.
    pub text: String,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Creation time, used for recency scoring.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Create a new document with the current timestamp.
    pub fn new<S: Into<String>>(id: S, title: S, text: S) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            text: text.into(),
            tags: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Set the tags.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Set the creation time.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Filter for listing documents from a store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentFilter {
    /// Only return documents carrying this tag.
    pub tag: Option<String>,
}

/// External document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// List documents matching the filter.
    async fn list_documents(&self, filter: &DocumentFilter) -> Result<Vec<Document>>;

    /// Fetch a single document, or `None` if it does not exist.
    async fn get_document(&self, id: &str) -> Result<Option<Document>>;
}

/// External embedding provider. Always reached through the resilience gate.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a piece of text into a fixed-dimensional vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Dimensionality of the produced vectors.
    fn dimension(&self) -> usize;
}

/// External graph/relationship store. Always reached through the resilience
/// gate.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Document ids related to `id` within `depth` hops.
    async fn related_doc_ids(&self, id: &str, depth: usize) -> Result<HashSet<String>>;
}

/// In-memory document store for tests and the demo CLI.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<String, Document>>,
}

impl InMemoryDocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with documents.
    pub fn with_documents(documents: Vec<Document>) -> Self {
        let map = documents.into_iter().map(|d| (d.id.clone(), d)).collect();
        Self {
            documents: RwLock::new(map),
        }
    }

    /// Insert or replace a document.
    pub fn upsert(&self, document: Document) {
        self.documents.write().insert(document.id.clone(), document);
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn list_documents(&self, filter: &DocumentFilter) -> Result<Vec<Document>> {
        let documents = self.documents.read();
        let mut results: Vec<Document> = documents
            .values()
            .filter(|d| match &filter.tag {
                Some(tag) => d.tags.iter().any(|t| t == tag),
                None => true,
            })
            .cloned()
            .collect();
        // Stable output for reproducible indexing.
        results.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(results)
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.documents.read().get(id).cloned())
    }
}

/// Deterministic hashing embedder for tests and the demo CLI.
///
/// Maps lowercase alphanumeric tokens into a fixed number of buckets and
/// L2-normalizes the resulting counts. Not a semantic model; it exists so
/// the vector strategy can run without a remote provider.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    /// Create a hashing embedder with the given dimensionality.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        use std::hash::{Hash, Hasher};

        let mut vector = vec![0.0f32; self.dimension];
        for token in crate::strategy::lexical::tokenize(text) {
            let mut hasher = ahash::AHasher::default();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dimension;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }

        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// In-memory adjacency-list graph store.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    edges: RwLock<HashMap<String, HashSet<String>>>,
}

impl InMemoryGraphStore {
    /// Create an empty graph store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an undirected relationship between two documents.
    pub fn add_edge<S: Into<String>>(&self, from: S, to: S) {
        let from = from.into();
        let to = to.into();
        let mut edges = self.edges.write();
        edges.entry(from.clone()).or_default().insert(to.clone());
        edges.entry(to).or_default().insert(from);
    }

    /// Number of nodes with at least one edge.
    pub fn node_count(&self) -> usize {
        self.edges.read().len()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn related_doc_ids(&self, id: &str, depth: usize) -> Result<HashSet<String>> {
        let edges = self.edges.read();
        let mut seen: HashSet<String> = HashSet::new();
        let mut frontier: Vec<String> = vec![id.to_string()];

        for _ in 0..depth.max(1) {
            let mut next = Vec::new();
            for node in frontier.drain(..) {
                if let Some(neighbors) = edges.get(&node) {
                    for neighbor in neighbors {
                        if neighbor != id && seen.insert(neighbor.clone()) {
                            next.push(neighbor.clone());
                        }
                    }
                }
            }
            frontier = next;
        }

        Ok(seen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store_roundtrip() {
        let store = InMemoryDocumentStore::new();
        store.upsert(Document::new("doc-1", "Title", "Body text"));

        let doc = store.get_document("doc-1").await.unwrap();
        assert!(doc.is_some());
        assert_eq!(doc.unwrap().title, "Title");

        assert!(store.get_document("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_documents_with_tag_filter() {
        let store = InMemoryDocumentStore::with_documents(vec![
            Document::new("a", "A", "text").with_tags(vec!["db".to_string()]),
            Document::new("b", "B", "text").with_tags(vec!["net".to_string()]),
        ]);

        let filter = DocumentFilter {
            tag: Some("db".to_string()),
        };
        let docs = store.list_documents(&filter).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "a");

        let all = store.list_documents(&DocumentFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        // Sorted by id.
        assert_eq!(all[0].id, "a");
    }

    #[tokio::test]
    async fn test_hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("database connection timeout").await.unwrap();
        let b = embedder.embed("database connection timeout").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        // Normalized to unit length.
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_graph_store_depth_expansion() {
        let graph = InMemoryGraphStore::new();
        graph.add_edge("a", "b");
        graph.add_edge("b", "c");

        let one_hop = graph.related_doc_ids("a", 1).await.unwrap();
        assert!(one_hop.contains("b"));
        assert!(!one_hop.contains("c"));

        let two_hops = graph.related_doc_ids("a", 2).await.unwrap();
        assert!(two_hops.contains("b"));
        assert!(two_hops.contains("c"));
        assert!(!two_hops.contains("a"));
    }
}
