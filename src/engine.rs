//! The hybrid search facade.
//!
//! `HybridSearchEngine` wires the strategies, the resilience gates, rank
//! fusion, the reranker, and the online learning controller together behind
//! one `search` entry point. Strategies fan out as independent tokio tasks
//! and fan back in under a per-query deadline; any strategy that fails or
//! misses the deadline degrades the response instead of erroring it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::{Sender, unbounded};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::adaptive::bandit::ThompsonSampler;
use crate::adaptive::{
    AdaptiveController, AdaptiveParameters, ControllerEvent, ControllerHandle, FeedbackEvent,
    LearningStats, PerformanceEvent, QueryAttribution, SnapshotStore,
};
use crate::config::RemoraConfig;
use crate::document::{Document, DocumentFilter, DocumentStore, EmbeddingProvider, GraphStore};
use crate::error::{RemoraError, Result};
use crate::fusion::RankFusion;
use crate::gate::{GateHealth, GateRegistry, GateStatus, GateThresholds};
use crate::rerank::Reranker;
use crate::strategy::{
    GraphStrategy, LexicalIndex, LexicalStrategy, SearchStrategy, StrategyRegistry, VectorStrategy,
};

/// Gated dependency behind the vector strategy.
pub const EMBEDDING_DEPENDENCY: &str = "embedding-provider";
/// Gated dependency behind the graph strategy.
pub const GRAPH_DEPENDENCY: &str = "graph-store";

/// Per-query options.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Restrict the query to these strategies. `None` lets the bandit pick
    /// a mix arm (or all registered strategies when no arms are configured).
    pub strategies: Option<Vec<String>>,
    /// Apply the deterministic reranker to the fused results.
    pub rerank: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            strategies: None,
            rerank: true,
        }
    }
}

/// One result returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalResult {
    /// Document id.
    pub doc_id: String,
    /// Document title, when the document is known to the engine.
    pub title: Option<String>,
    /// Fused (and possibly reranked) score.
    pub score: f32,
    /// Rank each contributing strategy gave this document.
    pub contributing_ranks: HashMap<String, usize>,
    /// Rerank factor breakdown, empty when reranking was skipped.
    pub rerank_factors: HashMap<String, f32>,
}

/// Response of one search call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Query id minted for this call, used to attribute later feedback.
    pub query_id: String,
    /// Fused results, best first, at most `k`.
    pub results: Vec<FinalResult>,
    /// True when at least one selected strategy did not contribute.
    pub degraded: bool,
    /// Selected strategies that failed or missed the deadline, sorted.
    pub unavailable: Vec<String>,
}

/// Index and corpus counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    /// Documents known to the engine.
    pub documents: usize,
    /// Distinct terms in the lexical index.
    pub lexical_terms: usize,
    /// Stored embedding vectors.
    pub embedded_vectors: usize,
    /// Registered strategies.
    pub strategies: usize,
}

/// Adaptive hybrid retrieval engine.
pub struct HybridSearchEngine {
    config: RemoraConfig,
    store: Arc<dyn DocumentStore>,
    lexical_index: Arc<LexicalIndex>,
    vector: Arc<VectorStrategy>,
    strategies: StrategyRegistry,
    gates: Arc<GateRegistry>,
    fusion: RankFusion,
    reranker: Reranker,
    sampler: ThompsonSampler,
    snapshots: Arc<SnapshotStore>,
    stats: Arc<RwLock<LearningStats>>,
    events: Sender<ControllerEvent>,
    controller: Mutex<Option<ControllerHandle>>,
    /// Documents cached at indexing time for reranking and result titles.
    documents: RwLock<HashMap<String, Document>>,
}

impl HybridSearchEngine {
    /// Build an engine over the given external dependencies and spawn its
    /// learning controller. Must run inside a tokio runtime.
    pub fn new(
        config: RemoraConfig,
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        graph: Arc<dyn GraphStore>,
    ) -> Result<Self> {
        config.validate()?;

        let (events, receiver) = unbounded::<ControllerEvent>();
        let gates = Arc::new(GateRegistry::new(config.gates.clone(), Some(events.clone())));

        let lexical_index = Arc::new(LexicalIndex::new(config.lexical.clone()));
        let vector = Arc::new(VectorStrategy::new(
            config.vector.clone(),
            embedder,
            gates.get_or_create(EMBEDDING_DEPENDENCY),
        ));

        let mut strategies = StrategyRegistry::new();
        strategies.register(Arc::new(LexicalStrategy::new(lexical_index.clone())));
        strategies.register(vector.clone());
        strategies.register(Arc::new(GraphStrategy::new(
            config.graph.clone(),
            graph,
            gates.get_or_create(GRAPH_DEPENDENCY),
            lexical_index.clone(),
        )));

        let initial = AdaptiveParameters::initial(
            &strategies.names(),
            &config.learning,
            GateThresholds::from(&config.gates),
            &[EMBEDDING_DEPENDENCY.to_string(), GRAPH_DEPENDENCY.to_string()],
        );
        let snapshots = Arc::new(SnapshotStore::new(initial));
        let stats = Arc::new(RwLock::new(LearningStats::default()));

        let controller = AdaptiveController::new(
            config.learning.clone(),
            snapshots.clone(),
            gates.clone(),
            receiver,
            stats.clone(),
        )
        .spawn();

        Ok(Self {
            fusion: RankFusion::new(config.fusion.clone()),
            reranker: Reranker::new(config.rerank.clone()),
            sampler: ThompsonSampler::new(),
            config,
            store,
            lexical_index,
            vector,
            strategies,
            gates,
            snapshots,
            stats,
            events,
            controller: Mutex::new(Some(controller)),
            documents: RwLock::new(HashMap::new()),
        })
    }

    /// Register or replace a strategy. Intended for wiring custom retrieval
    /// sources before the engine is shared.
    pub fn register_strategy(&mut self, strategy: Arc<dyn SearchStrategy>) {
        self.strategies.register(strategy);
    }

    /// Stop the learning controller, draining any buffered events first.
    pub async fn shutdown(&self) {
        let handle = self.controller.lock().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }

    /// Rebuild the lexical and vector derived state from the backing store.
    pub async fn index_documents(&self, filter: &DocumentFilter) -> Result<EngineStats> {
        let documents = self.store.list_documents(filter).await?;
        log::info!("indexing {} documents", documents.len());

        self.lexical_index.index_documents(&documents);
        let embedded = self.vector.index_documents(&documents).await;

        let mut cache = self.documents.write();
        cache.clear();
        for doc in documents {
            cache.insert(doc.id.clone(), doc);
        }
        drop(cache);

        log::info!(
            "index ready: {} documents, {} embeddings",
            self.lexical_index.doc_count(),
            embedded
        );
        Ok(self.stats())
    }

    /// Current index counters.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            documents: self.documents.read().len(),
            lexical_terms: self.lexical_index.term_count(),
            embedded_vectors: self.vector.vector_count(),
            strategies: self.strategies.len(),
        }
    }

    /// Run a hybrid query.
    ///
    /// Returns an error only for malformed input. Dependency failures never
    /// error: failed strategies are listed in
    /// [`SearchResponse::unavailable`] and the response is marked degraded,
    /// with results fused from whatever completed.
    pub async fn search(&self, query: &str, k: usize, options: SearchOptions) -> Result<SearchResponse> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(RemoraError::malformed_query("empty query"));
        }
        if trimmed.chars().count() > self.config.search.max_query_len {
            return Err(RemoraError::malformed_query(format!(
                "query exceeds {} characters",
                self.config.search.max_query_len
            )));
        }

        let query_id = Uuid::new_v4().to_string();
        let snapshot = self.snapshots.load();
        let (selected, arm) = self.select_strategies(&options, &snapshot)?;
        log::debug!("query '{query_id}' dispatching to {selected:?} (arm: {arm:?})");

        let (lists, unavailable) = self.dispatch(trimmed, k, &selected).await;
        let degraded = !unavailable.is_empty();

        let mut fused = self.fusion.fuse(&lists, &snapshot.weights);

        // Credit shares come from the pre-rerank fused scores.
        let mut contributions: HashMap<String, HashMap<String, f32>> = HashMap::new();
        for result in &fused {
            contributions.insert(
                result.doc_id.clone(),
                self.fusion.contribution_shares(result, &snapshot.weights),
            );
        }

        if options.rerank {
            let documents = self.documents.read().clone();
            self.reranker.rerank(trimmed, &mut fused, &documents, Utc::now());
        }
        fused.truncate(k);

        contributions.retain(|doc_id, _| fused.iter().any(|r| &r.doc_id == doc_id));
        let _ = self.events.try_send(ControllerEvent::Attribution(QueryAttribution {
            query_id: query_id.clone(),
            arm,
            contributions,
        }));

        let titles = self.documents.read();
        let results = fused
            .into_iter()
            .map(|result| FinalResult {
                title: titles.get(&result.doc_id).map(|d| d.title.clone()),
                doc_id: result.doc_id,
                score: result.fused_score,
                contributing_ranks: result.contributing_ranks,
                rerank_factors: result.rerank_factors,
            })
            .collect();

        Ok(SearchResponse {
            query_id,
            results,
            degraded,
            unavailable,
        })
    }

    /// Resolve the strategy set for one query: explicit subset first, then
    /// the bandit's mix arm, then every registered strategy.
    fn select_strategies(
        &self,
        options: &SearchOptions,
        snapshot: &AdaptiveParameters,
    ) -> Result<(Vec<String>, Option<String>)> {
        let registered = self.strategies.names();

        if let Some(subset) = &options.strategies {
            let selected: Vec<String> = subset
                .iter()
                .filter(|name| registered.contains(name))
                .cloned()
                .collect();
            if selected.is_empty() {
                return Err(RemoraError::malformed_query(
                    "no requested strategy is registered",
                ));
            }
            return Ok((selected, None));
        }

        if !self.config.learning.arms.is_empty() {
            let arm_name = {
                let mut rng = rand::rng();
                self.sampler.select(&snapshot.bandit, &mut rng)
            };
            if let Some(arm_name) = arm_name
                && let Some(arm) = self
                    .config
                    .learning
                    .arms
                    .iter()
                    .find(|arm| arm.name == arm_name)
            {
                let selected: Vec<String> = arm
                    .strategies
                    .iter()
                    .filter(|name| registered.contains(name))
                    .cloned()
                    .collect();
                if !selected.is_empty() {
                    return Ok((selected, Some(arm_name)));
                }
            }
        }

        Ok((registered, None))
    }

    /// Fan the query out to the selected strategies and fan back in under
    /// one shared deadline. Tasks still running at the deadline are
    /// abandoned and their strategy reported unavailable.
    async fn dispatch(
        &self,
        query: &str,
        k: usize,
        selected: &[String],
    ) -> (HashMap<String, Vec<crate::strategy::ScoredCandidate>>, Vec<String>) {
        let fetch = k.saturating_mul(self.config.search.overfetch).max(k);
        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.config.search.query_timeout_ms);

        let mut handles = Vec::with_capacity(selected.len());
        for name in selected {
            let Some(strategy) = self.strategies.get(name) else {
                continue;
            };
            let query = query.to_string();
            let started = Instant::now();
            let handle =
                tokio::spawn(async move { (strategy.search(&query, fetch).await, started.elapsed()) });
            handles.push((name.clone(), handle));
        }

        let joined = futures::future::join_all(handles.into_iter().map(|(name, handle)| {
            async move {
                let abort = handle.abort_handle();
                let outcome = tokio::time::timeout_at(deadline, handle).await;
                if outcome.is_err() {
                    // The deadline passed; stop the straggler instead of
                    // letting it run detached.
                    abort.abort();
                }
                (name, outcome)
            }
        }))
        .await;

        let mut lists = HashMap::new();
        let mut unavailable = Vec::new();
        for (name, outcome) in joined {
            match outcome {
                Ok(Ok((Ok(candidates), elapsed))) => {
                    self.emit_performance(&name, elapsed.as_millis() as u64, true);
                    lists.insert(name, candidates);
                }
                Ok(Ok((Err(error), elapsed))) => {
                    log::warn!("strategy '{name}' failed: {error}");
                    self.emit_performance(&name, elapsed.as_millis() as u64, false);
                    unavailable.push(name);
                }
                Ok(Err(join_error)) => {
                    log::error!("strategy '{name}' task panicked: {join_error}");
                    self.emit_performance(&name, 0, false);
                    unavailable.push(name);
                }
                Err(_) => {
                    log::warn!(
                        "strategy '{name}' missed the {}ms query deadline",
                        self.config.search.query_timeout_ms
                    );
                    self.emit_performance(&name, self.config.search.query_timeout_ms, false);
                    unavailable.push(name);
                }
            }
        }
        unavailable.sort();
        (lists, unavailable)
    }

    fn emit_performance(&self, strategy: &str, latency_ms: u64, success: bool) {
        let _ = self.events.try_send(ControllerEvent::Performance(PerformanceEvent::new(
            strategy, latency_ms, success,
        )));
    }

    /// Feed user feedback into the learning loop.
    pub fn record_feedback(&self, feedback: FeedbackEvent) -> Result<()> {
        self.events
            .try_send(ControllerEvent::Feedback(feedback))
            .map_err(|_| RemoraError::other("learning channel closed"))
    }

    /// Feed an external performance measurement into the learning loop.
    pub fn record_performance(&self, performance: PerformanceEvent) -> Result<()> {
        self.events
            .try_send(ControllerEvent::Performance(performance))
            .map_err(|_| RemoraError::other("learning channel closed"))
    }

    /// Current adaptive parameter snapshot.
    pub fn parameters_snapshot(&self) -> Arc<AdaptiveParameters> {
        self.snapshots.load()
    }

    /// Status of one resilience gate, if it exists.
    pub fn gate_status(&self, dependency: &str) -> Option<GateStatus> {
        self.gates.status(dependency)
    }

    /// Aggregate gate health.
    pub fn gate_health(&self) -> GateHealth {
        self.gates.health()
    }

    /// Force every gate back to closed.
    pub fn reset_gates(&self) {
        self.gates.reset_all();
    }

    /// Learning pipeline counters.
    pub fn learning_stats(&self) -> LearningStats {
        self.stats.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::strategy_names;
    use crate::document::{HashingEmbedder, InMemoryDocumentStore, InMemoryGraphStore};
    use crate::strategy::ScoredCandidate;
    use async_trait::async_trait;

    fn corpus() -> Vec<Document> {
        vec![
            Document::new(
                "doc-rust",
                "Rust patterns",
                "ownership and borrowing patterns for systems programming in rust",
            ),
            Document::new(
                "doc-search",
                "Search engines",
                "inverted indexes and ranking functions power full text search",
            ),
            Document::new(
                "doc-graph",
                "Graph stores",
                "graph databases model relationships between connected documents",
            ),
        ]
    }

    async fn engine_with(config: RemoraConfig) -> HybridSearchEngine {
        let store = Arc::new(InMemoryDocumentStore::with_documents(corpus()));
        let graph = Arc::new(InMemoryGraphStore::new());
        graph.add_edge("doc-rust", "doc-search");
        graph.add_edge("doc-search", "doc-graph");
        let engine = HybridSearchEngine::new(
            config,
            store,
            Arc::new(HashingEmbedder::new(64)),
            graph,
        )
        .unwrap();
        engine.index_documents(&DocumentFilter::default()).await.unwrap();
        engine
    }

    fn no_bandit_config() -> RemoraConfig {
        let mut config = RemoraConfig::default();
        config.learning.arms.clear();
        config
    }

    struct FailingStrategy(&'static str);

    #[async_trait]
    impl SearchStrategy for FailingStrategy {
        fn name(&self) -> &str {
            self.0
        }

        async fn search(&self, _query: &str, _k: usize) -> Result<Vec<ScoredCandidate>> {
            Err(RemoraError::unavailable("backend down"))
        }
    }

    #[tokio::test]
    async fn test_search_returns_fused_results() {
        let engine = engine_with(no_bandit_config()).await;
        let response = engine
            .search("rust ownership patterns", 10, SearchOptions::default())
            .await
            .unwrap();

        assert!(!response.degraded);
        assert!(response.unavailable.is_empty());
        assert!(!response.results.is_empty());
        assert_eq!(response.results[0].doc_id, "doc-rust");
        assert_eq!(response.results[0].title.as_deref(), Some("Rust patterns"));
        assert!(!response.query_id.is_empty());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_query_is_malformed() {
        let engine = engine_with(no_bandit_config()).await;
        let error = engine.search("   ", 10, SearchOptions::default()).await.unwrap_err();
        assert!(matches!(error, RemoraError::MalformedQuery { .. }));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_oversized_query_is_malformed() {
        let engine = engine_with(no_bandit_config()).await;
        let long = "x".repeat(engine.config.search.max_query_len + 1);
        let error = engine.search(&long, 10, SearchOptions::default()).await.unwrap_err();
        assert!(matches!(error, RemoraError::MalformedQuery { .. }));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_explicit_subset_only_runs_those_strategies() {
        let engine = engine_with(no_bandit_config()).await;
        let response = engine
            .search(
                "graph relationships",
                10,
                SearchOptions {
                    strategies: Some(vec![strategy_names::LEXICAL.to_string()]),
                    rerank: false,
                },
            )
            .await
            .unwrap();

        for result in &response.results {
            assert_eq!(result.contributing_ranks.len(), 1);
            assert!(result.contributing_ranks.contains_key(strategy_names::LEXICAL));
        }
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_subset_rejected() {
        let engine = engine_with(no_bandit_config()).await;
        let error = engine
            .search(
                "anything",
                10,
                SearchOptions {
                    strategies: Some(vec!["nonexistent".to_string()]),
                    rerank: false,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(error, RemoraError::MalformedQuery { .. }));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_partial_failure_degrades_without_error() {
        let mut engine = engine_with(no_bandit_config()).await;
        engine.register_strategy(Arc::new(FailingStrategy("semantic")));

        let response = engine
            .search("rust ownership", 10, SearchOptions::default())
            .await
            .unwrap();

        assert!(response.degraded);
        assert_eq!(response.unavailable, vec!["semantic".to_string()]);
        assert!(!response.results.is_empty());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_all_strategies_failing_yields_empty_degraded_response() {
        let mut engine = engine_with(no_bandit_config()).await;
        engine.register_strategy(Arc::new(FailingStrategy("lexical")));
        engine.register_strategy(Arc::new(FailingStrategy("semantic")));
        engine.register_strategy(Arc::new(FailingStrategy("graph")));

        let response = engine
            .search("rust ownership", 10, SearchOptions::default())
            .await
            .unwrap();

        assert!(response.results.is_empty());
        assert!(response.degraded);
        assert_eq!(
            response.unavailable,
            vec!["graph".to_string(), "lexical".to_string(), "semantic".to_string()]
        );
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_stats_reflect_index() {
        let engine = engine_with(no_bandit_config()).await;
        let stats = engine.stats();
        assert_eq!(stats.documents, 3);
        assert_eq!(stats.embedded_vectors, 3);
        assert_eq!(stats.strategies, 3);
        assert!(stats.lexical_terms > 0);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_feedback_reaches_the_controller() {
        let mut config = no_bandit_config();
        config.learning.tick_interval_ms = 10;
        let engine = engine_with(config).await;

        let response = engine
            .search("rust ownership", 5, SearchOptions::default())
            .await
            .unwrap();
        let doc_id = response.results[0].doc_id.clone();
        engine
            .record_feedback(FeedbackEvent::labeled(
                response.query_id.clone(),
                doc_id,
                crate::adaptive::FeedbackLabel::Positive,
            ))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        let stats = engine.learning_stats();
        assert_eq!(stats.total_feedback, 1);
        assert_eq!(stats.positive_feedback, 1);
        engine.shutdown().await;
    }
}
