//! End-to-end tests for the hybrid retrieval pipeline: indexing, fan-out,
//! fusion, degradation, and the online learning loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use remora::adaptive::{FeedbackEvent, FeedbackLabel, WEIGHT_EPSILON};
use remora::config::{RemoraConfig, strategy_names};
use remora::document::{
    Document, DocumentFilter, HashingEmbedder, InMemoryDocumentStore, InMemoryGraphStore,
};
use remora::engine::{HybridSearchEngine, SearchOptions};
use remora::error::{RemoraError, Result};
use remora::strategy::{ScoredCandidate, SearchStrategy};

fn corpus() -> Vec<Document> {
    vec![
        Document::new(
            "doc-async",
            "Async runtimes",
            "cooperative scheduling and futures drive async runtimes for network services",
        ),
        Document::new(
            "doc-bm25",
            "Ranking functions",
            "the bm25 ranking function scores documents by term frequency and rarity",
        ),
        Document::new(
            "doc-fusion",
            "Result fusion",
            "reciprocal rank fusion merges ranked lists from heterogeneous retrievers",
        ),
        Document::new(
            "doc-graphs",
            "Knowledge graphs",
            "knowledge graphs connect documents through typed relationships",
        ),
    ]
}

async fn build_engine(config: RemoraConfig) -> HybridSearchEngine {
    let store = Arc::new(InMemoryDocumentStore::with_documents(corpus()));
    let graph = Arc::new(InMemoryGraphStore::new());
    graph.add_edge("doc-bm25", "doc-fusion");
    graph.add_edge("doc-fusion", "doc-graphs");

    let engine = HybridSearchEngine::new(
        config,
        store,
        Arc::new(HashingEmbedder::new(128)),
        graph,
    )
    .expect("engine construction");
    engine
        .index_documents(&DocumentFilter::default())
        .await
        .expect("indexing");
    engine
}

fn all_strategies() -> Option<Vec<String>> {
    Some(vec![
        strategy_names::LEXICAL.to_string(),
        strategy_names::SEMANTIC.to_string(),
        strategy_names::GRAPH.to_string(),
    ])
}

struct AlwaysFailing(&'static str);

#[async_trait]
impl SearchStrategy for AlwaysFailing {
    fn name(&self) -> &str {
        self.0
    }

    async fn search(&self, _query: &str, _k: usize) -> Result<Vec<ScoredCandidate>> {
        Err(RemoraError::unavailable("dependency down"))
    }
}

#[tokio::test]
async fn test_full_pipeline_returns_relevant_results() {
    let engine = build_engine(RemoraConfig::default()).await;

    let response = engine
        .search(
            "bm25 ranking function",
            10,
            SearchOptions {
                strategies: all_strategies(),
                rerank: true,
            },
        )
        .await
        .expect("search");

    assert!(!response.degraded);
    assert!(response.unavailable.is_empty());
    assert!(!response.results.is_empty());
    assert_eq!(response.results[0].doc_id, "doc-bm25");
    // The lexical strategy must have ranked the top hit.
    assert!(
        response.results[0]
            .contributing_ranks
            .contains_key(strategy_names::LEXICAL)
    );
    engine.shutdown().await;
}

#[tokio::test]
async fn test_search_is_reproducible_for_fixed_parameters() {
    let engine = build_engine(RemoraConfig::default()).await;
    let options = SearchOptions {
        strategies: all_strategies(),
        rerank: true,
    };

    let first = engine.search("rank fusion", 10, options.clone()).await.unwrap();
    let second = engine.search("rank fusion", 10, options).await.unwrap();

    let first_ids: Vec<&String> = first.results.iter().map(|r| &r.doc_id).collect();
    let second_ids: Vec<&String> = second.results.iter().map(|r| &r.doc_id).collect();
    assert_eq!(first_ids, second_ids);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_all_strategies_failing_degrades_without_error() {
    let mut engine = build_engine(RemoraConfig::default()).await;
    engine.register_strategy(Arc::new(AlwaysFailing("lexical")));
    engine.register_strategy(Arc::new(AlwaysFailing("semantic")));
    engine.register_strategy(Arc::new(AlwaysFailing("graph")));

    let response = engine
        .search(
            "anything at all",
            10,
            SearchOptions {
                strategies: all_strategies(),
                rerank: true,
            },
        )
        .await
        .expect("degraded, not an error");

    assert!(response.results.is_empty());
    assert!(response.degraded);
    assert_eq!(response.unavailable, vec!["graph", "lexical", "semantic"]);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_single_failing_strategy_still_yields_results() {
    let mut engine = build_engine(RemoraConfig::default()).await;
    engine.register_strategy(Arc::new(AlwaysFailing("semantic")));

    let response = engine
        .search(
            "knowledge graphs relationships",
            10,
            SearchOptions {
                strategies: all_strategies(),
                rerank: true,
            },
        )
        .await
        .unwrap();

    assert!(response.degraded);
    assert_eq!(response.unavailable, vec!["semantic"]);
    assert!(!response.results.is_empty());
    engine.shutdown().await;
}

#[tokio::test]
async fn test_feedback_adapts_fusion_weights() {
    let mut config = RemoraConfig::default();
    config.learning.tick_interval_ms = 10;
    let engine = build_engine(config).await;

    let before = engine.parameters_snapshot();
    let lexical_before = before.weights[strategy_names::LEXICAL];

    // Repeatedly reward lexical-dominated hits.
    for _ in 0..5 {
        let response = engine
            .search(
                "bm25 term frequency",
                5,
                SearchOptions {
                    strategies: Some(vec![strategy_names::LEXICAL.to_string()]),
                    rerank: false,
                },
            )
            .await
            .unwrap();
        let doc_id = response.results[0].doc_id.clone();
        engine
            .record_feedback(FeedbackEvent::labeled(
                response.query_id.clone(),
                doc_id,
                FeedbackLabel::Positive,
            ))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    let after = engine.parameters_snapshot();
    let lexical_after = after.weights[strategy_names::LEXICAL];
    assert!(
        lexical_after > lexical_before,
        "lexical weight {lexical_after} should have grown past {lexical_before}"
    );
    let sum: f32 = after.weights.values().sum();
    assert!((sum - 1.0).abs() < WEIGHT_EPSILON, "weights sum to {sum}");

    let stats = engine.learning_stats();
    assert_eq!(stats.positive_feedback, 5);
    assert!(stats.snapshots_published >= 1);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_unattributed_feedback_is_counted_not_applied() {
    let mut config = RemoraConfig::default();
    config.learning.tick_interval_ms = 10;
    let engine = build_engine(config).await;

    let before = engine.parameters_snapshot();
    engine
        .record_feedback(FeedbackEvent::labeled(
            "no-such-query".to_string(),
            "no-such-doc".to_string(),
            FeedbackLabel::Positive,
        ))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let after = engine.parameters_snapshot();
    assert_eq!(before.weights, after.weights);
    assert_eq!(engine.learning_stats().dropped_malformed, 1);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_bandit_arms_only_move_on_their_own_queries() {
    let mut config = RemoraConfig::default();
    config.learning.tick_interval_ms = 10;
    let engine = build_engine(config).await;

    // Queries run with an explicit subset carry no arm attribution, so no
    // bandit posterior may move.
    let response = engine
        .search(
            "reciprocal rank fusion",
            5,
            SearchOptions {
                strategies: all_strategies(),
                rerank: false,
            },
        )
        .await
        .unwrap();
    let doc_id = response.results[0].doc_id.clone();
    engine
        .record_feedback(FeedbackEvent::labeled(
            response.query_id.clone(),
            doc_id,
            FeedbackLabel::Positive,
        ))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snapshot = engine.parameters_snapshot();
    for (name, arm) in &snapshot.bandit {
        assert_eq!(arm.alpha, 1.0, "arm '{name}' alpha moved without serving a query");
        assert_eq!(arm.beta, 1.0, "arm '{name}' beta moved without serving a query");
    }
    engine.shutdown().await;
}

#[tokio::test]
async fn test_tag_filtered_indexing() {
    let documents = vec![
        Document::new("a", "Kept", "retrieval pipelines").with_tags(vec!["core".to_string()]),
        Document::new("b", "Skipped", "unrelated content"),
    ];
    let engine = HybridSearchEngine::new(
        RemoraConfig::default(),
        Arc::new(InMemoryDocumentStore::with_documents(documents)),
        Arc::new(HashingEmbedder::new(64)),
        Arc::new(InMemoryGraphStore::new()),
    )
    .unwrap();

    let stats = engine
        .index_documents(&DocumentFilter {
            tag: Some("core".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(stats.documents, 1);
    engine.shutdown().await;
}
