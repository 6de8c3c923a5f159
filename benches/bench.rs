//! Criterion benchmarks for the retrieval hot paths: BM25 scoring,
//! reciprocal rank fusion, and the deterministic reranker.

use std::collections::HashMap;
use std::hint::black_box;

use chrono::Utc;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use remora::config::{FusionConfig, LexicalConfig, RerankConfig};
use remora::document::Document;
use remora::fusion::RankFusion;
use remora::rerank::Reranker;
use remora::strategy::{LexicalIndex, ScoredCandidate};

const WORDS: &[&str] = &[
    "search", "engine", "index", "query", "document", "ranking", "fusion", "vector", "graph",
    "retrieval", "adaptive", "feedback", "latency", "breaker", "strategy", "score", "token",
    "corpus", "weight", "bandit",
];

fn generate_documents(count: usize) -> Vec<Document> {
    (0..count)
        .map(|i| {
            let text: Vec<&str> = (0..40).map(|j| WORDS[(i * 7 + j * 3) % WORDS.len()]).collect();
            Document::new(
                format!("doc-{i:05}"),
                format!("Document {i}"),
                text.join(" "),
            )
        })
        .collect()
}

fn generate_lists(docs: usize) -> HashMap<String, Vec<ScoredCandidate>> {
    let mut lists = HashMap::new();
    for (strategy, offset) in [("lexical", 0usize), ("semantic", 3), ("graph", 7)] {
        let candidates: Vec<ScoredCandidate> = (0..docs)
            .map(|i| {
                let doc = (i + offset) % docs;
                ScoredCandidate::new(
                    format!("doc-{doc:05}"),
                    (docs - i) as f32 / docs as f32,
                    i + 1,
                    strategy.to_string(),
                )
            })
            .collect();
        lists.insert(strategy.to_string(), candidates);
    }
    lists
}

fn bench_lexical_search(c: &mut Criterion) {
    let index = LexicalIndex::new(LexicalConfig::default());
    index.index_documents(&generate_documents(2_000));

    let mut group = c.benchmark_group("lexical");
    group.throughput(Throughput::Elements(1));
    group.bench_function("bm25_search_2k_docs", |b| {
        b.iter(|| black_box(index.search(black_box("adaptive retrieval ranking"), 50)));
    });
    group.finish();
}

fn bench_lexical_indexing(c: &mut Criterion) {
    let documents = generate_documents(500);
    c.bench_function("bm25_index_500_docs", |b| {
        b.iter(|| {
            let index = LexicalIndex::new(LexicalConfig::default());
            index.index_documents(black_box(&documents));
            black_box(index.doc_count())
        });
    });
}

fn bench_fusion(c: &mut Criterion) {
    let fusion = RankFusion::new(FusionConfig::default());
    let lists = generate_lists(100);
    let weights: HashMap<String, f32> = [
        ("lexical".to_string(), 0.3),
        ("semantic".to_string(), 0.5),
        ("graph".to_string(), 0.2),
    ]
    .into_iter()
    .collect();

    let mut group = c.benchmark_group("fusion");
    group.throughput(Throughput::Elements(300));
    group.bench_function("rrf_three_lists_100_docs", |b| {
        b.iter(|| black_box(fusion.fuse(black_box(&lists), black_box(&weights))));
    });
    group.finish();
}

fn bench_rerank(c: &mut Criterion) {
    let fusion = RankFusion::new(FusionConfig::default());
    let reranker = Reranker::new(RerankConfig::default());
    let lists = generate_lists(100);
    let weights: HashMap<String, f32> = [
        ("lexical".to_string(), 0.3),
        ("semantic".to_string(), 0.5),
        ("graph".to_string(), 0.2),
    ]
    .into_iter()
    .collect();
    let fused = fusion.fuse(&lists, &weights);
    let documents: HashMap<String, Document> = generate_documents(100)
        .into_iter()
        .map(|d| (d.id.clone(), d))
        .collect();
    let now = Utc::now();

    c.bench_function("rerank_100_docs", |b| {
        b.iter(|| {
            let mut results = fused.clone();
            reranker.rerank(black_box("adaptive ranking"), &mut results, &documents, now);
            black_box(results)
        });
    });
}

criterion_group!(
    benches,
    bench_lexical_search,
    bench_lexical_indexing,
    bench_fusion,
    bench_rerank
);
criterion_main!(benches);
