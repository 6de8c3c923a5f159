//! Remora CLI binary.

use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use env_logger::Builder;
use log::LevelFilter;

use remora::config::RemoraConfig;
use remora::document::{
    Document, DocumentFilter, HashingEmbedder, InMemoryDocumentStore, InMemoryGraphStore,
};
use remora::engine::{HybridSearchEngine, SearchOptions};
use remora::error::Result;

/// Run hybrid searches over a JSON document corpus.
#[derive(Debug, Parser)]
#[command(name = "remora", version, about)]
struct RemoraArgs {
    /// Path to a JSON file holding an array of documents
    /// (`[{"id", "title", "text", ...}, ...]`).
    #[arg(short, long, env = "REMORA_CORPUS")]
    corpus: PathBuf,

    /// Query to run.
    query: String,

    /// Number of results to return.
    #[arg(short = 'k', long, default_value_t = 10)]
    limit: usize,

    /// Restrict the query to these strategies (e.g. `lexical,semantic`).
    #[arg(long, value_delimiter = ',')]
    strategies: Option<Vec<String>>,

    /// Skip the deterministic reranking pass.
    #[arg(long)]
    no_rerank: bool,

    /// Print gate health and index statistics after the query.
    #[arg(long)]
    stats: bool,

    /// Increase verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn load_corpus(path: &PathBuf) -> Result<Vec<Document>> {
    let raw = std::fs::read_to_string(path)?;
    let documents: Vec<Document> = serde_json::from_str(&raw)?;
    Ok(documents)
}

async fn run(args: RemoraArgs) -> Result<()> {
    let documents = load_corpus(&args.corpus)?;
    let graph = Arc::new(InMemoryGraphStore::new());
    // Link documents sharing a tag so the graph strategy has edges to walk.
    for a in &documents {
        for b in &documents {
            if a.id < b.id && a.tags.iter().any(|tag| b.tags.contains(tag)) {
                graph.add_edge(a.id.clone(), b.id.clone());
            }
        }
    }

    let engine = HybridSearchEngine::new(
        RemoraConfig::default(),
        Arc::new(InMemoryDocumentStore::with_documents(documents)),
        Arc::new(HashingEmbedder::new(256)),
        graph,
    )?;
    engine.index_documents(&DocumentFilter::default()).await?;

    let response = engine
        .search(
            &args.query,
            args.limit,
            SearchOptions {
                strategies: args.strategies.clone(),
                rerank: !args.no_rerank,
            },
        )
        .await?;

    if response.degraded {
        eprintln!("degraded response; unavailable: {}", response.unavailable.join(", "));
    }
    for (position, result) in response.results.iter().enumerate() {
        println!(
            "{:>2}. {:<20} {:.6}  {}",
            position + 1,
            result.doc_id,
            result.score,
            result.title.as_deref().unwrap_or("")
        );
    }
    if response.results.is_empty() {
        println!("no results");
    }

    if args.stats {
        let stats = engine.stats();
        let health = engine.gate_health();
        println!(
            "\nindex: {} documents, {} terms, {} vectors",
            stats.documents, stats.lexical_terms, stats.embedded_vectors
        );
        println!(
            "gates: {}/{} closed ({:.0}% healthy)",
            health.closed, health.total, health.health_percentage
        );
    }

    engine.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    // Parse command line arguments using clap
    let args = RemoraArgs::parse();

    // Set up logging/verbosity based on args if needed
    let log_level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
        .init();

    if let Err(e) = run(args).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
