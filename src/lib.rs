//! # Remora
//!
//! An adaptive hybrid retrieval library with failure-aware resilience.
//!
//! ## Features
//!
//! - Lexical (BM25), vector, and graph retrieval strategies
//! - Weighted reciprocal rank fusion with deterministic tie-breaking
//! - Per-dependency circuit breakers with half-open probing
//! - Deterministic reranking with a bounded position shift
//! - Online learning: feedback-driven fusion weights, a Thompson-sampling
//!   strategy-mix bandit, and adaptive gate thresholds

pub mod adaptive;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod fusion;
pub mod gate;
pub mod rerank;
pub mod strategy;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
