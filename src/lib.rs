//! Financial Reasoning Orchestrator
//!
//! Answers financial questions from a local knowledge base of ingested
//! documents, falling back to web search when the documents are not
//! enough or the question needs current information:
//! - Multi-lane vector index (one embedding space per lane)
//! - Deterministic router deciding the next evidence source
//! - Concurrent tool rounds with per-call timeouts
//! - Cited answers with an explicit confidence level
//!
//! UNIFIED LOOP:
//! QUERY → ROUTE → RETRIEVE / WEB SEARCH → MERGE → ROUTE? → SYNTHESIZE

pub mod agent;
pub mod api;
pub mod bootstrap;
pub mod classifier;
pub mod config;
pub mod embedding;
pub mod error;
pub mod execution;
pub mod index;
pub mod ingestion;
pub mod llm;
pub mod models;
pub mod prompts;
pub mod router;
pub mod state;
pub mod synthesizer;
pub mod tools;

#[cfg(test)]
mod testing;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use classifier::{QueryClassifier, QueryFreshness};
