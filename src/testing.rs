//! In-process stand-ins for the network-backed boundaries.

use crate::embedding::Embedder;
use crate::error::OrchestrationError;
use crate::llm::LanguageModel;
use crate::models::WebSnippet;
use crate::tools::SearchProvider;
use crate::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub struct StubEmbedder {
    lane: String,
    vector: Option<Vec<f32>>,
    delay: Option<Duration>,
}

impl StubEmbedder {
    pub fn constant(lane: &str, vector: Vec<f32>) -> Self {
        Self {
            lane: lane.to_string(),
            vector: Some(vector),
            delay: None,
        }
    }

    pub fn failing(lane: &str) -> Self {
        Self {
            lane: lane.to_string(),
            vector: None,
            delay: None,
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    fn lane(&self) -> &str {
        &self.lane
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.vector
            .clone()
            .ok_or_else(|| OrchestrationError::EmbeddingUnavailable {
                lane: self.lane.clone(),
                reason: "embedding service down".to_string(),
            })
    }
}

pub struct StubSearch {
    results: Option<Vec<WebSnippet>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StubSearch {
    pub fn empty() -> Self {
        Self::with_snippets(Vec::new())
    }

    pub fn with_results(n: usize) -> Self {
        Self::with_snippets(
            (1..=n)
                .map(|i| WebSnippet {
                    title: format!("Result {}", i),
                    url: format!("https://news.example/{}", i),
                    content: format!("Market update number {}", i),
                    score: 1.0 - i as f32 * 0.1,
                    rank: i,
                })
                .collect(),
        )
    }

    pub fn with_snippets(snippets: Vec<WebSnippet>) -> Self {
        Self {
            results: Some(snippets),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            results: None,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchProvider for StubSearch {
    fn name(&self) -> &str {
        "stub"
    }

    async fn search(&self, _query: &str, k: usize) -> Result<Vec<WebSnippet>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.results {
            Some(results) => Ok(results.iter().take(k).cloned().collect()),
            None => Err(OrchestrationError::IoError(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset",
            ))),
        }
    }
}

pub struct StubModel {
    answer: Option<String>,
    refined: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl StubModel {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: Some(answer.to_string()),
            refined: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            answer: None,
            refined: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Reply used for query-refinement prompts.
    pub fn refining_to(mut self, refined: &str) -> Self {
        self.refined = Some(refined.to_string());
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for StubModel {
    fn name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());

        if prompt.contains("returned weak results") {
            if let Some(refined) = &self.refined {
                return Ok(refined.clone());
            }
        }

        self.answer
            .clone()
            .ok_or_else(|| OrchestrationError::ModelUnavailable("stub model offline".to_string()))
    }
}
