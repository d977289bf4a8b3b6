//! Web search tool
//!
//! Provider behind a trait; Tavily is the shipped implementation. Every
//! provider failure (transport, non-2xx, rate limit, missing key) is
//! reported as `SearchUnavailable`.

use super::{ActionKind, Tool};
use crate::config::SearchSettings;
use crate::error::OrchestrationError;
use crate::models::{Evidence, ToolInput, ToolOutput, WebSnippet};
use crate::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Up to `k` results in provider rank order.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<WebSnippet>>;
}

//
// ================= Tavily =================
//

pub struct TavilyProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    search_depth: String,
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    search_depth: &'a str,
    include_answer: bool,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f32,
}

impl TavilyProvider {
    pub fn new(settings: &SearchSettings) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(4)
            .timeout(settings.timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.tavily_api_key.clone().filter(|k| !k.is_empty()),
            search_depth: settings.search_depth.clone(),
        })
    }
}

fn to_snippets(response: TavilyResponse, k: usize) -> Vec<WebSnippet> {
    response
        .results
        .into_iter()
        .filter(|r| !r.url.is_empty())
        .take(k)
        .enumerate()
        .map(|(i, r)| WebSnippet {
            title: r.title,
            url: r.url,
            content: r.content,
            score: r.score,
            rank: i + 1,
        })
        .collect()
}

#[async_trait]
impl SearchProvider for TavilyProvider {
    fn name(&self) -> &str {
        "tavily"
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<WebSnippet>> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            OrchestrationError::SearchUnavailable("TAVILY_API_KEY not configured".to_string())
        })?;

        let request = TavilyRequest {
            api_key,
            query,
            max_results: k,
            search_depth: &self.search_depth,
            include_answer: false,
        };

        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| OrchestrationError::SearchUnavailable(format!("Tavily request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(OrchestrationError::SearchUnavailable(
                "Tavily rate limit reached".to_string(),
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestrationError::SearchUnavailable(format!(
                "Tavily returned {}: {}",
                status, body
            )));
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| OrchestrationError::SearchUnavailable(format!("Tavily parse error: {}", e)))?;

        Ok(to_snippets(parsed, k))
    }
}

//
// ================= Tool =================
//

pub struct WebSearchTool {
    provider: Arc<dyn SearchProvider>,
    max_results: usize,
}

impl WebSearchTool {
    pub fn new(provider: Arc<dyn SearchProvider>, max_results: usize) -> Self {
        Self {
            provider,
            max_results: max_results.max(1),
        }
    }

    /// Ranked snippets, re-numbered from 1 and capped at the configured maximum.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<WebSnippet>> {
        let k = k.clamp(1, self.max_results);

        let mut snippets = self.provider.search(query, k).await.map_err(|e| match e {
            OrchestrationError::SearchUnavailable(_) => e,
            other => OrchestrationError::SearchUnavailable(other.to_string()),
        })?;

        snippets.truncate(k);
        for (i, snippet) in snippets.iter_mut().enumerate() {
            snippet.rank = i + 1;
        }

        info!(provider = self.provider.name(), results = snippets.len(), "Web search complete");
        Ok(snippets)
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn kind(&self) -> ActionKind {
        ActionKind::WebSearch
    }

    fn source(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current financial news and market data"
    }

    async fn invoke(&self, input: &ToolInput) -> Result<ToolOutput> {
        let snippets = self.search(&input.query, input.top_k).await.map_err(|e| {
            warn!(error = %e, "Web search failed");
            e
        })?;

        Ok(ToolOutput {
            source: self.source().to_string(),
            evidence: snippets.into_iter().map(Evidence::Web).collect(),
            no_signal: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubSearch;

    fn settings(key: Option<&str>) -> SearchSettings {
        SearchSettings {
            base_url: "http://127.0.0.1:9".into(),
            tavily_api_key: key.map(str::to_string),
            max_results: 5,
            search_depth: "advanced".into(),
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_tavily_response_parsing() {
        let response: TavilyResponse = serde_json::from_value(serde_json::json!({
            "query": "CIBC news",
            "results": [
                { "title": "CIBC Q4", "url": "https://a.example", "content": "Earnings beat", "score": 0.91 },
                { "title": "No url", "url": "", "content": "dropped" },
                { "title": "Rates", "url": "https://b.example", "content": "BoC holds", "score": 0.7 }
            ],
            "response_time": 1.2
        }))
        .unwrap();

        let snippets = to_snippets(response, 5);
        assert_eq!(snippets.len(), 2);
        assert_eq!(snippets[0].rank, 1);
        assert_eq!(snippets[1].url, "https://b.example");
        assert_eq!(snippets[1].rank, 2);
    }

    #[tokio::test]
    async fn test_missing_key_is_search_unavailable() {
        let provider = TavilyProvider::new(&settings(None)).unwrap();
        let err = provider.search("q", 3).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::SearchUnavailable(_)));

        let provider = TavilyProvider::new(&settings(Some(""))).unwrap();
        assert!(provider.search("q", 3).await.is_err());
    }

    #[tokio::test]
    async fn test_tool_caps_and_reranks() {
        let tool = WebSearchTool::new(Arc::new(StubSearch::with_results(4)), 3);
        let output = tool
            .invoke(&ToolInput { query: "latest news".into(), top_k: 10 })
            .await
            .unwrap();

        assert_eq!(output.evidence.len(), 3);
        let ranks: Vec<usize> = output
            .evidence
            .iter()
            .filter_map(|e| match e {
                Evidence::Web(w) => Some(w.rank),
                _ => None,
            })
            .collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_provider_failure_maps_to_search_unavailable() {
        let tool = WebSearchTool::new(Arc::new(StubSearch::failing()), 3);
        let err = tool
            .invoke(&ToolInput { query: "q".into(), top_k: 3 })
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::SearchUnavailable(_)));
    }
}
