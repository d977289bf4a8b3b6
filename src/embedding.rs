//! Embedding boundary
//!
//! One `Embedder` per lane. Any failure surfaces as
//! `EmbeddingUnavailable` so callers can tell "lane offline" from
//! "no matches".

use crate::config::EmbeddingSettings;
use crate::error::OrchestrationError;
use crate::models::{CLOUD_LANE, LOCAL_LANE};
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Lane this embedder produces vectors for.
    fn lane(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, preserving order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

fn unavailable(lane: &str, reason: impl Into<String>) -> OrchestrationError {
    OrchestrationError::EmbeddingUnavailable {
        lane: lane.to_string(),
        reason: reason.into(),
    }
}

fn build_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder()
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(8)
        .timeout(timeout)
        .build()?)
}

//
// ================= Ollama (local lane) =================
//

pub struct OllamaEmbedder {
    client: Client,
    lane: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(settings: &EmbeddingSettings) -> Result<Self> {
        Ok(Self {
            client: build_client(settings.timeout)?,
            lane: LOCAL_LANE.to_string(),
            base_url: settings.ollama_base_url.trim_end_matches('/').to_string(),
            model: settings.local_model.clone(),
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn lane(&self) -> &str {
        &self.lane
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&OllamaEmbedRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await
            .map_err(|e| {
                error!(lane = %self.lane, "Ollama embedding request failed: {}", e);
                unavailable(&self.lane, format!("request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(unavailable(&self.lane, format!("Ollama returned {}: {}", status, body)));
        }

        let parsed: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|e| unavailable(&self.lane, format!("invalid response: {}", e)))?;

        if parsed.embedding.is_empty() {
            return Err(unavailable(&self.lane, "empty embedding"));
        }

        debug!(lane = %self.lane, dim = parsed.embedding.len(), "Embedded text");
        Ok(parsed.embedding)
    }
}

//
// ================= OpenAI (cloud lane) =================
//

pub struct OpenAiEmbedder {
    client: Client,
    lane: String,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenAiEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedding {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(settings: &EmbeddingSettings) -> Result<Self> {
        Ok(Self {
            client: build_client(settings.timeout)?,
            lane: CLOUD_LANE.to_string(),
            base_url: settings.openai_base_url.trim_end_matches('/').to_string(),
            model: settings.cloud_model.clone(),
            api_key: settings.openai_api_key.clone(),
        })
    }
}

/// Put embeddings back in input order; the API does not promise it.
fn ordered_embeddings(lane: &str, mut response: OpenAiEmbedResponse, expected: usize) -> Result<Vec<Vec<f32>>> {
    if response.data.len() != expected {
        return Err(unavailable(
            lane,
            format!("expected {} embeddings, got {}", expected, response.data.len()),
        ));
    }
    response.data.sort_by_key(|d| d.index);
    Ok(response.data.into_iter().map(|d| d.embedding).collect())
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn lane(&self) -> &str {
        &self.lane
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut batch = self.embed_batch(&[text.to_string()]).await?;
        batch
            .pop()
            .ok_or_else(|| unavailable(&self.lane, "empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(unavailable(&self.lane, "OPENAI_API_KEY not configured"));
        };
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(api_key)
            .json(&OpenAiEmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| unavailable(&self.lane, format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(lane = %self.lane, %status, "OpenAI embedding error response");
            return Err(unavailable(&self.lane, format!("OpenAI returned {}: {}", status, body)));
        }

        let parsed: OpenAiEmbedResponse = response
            .json()
            .await
            .map_err(|e| unavailable(&self.lane, format!("invalid response: {}", e)))?;

        ordered_embeddings(&self.lane, parsed, texts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> EmbeddingSettings {
        EmbeddingSettings {
            ollama_base_url: "http://localhost:11434/".into(),
            local_model: "bge-small-en-v1.5".into(),
            openai_base_url: "https://api.openai.com/v1".into(),
            openai_api_key: None,
            cloud_model: "text-embedding-3-small".into(),
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_ollama_request_shape() {
        let json = serde_json::to_value(OllamaEmbedRequest {
            model: "bge-small-en-v1.5",
            prompt: "net income",
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({ "model": "bge-small-en-v1.5", "prompt": "net income" }));
    }

    #[test]
    fn test_openai_embeddings_are_reordered() {
        let response: OpenAiEmbedResponse = serde_json::from_value(serde_json::json!({
            "object": "list",
            "data": [
                { "object": "embedding", "index": 1, "embedding": [0.2] },
                { "object": "embedding", "index": 0, "embedding": [0.1] }
            ],
            "model": "text-embedding-3-small"
        }))
        .unwrap();

        let ordered = ordered_embeddings(CLOUD_LANE, response, 2).unwrap();
        assert_eq!(ordered, vec![vec![0.1], vec![0.2]]);
    }

    #[test]
    fn test_openai_count_mismatch_is_unavailable() {
        let response = OpenAiEmbedResponse { data: vec![] };
        assert!(matches!(
            ordered_embeddings(CLOUD_LANE, response, 1),
            Err(OrchestrationError::EmbeddingUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_openai_key_is_embedding_unavailable() {
        let embedder = OpenAiEmbedder::new(&settings()).unwrap();
        assert_eq!(embedder.lane(), CLOUD_LANE);

        let err = embedder.embed("query").await.unwrap_err();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_ollama_base_url_is_trimmed() {
        let embedder = OllamaEmbedder::new(&settings()).unwrap();
        assert_eq!(embedder.base_url, "http://localhost:11434");
        assert_eq!(embedder.lane(), LOCAL_LANE);
    }
}
