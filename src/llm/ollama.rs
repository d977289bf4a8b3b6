//! Ollama client for locally served models (llama3, mistral, ...).

use super::LanguageModel;
use crate::config::LlmSettings;
use crate::error::OrchestrationError;
use crate::prompts::SYSTEM_PROMPT;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

pub struct OllamaModel {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    done: bool,
}

impl OllamaModel {
    pub fn new(settings: &LlmSettings) -> crate::Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(settings.timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            num_predict: settings.max_tokens,
        })
    }

    fn request<'a>(&'a self, prompt: &'a str) -> GenerateRequest<'a> {
        GenerateRequest {
            model: &self.model,
            system: SYSTEM_PROMPT,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
                num_predict: self.num_predict,
            },
        }
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> crate::Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&self.request(prompt))
            .send()
            .await
            .map_err(|e| {
                error!(model = %self.model, "Ollama request failed: {}", e);
                OrchestrationError::ModelUnavailable(format!("Ollama request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestrationError::ModelUnavailable(format!(
                "Ollama returned {}: {}",
                status, body
            )));
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| {
            OrchestrationError::ModelUnavailable(format!("Ollama parse error: {}", e))
        })?;

        if parsed.response.trim().is_empty() {
            return Err(OrchestrationError::ModelUnavailable(
                "Ollama returned an empty completion".to_string(),
            ));
        }

        debug!(model = %self.model, done = parsed.done, chars = parsed.response.len(), "Completion received");
        Ok(parsed.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmProvider;

    #[test]
    fn test_generate_request_is_not_streaming() {
        let settings = LlmSettings {
            provider: LlmProvider::Ollama,
            base_url: "http://localhost:11434/".into(),
            model: "llama3".into(),
            temperature: 0.7,
            max_tokens: 2048,
            api_key: None,
            timeout: Duration::from_secs(5),
        };
        let model = OllamaModel::new(&settings).unwrap();
        assert_eq!(model.base_url, "http://localhost:11434");

        let json = serde_json::to_value(model.request("Summarize")).unwrap();
        assert_eq!(json["model"], "llama3");
        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["num_predict"], 2048);
        assert_eq!(json["prompt"], "Summarize");
    }

    #[test]
    fn test_response_parsing() {
        let parsed: GenerateResponse =
            serde_json::from_str(r#"{"model":"llama3","response":"Hello","done":true}"#).unwrap();
        assert_eq!(parsed.response, "Hello");
        assert!(parsed.done);
    }
}
