//! Language model boundary
//!
//! The router's query refinement and the synthesizer only need
//! `complete(prompt) -> text`. Any failure is `ModelUnavailable`.

use crate::config::{LlmProvider, LlmSettings};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub mod gemini;
pub mod ollama;

pub use gemini::GeminiModel;
pub use ollama::OllamaModel;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Build the configured model backend.
pub fn build_model(settings: &LlmSettings) -> Result<Arc<dyn LanguageModel>> {
    let model: Arc<dyn LanguageModel> = match settings.provider {
        LlmProvider::Ollama => Arc::new(OllamaModel::new(settings)?),
        LlmProvider::Gemini => Arc::new(GeminiModel::new(settings)?),
    };
    Ok(model)
}
