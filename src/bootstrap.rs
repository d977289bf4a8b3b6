//! Component wiring shared by the CLI and the API server.

use crate::agent::Orchestrator;
use crate::config::{IndexBackend, Settings};
use crate::embedding::{Embedder, OllamaEmbedder, OpenAiEmbedder};
use crate::index::{InMemoryVectorIndex, QdrantIndex, VectorIndex};
use crate::ingestion::{IngestOptions, Ingestor};
use crate::llm::build_model;
use crate::synthesizer::AnswerSynthesizer;
use crate::tools::{build_registry, RetrievalTool, TavilyProvider, WebSearchTool};
use crate::Result;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Runtime {
    pub orchestrator: Arc<Orchestrator>,
    pub ingestor: Arc<Ingestor>,
    pub index: Arc<dyn VectorIndex>,
}

pub async fn build_runtime(settings: &Settings) -> Result<Runtime> {
    let lanes = settings.index.lanes.clone();

    let index: Arc<dyn VectorIndex> = match settings.index.backend {
        IndexBackend::Memory => match &settings.index.snapshot_path {
            Some(path) => Arc::new(InMemoryVectorIndex::open(path, lanes.clone()).await?),
            None => Arc::new(InMemoryVectorIndex::new(lanes.clone())),
        },
        IndexBackend::Qdrant => Arc::new(QdrantIndex::new(&settings.index)?),
    };
    index.ensure_collection().await?;
    info!(backend = ?settings.index.backend, chunks = index.len().await?, "Vector index ready");

    let embedders: Vec<Arc<dyn Embedder>> = vec![
        Arc::new(OllamaEmbedder::new(&settings.embedding)?),
        Arc::new(OpenAiEmbedder::new(&settings.embedding)?),
    ];
    if settings.embedding.openai_api_key.is_none() {
        warn!("OPENAI_API_KEY not set; the cloud lane will be reported as unavailable");
    }

    let mut retrieval =
        RetrievalTool::new(index.clone()).with_score_threshold(settings.agent.min_search_score);
    let mut ingestor = Ingestor::new(
        index.clone(),
        IngestOptions {
            batch_size: settings.ingest.batch_size,
            embed_missing: settings.ingest.embed_missing,
            placeholder_missing: settings.ingest.placeholder_missing,
        },
    );
    for embedder in embedders {
        retrieval = retrieval.with_embedder(embedder.clone());
        ingestor = ingestor.with_embedder(embedder);
    }

    if settings.search.tavily_api_key.is_none() {
        warn!("TAVILY_API_KEY not set; web search calls will fail and be recorded");
    }
    let web = WebSearchTool::new(
        Arc::new(TavilyProvider::new(&settings.search)?),
        settings.search.max_results,
    );

    let registry = build_registry(Some(Arc::new(retrieval)), Some(Arc::new(web)));

    let model = build_model(&settings.llm)?;
    info!(model = model.name(), "Language model configured");

    let synthesizer = AnswerSynthesizer::new(model.clone(), settings.synthesis.clone());
    let orchestrator = Orchestrator::new(registry, synthesizer, model, lanes, &settings.agent);

    Ok(Runtime {
        orchestrator: Arc::new(orchestrator),
        ingestor: Arc::new(ingestor),
        index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_build_runtime_with_memory_backend() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("index.json");
        let vars: HashMap<&str, String> = [
            ("INDEX_BACKEND", "memory".to_string()),
            ("INDEX_SNAPSHOT_PATH", snapshot.display().to_string()),
        ]
        .into_iter()
        .collect();

        let settings = Settings::from_lookup(|key| vars.get(key).cloned()).unwrap();
        let runtime = build_runtime(&settings).await.unwrap();

        assert_eq!(runtime.index.len().await.unwrap(), 0);
        assert_eq!(runtime.index.lanes().len(), 2);
        assert_eq!(runtime.orchestrator.router().policy().max_iterations, 5);
    }
}
