//! Retrieval tool
//!
//! Embeds the query text with the lane's embedder and searches that lane
//! of the index. Embedder errors, including a vector of the wrong size,
//! come back as `EmbeddingUnavailable` so a broken lane reads as offline
//! rather than as "no matches".

use super::{ActionKind, Tool};
use crate::embedding::Embedder;
use crate::error::OrchestrationError;
use crate::index::VectorIndex;
use crate::models::{Evidence, LaneSearch, ToolInput, ToolOutput};
use crate::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

pub struct RetrievalTool {
    index: Arc<dyn VectorIndex>,
    embedders: BTreeMap<String, Arc<dyn Embedder>>,
    score_threshold: Option<f32>,
}

impl RetrievalTool {
    pub fn new(index: Arc<dyn VectorIndex>) -> Self {
        Self {
            index,
            embedders: BTreeMap::new(),
            score_threshold: None,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedders.insert(embedder.lane().to_string(), embedder);
        self
    }

    pub fn with_score_threshold(mut self, threshold: Option<f32>) -> Self {
        self.score_threshold = threshold;
        self
    }

    /// Lanes that exist in the index and have an embedder.
    pub fn lanes(&self) -> Vec<String> {
        self.embedders
            .keys()
            .filter(|lane| self.index.lane(lane).is_ok())
            .cloned()
            .collect()
    }

    pub async fn retrieve(&self, query_text: &str, lane: &str, k: usize) -> Result<LaneSearch> {
        let spec = self.index.lane(lane)?;

        let embedder = self.embedders.get(lane).ok_or_else(|| {
            OrchestrationError::EmbeddingUnavailable {
                lane: lane.to_string(),
                reason: "no embedder configured".to_string(),
            }
        })?;

        let vector = embedder.embed(query_text).await.map_err(|e| match e {
            OrchestrationError::EmbeddingUnavailable { .. } => e,
            other => OrchestrationError::EmbeddingUnavailable {
                lane: lane.to_string(),
                reason: other.to_string(),
            },
        })?;

        spec.check_dimension(&vector)
            .map_err(|e| OrchestrationError::EmbeddingUnavailable {
                lane: lane.to_string(),
                reason: e.to_string(),
            })?;

        let result = self.index.search(lane, &vector, k, self.score_threshold).await?;
        debug!(lane, hits = result.hits().len(), no_signal = result.is_no_signal(), "Lane searched");
        Ok(result)
    }

    /// A `Tool` bound to one lane of this retriever.
    pub fn lane_handle(self: &Arc<Self>, lane: &str) -> LaneRetriever {
        LaneRetriever {
            retrieval: Arc::clone(self),
            lane: lane.to_string(),
            source: format!("retrieval:{}", lane),
            description: format!("Semantic search over ingested documents ({} lane)", lane),
        }
    }
}

pub struct LaneRetriever {
    retrieval: Arc<RetrievalTool>,
    lane: String,
    source: String,
    description: String,
}

#[async_trait::async_trait]
impl Tool for LaneRetriever {
    fn kind(&self) -> ActionKind {
        ActionKind::Retrieve
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn lane(&self) -> Option<&str> {
        Some(&self.lane)
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn invoke(&self, input: &ToolInput) -> Result<ToolOutput> {
        info!(lane = %self.lane, query = %input.query, "Retrieving");

        let output = match self.retrieval.retrieve(&input.query, &self.lane, input.top_k).await? {
            LaneSearch::Hits(hits) => ToolOutput {
                source: self.source.clone(),
                evidence: hits.into_iter().map(Evidence::Chunk).collect(),
                no_signal: false,
            },
            LaneSearch::NoSignal => ToolOutput {
                source: self.source.clone(),
                evidence: Vec::new(),
                no_signal: true,
            },
        };

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::InMemoryVectorIndex;
    use crate::models::{DocumentChunk, LaneSpec, CLOUD_LANE, LOCAL_LANE};
    use crate::testing::StubEmbedder;

    async fn index() -> Arc<InMemoryVectorIndex> {
        let index = InMemoryVectorIndex::new(vec![
            LaneSpec::new(LOCAL_LANE, 3),
            LaneSpec::new(CLOUD_LANE, 2),
        ]);
        index
            .upsert(
                DocumentChunk::new("c1", "fy2025.pdf", "Net income was $7.2B")
                    .with_vector(LOCAL_LANE, vec![1.0, 0.0, 0.0])
                    .with_vector(CLOUD_LANE, vec![0.0, 0.0]),
            )
            .await
            .unwrap();
        Arc::new(index)
    }

    #[tokio::test]
    async fn test_retrieve_local_lane() {
        let tool = Arc::new(
            RetrievalTool::new(index().await)
                .with_embedder(Arc::new(StubEmbedder::constant(LOCAL_LANE, vec![1.0, 0.0, 0.0]))),
        );

        let result = tool.retrieve("net income", LOCAL_LANE, 5).await.unwrap();
        assert_eq!(result.hits().len(), 1);
        assert!((result.hits()[0].score - 1.0).abs() < 1e-5);

        let output = tool
            .lane_handle(LOCAL_LANE)
            .invoke(&ToolInput { query: "net income".into(), top_k: 5 })
            .await
            .unwrap();
        assert_eq!(output.source, "retrieval:local_bge");
        assert_eq!(output.evidence.len(), 1);
        assert!(!output.no_signal);
    }

    #[tokio::test]
    async fn test_unpopulated_lane_reports_no_signal() {
        let tool = Arc::new(
            RetrievalTool::new(index().await)
                .with_embedder(Arc::new(StubEmbedder::constant(CLOUD_LANE, vec![0.5, 0.5]))),
        );

        let output = tool
            .lane_handle(CLOUD_LANE)
            .invoke(&ToolInput { query: "q".into(), top_k: 5 })
            .await
            .unwrap();
        assert!(output.no_signal);
        assert!(output.evidence.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_size_embedding_is_embedding_unavailable() {
        let tool = RetrievalTool::new(index().await)
            .with_embedder(Arc::new(StubEmbedder::constant(LOCAL_LANE, vec![1.0, 0.0])));

        let err = tool.retrieve("q", LOCAL_LANE, 5).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::EmbeddingUnavailable { ref lane, .. } if lane == LOCAL_LANE));
    }

    #[tokio::test]
    async fn test_embedder_failure_and_missing_embedder() {
        let tool = RetrievalTool::new(index().await)
            .with_embedder(Arc::new(StubEmbedder::failing(LOCAL_LANE)));

        assert!(matches!(
            tool.retrieve("q", LOCAL_LANE, 5).await,
            Err(OrchestrationError::EmbeddingUnavailable { .. })
        ));
        assert!(matches!(
            tool.retrieve("q", CLOUD_LANE, 5).await,
            Err(OrchestrationError::EmbeddingUnavailable { .. })
        ));
        assert!(matches!(
            tool.retrieve("q", "sparse", 5).await,
            Err(OrchestrationError::UnknownLane(_))
        ));
        assert_eq!(tool.lanes(), vec![LOCAL_LANE.to_string()]);
    }
}
