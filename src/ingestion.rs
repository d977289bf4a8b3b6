//! Chunk ingestion
//!
//! Consumes a stream of chunks, fills in missing lane vectors, validates
//! each chunk against the lane specs and upserts in batches. A bad chunk
//! is reported in the `IngestReport` and never aborts its batch.

use crate::embedding::Embedder;
use crate::error::OrchestrationError;
use crate::index::{content_hash, VectorIndex};
use crate::models::DocumentChunk;
use crate::Result;
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub batch_size: usize,
    /// Embed chunk text for lanes the chunk has no vector for.
    pub embed_missing: bool,
    /// Store an all-zero placeholder for lanes still missing afterwards.
    pub placeholder_missing: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            batch_size: 64,
            embed_missing: true,
            placeholder_missing: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RejectedChunk {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub upserted: usize,
    pub embedded: usize,
    pub placeholders: usize,
    pub rejected: Vec<RejectedChunk>,
}

impl IngestReport {
    fn merge(&mut self, other: IngestReport) {
        self.upserted += other.upserted;
        self.embedded += other.embedded;
        self.placeholders += other.placeholders;
        self.rejected.extend(other.rejected);
    }
}

pub struct Ingestor {
    index: Arc<dyn VectorIndex>,
    embedders: BTreeMap<String, Arc<dyn Embedder>>,
    options: IngestOptions,
}

impl Ingestor {
    pub fn new(index: Arc<dyn VectorIndex>, options: IngestOptions) -> Self {
        Self {
            index,
            embedders: BTreeMap::new(),
            options,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedders.insert(embedder.lane().to_string(), embedder);
        self
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub async fn ingest<I>(&self, chunks: I) -> Result<IngestReport>
    where
        I: IntoIterator<Item = DocumentChunk>,
        I::IntoIter: Send,
    {
        self.ingest_stream(stream::iter(chunks)).await
    }

    /// Batch writes fail the call; per-chunk problems land in the report.
    pub async fn ingest_stream<S>(&self, chunks: S) -> Result<IngestReport>
    where
        S: Stream<Item = DocumentChunk> + Send,
    {
        let mut report = IngestReport::default();
        let mut batches = Box::pin(chunks.chunks(self.options.batch_size.max(1)));

        while let Some(batch) = batches.next().await {
            report.merge(self.ingest_batch(batch).await?);
        }

        info!(
            upserted = report.upserted,
            embedded = report.embedded,
            placeholders = report.placeholders,
            rejected = report.rejected.len(),
            "Ingestion complete"
        );
        Ok(report)
    }

    async fn ingest_batch(&self, mut batch: Vec<DocumentChunk>) -> Result<IngestReport> {
        let mut report = IngestReport::default();

        for chunk in batch.iter_mut() {
            if chunk.id.trim().is_empty() {
                chunk.id = derived_id(chunk);
            }
        }

        if self.options.embed_missing {
            report.embedded = self.backfill(&mut batch).await;
        }

        if self.options.placeholder_missing {
            for chunk in batch.iter_mut() {
                for lane in self.index.lanes() {
                    if !chunk.vectors.contains_key(&lane.name) {
                        chunk.vectors.insert(lane.name.clone(), vec![0.0; lane.dimension]);
                        report.placeholders += 1;
                    }
                }
            }
        }

        let mut valid = Vec::with_capacity(batch.len());
        for chunk in batch {
            match self.index.validate_chunk(&chunk) {
                Ok(()) => valid.push(chunk),
                Err(e) => {
                    warn!(chunk_id = %chunk.id, error = %e, "Rejecting chunk");
                    report.rejected.push(RejectedChunk {
                        id: chunk.id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !valid.is_empty() {
            report.upserted = self.index.upsert_batch(valid).await?;
        }

        Ok(report)
    }

    /// Embed missing lanes per lane in one batch call. A failing embedder
    /// leaves the lane missing for placeholder handling.
    async fn backfill(&self, batch: &mut [DocumentChunk]) -> usize {
        let mut embedded = 0;

        for lane in self.index.lanes() {
            let Some(embedder) = self.embedders.get(&lane.name) else {
                continue;
            };

            let missing: Vec<usize> = batch
                .iter()
                .enumerate()
                .filter(|(_, c)| !c.vectors.contains_key(&lane.name))
                .map(|(i, _)| i)
                .collect();
            if missing.is_empty() {
                continue;
            }

            let texts: Vec<String> = missing.iter().map(|&i| batch[i].text.clone()).collect();
            match embedder.embed_batch(&texts).await {
                Ok(vectors) => {
                    for (i, vector) in missing.into_iter().zip(vectors) {
                        batch[i].vectors.insert(lane.name.clone(), vector);
                        embedded += 1;
                    }
                }
                Err(e) => warn!(lane = %lane.name, error = %e, "Back-fill embedding failed"),
            }
        }

        embedded
    }
}

/// Deterministic id for chunks supplied without one.
fn derived_id(chunk: &DocumentChunk) -> String {
    let key = format!(
        "{}\u{1f}{}\u{1f}{}",
        chunk.source,
        chunk.locator.as_deref().unwrap_or_default(),
        chunk.text
    );
    content_hash(&key)[..16].to_string()
}

/// Read chunks from a JSON-lines file; blank lines are skipped.
pub async fn load_jsonl(path: impl AsRef<Path>) -> Result<Vec<DocumentChunk>> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path).await?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str::<DocumentChunk>(line).map_err(|e| {
                OrchestrationError::InvalidInput(format!(
                    "{}:{}: invalid chunk: {}",
                    path.display(),
                    n + 1,
                    e
                ))
            })
        })
        .collect()
}
