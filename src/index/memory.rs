//! In-process vector index with optional JSON snapshot persistence.

use super::{rank_order, similarity, VectorIndex};
use crate::error::OrchestrationError;
use crate::models::{is_placeholder, DocumentChunk, LaneSearch, LaneSpec, ScoredChunk};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredPoint {
    seq: u64,
    chunk: Arc<DocumentChunk>,
}

#[derive(Debug, Default, Clone)]
struct Collection {
    points: HashMap<String, StoredPoint>,
    next_seq: u64,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    lanes: Vec<LaneSpec>,
    points: Vec<StoredPoint>,
}

/// `RwLock`-guarded collection: searches share the read lock, upserts
/// replace whole points under the write lock. Writes are staged on a copy
/// and only become visible once the snapshot is on disk.
pub struct InMemoryVectorIndex {
    lanes: Vec<LaneSpec>,
    inner: RwLock<Collection>,
    snapshot_path: Option<PathBuf>,
}

impl InMemoryVectorIndex {
    pub fn new(lanes: Vec<LaneSpec>) -> Self {
        Self {
            lanes,
            inner: RwLock::new(Collection::default()),
            snapshot_path: None,
        }
    }

    /// Open a snapshot-backed index. An existing snapshot must declare the same lanes.
    pub async fn open(path: impl AsRef<Path>, lanes: Vec<LaneSpec>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut collection = Collection::default();

        if tokio::fs::try_exists(&path).await? {
            let bytes = tokio::fs::read(&path).await?;
            let snapshot: Snapshot = serde_json::from_slice(&bytes)?;

            for lane in &lanes {
                match snapshot.lanes.iter().find(|l| l.name == lane.name) {
                    Some(stored) if !stored.same_geometry(lane) => {
                        return Err(OrchestrationError::LaneConflict(format!(
                            "snapshot declares lane '{}' as {}d/{}, configured {}d/{}",
                            lane.name, stored.dimension, stored.distance, lane.dimension, lane.distance
                        )));
                    }
                    _ => {}
                }
            }

            for point in snapshot.points {
                collection.next_seq = collection.next_seq.max(point.seq + 1);
                collection.points.insert(point.chunk.id.clone(), point);
            }

            info!(
                path = %path.display(),
                points = collection.points.len(),
                "Loaded vector index snapshot"
            );
        }

        Ok(Self {
            lanes,
            inner: RwLock::new(collection),
            snapshot_path: Some(path),
        })
    }

    async fn persist(&self, collection: &Collection) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let mut points: Vec<StoredPoint> = collection.points.values().cloned().collect();
        points.sort_by_key(|p| p.seq);

        let snapshot = Snapshot {
            lanes: self.lanes.clone(),
            points,
        };
        let bytes = serde_json::to_vec(&snapshot)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    fn insert(collection: &mut Collection, chunk: DocumentChunk) {
        let seq = match collection.points.get(&chunk.id) {
            Some(existing) => existing.seq,
            None => {
                let seq = collection.next_seq;
                collection.next_seq += 1;
                seq
            }
        };
        collection.points.insert(
            chunk.id.clone(),
            StoredPoint {
                seq,
                chunk: Arc::new(chunk),
            },
        );
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn ensure_collection(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, chunk: DocumentChunk) -> Result<()> {
        self.validate_chunk(&chunk)?;

        let mut collection = self.inner.write().await;
        let mut staged = collection.clone();
        Self::insert(&mut staged, chunk);
        self.persist(&staged).await?;
        *collection = staged;
        Ok(())
    }

    async fn upsert_batch(&self, chunks: Vec<DocumentChunk>) -> Result<usize> {
        for chunk in &chunks {
            self.validate_chunk(chunk)?;
        }

        let count = chunks.len();
        let mut collection = self.inner.write().await;
        let mut staged = collection.clone();
        for chunk in chunks {
            Self::insert(&mut staged, chunk);
        }
        self.persist(&staged).await?;
        *collection = staged;

        debug!(count, total = collection.points.len(), "Upserted batch");
        Ok(count)
    }

    async fn search(
        &self,
        lane: &str,
        query: &[f32],
        k: usize,
        score_threshold: Option<f32>,
    ) -> Result<LaneSearch> {
        let spec = self.lane(lane)?;
        spec.check_dimension(query)?;

        if is_placeholder(query) {
            return Ok(LaneSearch::NoSignal);
        }

        let collection = self.inner.read().await;

        let mut populated = 0usize;
        let mut scored: Vec<(u64, f32, &StoredPoint)> = Vec::new();

        for point in collection.points.values() {
            if !point.chunk.has_signal(lane) {
                continue;
            }
            populated += 1;

            let Some(vector) = point.chunk.vectors.get(lane) else {
                continue;
            };
            let score = similarity(spec.distance, query, vector);
            if score_threshold.map_or(true, |t| score >= t) {
                scored.push((point.seq, score, point));
            }
        }

        if populated == 0 {
            return Ok(LaneSearch::NoSignal);
        }

        scored.sort_by(|a, b| rank_order((a.1, a.0), (b.1, b.0)));
        scored.truncate(k);

        Ok(LaneSearch::Hits(
            scored
                .into_iter()
                .map(|(_, score, point)| ScoredChunk {
                    chunk: point.chunk.clone(),
                    score,
                    lane: lane.to_string(),
                })
                .collect(),
        ))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.inner.read().await.points.len())
    }

    fn lanes(&self) -> &[LaneSpec] {
        &self.lanes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CLOUD_LANE, LOCAL_LANE};

    fn lanes() -> Vec<LaneSpec> {
        vec![
            LaneSpec::new(LOCAL_LANE, 384),
            LaneSpec::new(CLOUD_LANE, 1536).with_priority(1),
        ]
    }

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot] = 1.0;
        v
    }

    #[tokio::test]
    async fn test_self_retrieval_scores_one() {
        let index = InMemoryVectorIndex::new(lanes());
        let v1: Vec<f32> = (0..384).map(|i| ((i % 7) as f32) - 3.0).collect();

        index
            .upsert(DocumentChunk::new("c1", "fy2025.pdf", "Net income rose").with_vector(LOCAL_LANE, v1.clone()))
            .await
            .unwrap();
        index
            .upsert(DocumentChunk::new("c2", "fy2025.pdf", "Dividends").with_vector(LOCAL_LANE, unit(384, 5)))
            .await
            .unwrap();

        let result = index.search(LOCAL_LANE, &v1, 5, None).await.unwrap();
        let hits = result.hits();
        assert_eq!(hits[0].chunk.id, "c1");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
        assert_eq!(hits[0].lane, LOCAL_LANE);
    }

    #[tokio::test]
    async fn test_cloud_lane_without_vectors_is_no_signal() {
        let index = InMemoryVectorIndex::new(lanes());
        index
            .upsert(
                DocumentChunk::new("c1", "a.pdf", "text")
                    .with_vector(LOCAL_LANE, unit(384, 0))
                    .with_vector(CLOUD_LANE, vec![0.0; 1536]),
            )
            .await
            .unwrap();

        let result = index.search(CLOUD_LANE, &unit(1536, 3), 3, None).await.unwrap();
        assert!(result.is_no_signal());
    }

    #[tokio::test]
    async fn test_empty_index_and_placeholder_query_are_no_signal() {
        let index = InMemoryVectorIndex::new(lanes());
        assert!(index.search(LOCAL_LANE, &unit(384, 1), 3, None).await.unwrap().is_no_signal());

        index
            .upsert(DocumentChunk::new("c1", "a.pdf", "text").with_vector(LOCAL_LANE, unit(384, 1)))
            .await
            .unwrap();
        assert!(index.search(LOCAL_LANE, &vec![0.0; 384], 3, None).await.unwrap().is_no_signal());
    }

    #[tokio::test]
    async fn test_threshold_yields_empty_hits_not_error() {
        let index = InMemoryVectorIndex::new(lanes());
        index
            .upsert(DocumentChunk::new("c1", "a.pdf", "text").with_vector(LOCAL_LANE, unit(384, 1)))
            .await
            .unwrap();

        let result = index.search(LOCAL_LANE, &unit(384, 2), 3, Some(0.5)).await.unwrap();
        assert!(!result.is_no_signal());
        assert!(result.hits().is_empty());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejects_whole_chunk() {
        let index = InMemoryVectorIndex::new(lanes());
        let bad = DocumentChunk::new("c1", "a.pdf", "text")
            .with_vector(LOCAL_LANE, unit(384, 0))
            .with_vector(CLOUD_LANE, vec![1.0; 10]);

        let err = index.upsert(bad).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::DimensionMismatch { expected: 1536, actual: 10, .. }
        ));
        assert_eq!(index.len().await.unwrap(), 0);

        let unknown = DocumentChunk::new("c2", "a.pdf", "text").with_vector("sparse", vec![1.0]);
        assert!(matches!(
            index.upsert(unknown).await,
            Err(OrchestrationError::UnknownLane(_))
        ));
    }

    #[tokio::test]
    async fn test_batch_is_validated_before_writing() {
        let index = InMemoryVectorIndex::new(lanes());
        let batch = vec![
            DocumentChunk::new("ok", "a.pdf", "text").with_vector(LOCAL_LANE, unit(384, 0)),
            DocumentChunk::new("bad", "a.pdf", "text").with_vector(LOCAL_LANE, vec![]),
        ];

        assert!(index.upsert_batch(batch).await.is_err());
        assert_eq!(index.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ties_keep_insertion_order_across_overwrites() {
        let index = InMemoryVectorIndex::new(lanes());
        for id in ["first", "second", "third"] {
            index
                .upsert(DocumentChunk::new(id, "a.pdf", id).with_vector(LOCAL_LANE, unit(384, 0)))
                .await
                .unwrap();
        }
        // Overwriting keeps the original position.
        index
            .upsert(DocumentChunk::new("first", "a.pdf", "updated").with_vector(LOCAL_LANE, unit(384, 0)))
            .await
            .unwrap();

        let result = index.search(LOCAL_LANE, &unit(384, 0), 10, None).await.unwrap();
        let ids: Vec<&str> = result.hits().iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
        assert_eq!(result.hits()[0].chunk.text, "updated");
        assert_eq!(index.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_and_lane_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        {
            let index = InMemoryVectorIndex::open(&path, lanes()).await.unwrap();
            index
                .upsert(DocumentChunk::new("c1", "a.pdf", "text").with_vector(LOCAL_LANE, unit(384, 4)))
                .await
                .unwrap();
        }

        let reopened = InMemoryVectorIndex::open(&path, lanes()).await.unwrap();
        assert_eq!(reopened.len().await.unwrap(), 1);
        let result = reopened.search(LOCAL_LANE, &unit(384, 4), 1, None).await.unwrap();
        assert_eq!(result.hits()[0].chunk.id, "c1");

        let changed = vec![LaneSpec::new(LOCAL_LANE, 768)];
        assert!(matches!(
            InMemoryVectorIndex::open(&path, changed).await,
            Err(OrchestrationError::LaneConflict(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_snapshot_write_leaves_index_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("blocked");
        let index = InMemoryVectorIndex::open(blocked.join("index.json"), lanes()).await.unwrap();

        // The snapshot directory can no longer be created.
        std::fs::write(&blocked, b"not a directory").unwrap();

        let chunk = DocumentChunk::new("c1", "a.pdf", "text").with_vector(LOCAL_LANE, unit(384, 2));
        assert!(index.upsert(chunk.clone()).await.is_err());
        assert!(index.upsert_batch(vec![chunk]).await.is_err());

        assert_eq!(index.len().await.unwrap(), 0);
        assert!(index.search(LOCAL_LANE, &unit(384, 2), 3, None).await.unwrap().is_no_signal());
    }

    #[tokio::test]
    async fn test_concurrent_readers() {
        let index = Arc::new(InMemoryVectorIndex::new(lanes()));
        index
            .upsert(DocumentChunk::new("c1", "a.pdf", "text").with_vector(LOCAL_LANE, unit(384, 9)))
            .await
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let index = index.clone();
                tokio::spawn(async move { index.search(LOCAL_LANE, &unit(384, 9), 1, None).await })
            })
            .collect();

        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result.hits()[0].chunk.id, "c1");
        }
    }
}
