//! Vector index adapter
//!
//! A collection keyed by chunk id where every entry carries one
//! independently-dimensioned vector per lane. Searches run against one
//! lane at a time; lanes never see each other's vectors.

use crate::error::OrchestrationError;
use crate::models::{Distance, DocumentChunk, LaneSearch, LaneSpec};
use crate::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;

pub mod memory;
pub mod qdrant;

pub use memory::InMemoryVectorIndex;
pub use qdrant::QdrantIndex;

/// Trait for vector index backends
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection with the configured lanes, or validate an existing one.
    async fn ensure_collection(&self) -> Result<()>;

    /// Insert or overwrite a chunk; all of its lane vectors become visible together.
    async fn upsert(&self, chunk: DocumentChunk) -> Result<()>;

    /// Validate every chunk, then write them all.
    async fn upsert_batch(&self, chunks: Vec<DocumentChunk>) -> Result<usize>;

    /// Up to `k` hits for `lane`, best first. `NoSignal` when the lane is unusable.
    async fn search(
        &self,
        lane: &str,
        query: &[f32],
        k: usize,
        score_threshold: Option<f32>,
    ) -> Result<LaneSearch>;

    /// Number of stored chunks.
    async fn len(&self) -> Result<usize>;

    fn lanes(&self) -> &[LaneSpec];

    fn lane(&self, name: &str) -> Result<&LaneSpec> {
        self.lanes()
            .iter()
            .find(|l| l.name == name)
            .ok_or_else(|| OrchestrationError::UnknownLane(name.to_string()))
    }

    /// Check every vector in `chunk` against its lane before anything is written.
    fn validate_chunk(&self, chunk: &DocumentChunk) -> Result<()> {
        if chunk.id.trim().is_empty() {
            return Err(OrchestrationError::InvalidInput(
                "chunk id must not be empty".to_string(),
            ));
        }
        for (lane, vector) in &chunk.vectors {
            self.lane(lane)?.check_dimension(vector)?;
        }
        Ok(())
    }
}

/// Similarity under a lane's metric, oriented so higher is better.
///
/// Euclidean distance is mapped to `1 / (1 + d)` so identical vectors score 1.0.
pub fn similarity(distance: Distance, a: &[f32], b: &[f32]) -> f32 {
    match distance {
        Distance::Cosine => cosine_similarity(a, b),
        Distance::Dot => a.iter().zip(b).map(|(x, y)| x * y).sum(),
        Distance::Euclid => {
            let d: f32 = a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt();
            1.0 / (1.0 + d)
        }
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
    }
}

/// Descending score; equal scores keep insertion order.
pub(crate) fn rank_order(a: (f32, u64), b: (f32, u64)) -> Ordering {
    b.0.total_cmp(&a.0).then(a.1.cmp(&b.1))
}

/// Deterministic UUID for a chunk id (stores that only accept UUID/integer keys).
pub fn stable_point_id(chunk_id: &str) -> uuid::Uuid {
    let hash = Sha256::digest(chunk_id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    uuid::Uuid::from_bytes(bytes)
}

/// Hex digest of a chunk's text, used to spot re-ingested duplicates.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_euclid_similarity_peaks_at_one() {
        let v = [0.5, -0.5];
        assert!((similarity(Distance::Euclid, &v, &v) - 1.0).abs() < 1e-6);
        assert!(similarity(Distance::Euclid, &v, &[3.0, 3.0]) < 0.5);
    }

    #[test]
    fn test_rank_order_is_stable_on_ties() {
        let mut items = vec![(0.5, 2), (0.9, 3), (0.5, 1), (0.7, 0)];
        items.sort_by(|a, b| rank_order(*a, *b));
        assert_eq!(items, vec![(0.9, 3), (0.7, 0), (0.5, 1), (0.5, 2)]);
    }

    #[test]
    fn test_stable_point_id() {
        let a = stable_point_id("chunk-1");
        assert_eq!(a, stable_point_id("chunk-1"));
        assert_ne!(a, stable_point_id("chunk-2"));
        assert_eq!(a.get_version_num(), 4);
        assert_eq!(content_hash("abc").len(), 64);
    }
}
