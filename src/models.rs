//! Core data models for the reasoning agent

use crate::error::OrchestrationError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

//
// ================= Lanes =================
//

/// Distance metric a lane is indexed with. Names follow the Qdrant wire format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Distance {
    #[default]
    Cosine,
    Dot,
    Euclid,
}

/// A named embedding channel with fixed dimensionality.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LaneSpec {
    pub name: String,
    pub dimension: usize,
    #[serde(default)]
    pub distance: Distance,
    /// Synthesis ordering; lower lanes are presented first.
    #[serde(default)]
    pub priority: u32,
    /// Minimum score for a hit on this lane to count as confident.
    pub confidence_threshold: f32,
}

pub const LOCAL_LANE: &str = "local_bge";
pub const CLOUD_LANE: &str = "openai";

impl LaneSpec {
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            dimension,
            distance: Distance::Cosine,
            priority: 0,
            confidence_threshold: 0.5,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_distance(mut self, distance: Distance) -> Self {
        self.distance = distance;
        self
    }

    /// 384-dim local BGE lane.
    pub fn local_default() -> Self {
        Self::new(LOCAL_LANE, 384).with_priority(0).with_threshold(0.55)
    }

    /// 1536-dim hosted embedding lane.
    pub fn cloud_default() -> Self {
        Self::new(CLOUD_LANE, 1536).with_priority(1).with_threshold(0.40)
    }

    /// Name, dimension and metric are what a collection is created with.
    pub fn same_geometry(&self, other: &LaneSpec) -> bool {
        self.name == other.name
            && self.dimension == other.dimension
            && self.distance == other.distance
    }

    pub fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(OrchestrationError::DimensionMismatch {
                lane: self.name.clone(),
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

/// An all-zero vector marks a lane that has not been populated yet.
pub fn is_placeholder(vector: &[f32]) -> bool {
    vector.iter().all(|v| *v == 0.0)
}

//
// ================= Chunks =================
//

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiscal_year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Immutable unit of ingested content carrying one vector per lane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentChunk {
    pub id: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    pub text: String,
    #[serde(default)]
    pub vectors: BTreeMap<String, Vec<f32>>,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

impl DocumentChunk {
    pub fn new(id: impl Into<String>, source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            locator: None,
            text: text.into(),
            vectors: BTreeMap::new(),
            metadata: ChunkMetadata::default(),
        }
    }

    pub fn with_vector(mut self, lane: impl Into<String>, vector: Vec<f32>) -> Self {
        self.vectors.insert(lane.into(), vector);
        self
    }

    pub fn with_locator(mut self, locator: impl Into<String>) -> Self {
        self.locator = Some(locator.into());
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.metadata.page_number = Some(page);
        self
    }

    /// True when the lane holds a real (non-placeholder) vector.
    pub fn has_signal(&self, lane: &str) -> bool {
        self.vectors
            .get(lane)
            .map(|v| !v.is_empty() && !is_placeholder(v))
            .unwrap_or(false)
    }

    /// Lanes carrying real vectors, in lane-name order.
    pub fn populated_lanes(&self) -> Vec<String> {
        self.vectors
            .keys()
            .filter(|lane| self.has_signal(lane))
            .cloned()
            .collect()
    }

    /// Human-readable position, e.g. `annual-report.pdf p.12`.
    pub fn location_label(&self) -> String {
        match (&self.locator, self.metadata.page_number) {
            (Some(locator), _) => format!("{} {}", self.source, locator),
            (None, Some(page)) => format!("{} p.{}", self.source, page),
            (None, None) => self.source.clone(),
        }
    }
}

//
// ================= Retrieval =================
//

/// One ranked hit from a single lane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Arc<DocumentChunk>,
    pub score: f32,
    pub lane: String,
}

/// Outcome of a lane search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", content = "hits", rename_all = "snake_case")]
pub enum LaneSearch {
    /// Ranked hits; empty means nothing met the threshold.
    Hits(Vec<ScoredChunk>),
    /// The lane has no populated vectors (or the query was a placeholder).
    NoSignal,
}

impl LaneSearch {
    pub fn hits(&self) -> &[ScoredChunk] {
        match self {
            LaneSearch::Hits(hits) => hits,
            LaneSearch::NoSignal => &[],
        }
    }

    pub fn is_no_signal(&self) -> bool {
        matches!(self, LaneSearch::NoSignal)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebSnippet {
    pub title: String,
    pub url: String,
    pub content: String,
    pub score: f32,
    pub rank: usize,
}

/// A retrieved chunk after merging all lanes that returned it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk: Arc<DocumentChunk>,
    pub lane_scores: BTreeMap<String, f32>,
    pub best_lane: String,
    pub score: f32,
    /// `score - threshold(best_lane)`; the cross-lane comparison key.
    pub margin: f32,
}

impl RetrievedChunk {
    pub fn is_confident(&self) -> bool {
        self.margin >= 0.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Evidence {
    Chunk(ScoredChunk),
    Web(WebSnippet),
}

//
// ================= Tool I/O =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInput {
    pub query: String,
    pub top_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub source: String,
    pub evidence: Vec<Evidence>,
    /// Set by retrieval lanes that cannot produce meaningful scores yet.
    #[serde(default)]
    pub no_signal: bool,
}

//
// ================= Query & Answer =================
//

/// Per-query overrides of the configured defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    pub max_iterations: Option<u32>,
    /// Lane enable flags; lanes not listed keep their default (enabled).
    pub lanes: BTreeMap<String, bool>,
    pub web_search_enabled: Option<bool>,
    /// Per-lane confidence threshold overrides.
    pub confidence_thresholds: BTreeMap<String, f32>,
    pub top_k: Option<usize>,
}

impl QueryOptions {
    pub fn lane_enabled(&self, lane: &str) -> bool {
        self.lanes.get(lane).copied().unwrap_or(true)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Normal,
    Low,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CitationKind {
    Chunk,
    Web,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    /// The `[n]` marker the evidence was presented under.
    pub marker: usize,
    pub kind: CitationKind,
    /// `chunk:<id>` or the source URL.
    pub reference: String,
    pub label: String,
}

/// What the caller receives for every answered query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub query: String,
    pub text: String,
    pub citations: Vec<Citation>,
    pub confidence: Confidence,
    pub low_confidence_reasons: Vec<String>,
    /// Skipped lanes and failed sources, reported even for normal answers.
    #[serde(default)]
    pub caveats: Vec<String>,
    pub evidence_trace: Vec<crate::state::TraceEvent>,
    pub iterations: u32,
    pub retrieved_count: usize,
    pub web_count: usize,
}

impl AnswerRecord {
    pub fn is_low_confidence(&self) -> bool {
        self.confidence == Confidence::Low
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Distance::Cosine => "Cosine",
            Distance::Dot => "Dot",
            Distance::Euclid => "Euclid",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Confidence::Normal => "normal",
            Confidence::Low => "low",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_detection() {
        assert!(is_placeholder(&[0.0; 8]));
        assert!(!is_placeholder(&[0.0, 0.1, 0.0]));

        let chunk = DocumentChunk::new("c1", "report.pdf", "net income")
            .with_vector(LOCAL_LANE, vec![0.2, 0.4])
            .with_vector(CLOUD_LANE, vec![0.0, 0.0]);

        assert!(chunk.has_signal(LOCAL_LANE));
        assert!(!chunk.has_signal(CLOUD_LANE));
        assert!(!chunk.has_signal("missing"));
        assert_eq!(chunk.populated_lanes(), vec![LOCAL_LANE.to_string()]);
    }

    #[test]
    fn test_lane_dimension_check() {
        let lane = LaneSpec::new("tiny", 3);
        assert!(lane.check_dimension(&[1.0, 2.0, 3.0]).is_ok());
        assert!(matches!(
            lane.check_dimension(&[1.0]),
            Err(OrchestrationError::DimensionMismatch { expected: 3, actual: 1, .. })
        ));
    }

    #[test]
    fn test_chunk_deserializes_with_defaults() {
        let chunk: DocumentChunk = serde_json::from_str(
            r#"{"id":"c9","source":"fy2025.pdf","text":"Revenue grew","metadata":{"page_number":4}}"#,
        )
        .unwrap();

        assert!(chunk.vectors.is_empty());
        assert_eq!(chunk.location_label(), "fy2025.pdf p.4");
    }

    #[test]
    fn test_query_options_lane_defaults() {
        let mut options = QueryOptions::default();
        assert!(options.lane_enabled(CLOUD_LANE));
        options.lanes.insert(CLOUD_LANE.to_string(), false);
        assert!(!options.lane_enabled(CLOUD_LANE));
    }
}
