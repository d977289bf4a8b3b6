//! Qdrant REST adapter using named vectors, one per lane.
//!
//! Point ids are UUIDs derived from chunk ids; the chunk itself (minus its
//! vectors) travels in the payload together with the list of lanes that hold
//! real vectors, which is what searches filter on. Placeholder vectors are
//! never sent. Each point also carries an insertion `seq`, kept across
//! overwrites, that breaks score ties the same way the in-memory index does.

use super::{rank_order, stable_point_id, VectorIndex};
use crate::config::IndexSettings;
use crate::error::OrchestrationError;
use crate::models::{Distance, DocumentChunk, LaneSearch, LaneSpec, ScoredChunk};
use crate::Result;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct QdrantIndex {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    collection: String,
    lanes: Vec<LaneSpec>,
}

impl QdrantIndex {
    pub fn new(settings: &IndexSettings) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(settings.timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: settings.qdrant_url.trim_end_matches('/').to_string(),
            api_key: settings.qdrant_api_key.clone(),
            collection: settings.collection.clone(),
            lanes: settings.lanes.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Value> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| OrchestrationError::IndexError(format!("Qdrant {} failed: {}", what, e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(OrchestrationError::IndexError(format!(
                "Qdrant {} returned {}: {}",
                what, status, body
            )));
        }

        serde_json::from_str(&body).map_err(|e| {
            OrchestrationError::IndexError(format!("Qdrant {} returned invalid JSON: {}", what, e))
        })
    }

    async fn count(&self, filter: Option<Value>) -> Result<usize> {
        let mut body = json!({ "exact": true });
        if let Some(filter) = filter {
            body["filter"] = filter;
        }

        let response = self
            .send(self.client.post(self.url("/points/count")).json(&body), "count")
            .await?;

        let count = response
            .get("result")
            .and_then(|r| r.get("count"))
            .and_then(Value::as_u64)
            .ok_or_else(|| OrchestrationError::IndexError("count response missing result.count".into()))?;
        Ok(count as usize)
    }

    /// Insertion `seq` of points that already exist, keyed by point id.
    async fn existing_seqs(&self, ids: &[uuid::Uuid]) -> Result<HashMap<uuid::Uuid, u64>> {
        let body = json!({ "ids": ids, "with_payload": ["seq"], "with_vector": false });
        let response = self
            .send(self.client.post(self.url("/points")).json(&body), "point lookup")
            .await?;

        let points = response
            .get("result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(points
            .iter()
            .filter_map(|p| {
                let id = p.get("id")?.as_str()?.parse().ok()?;
                let seq = p.pointer("/payload/seq")?.as_u64()?;
                Some((id, seq))
            })
            .collect())
    }

    fn check_existing_lanes(&self, existing: &Value) -> Result<()> {
        let vectors = existing
            .pointer("/result/config/params/vectors")
            .cloned()
            .unwrap_or(Value::Null);

        for lane in &self.lanes {
            let Some(params) = vectors.get(&lane.name) else {
                return Err(OrchestrationError::LaneConflict(format!(
                    "collection '{}' has no vector named '{}'",
                    self.collection, lane.name
                )));
            };
            let params: VectorParams = serde_json::from_value(params.clone())?;
            if params.size != lane.dimension || params.distance != lane.distance {
                return Err(OrchestrationError::LaneConflict(format!(
                    "collection '{}' lane '{}' is {}d/{}, configured {}d/{}",
                    self.collection, lane.name, params.size, params.distance, lane.dimension, lane.distance
                )));
            }
        }
        Ok(())
    }
}

//
// ================= Wire types =================
//

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct VectorParams {
    size: usize,
    distance: Distance,
}

#[derive(Debug, Serialize)]
struct CreateCollection {
    vectors: BTreeMap<String, VectorParams>,
}

#[derive(Debug, Serialize)]
struct PointStruct {
    id: uuid::Uuid,
    vector: BTreeMap<String, Vec<f32>>,
    payload: Value,
}

#[derive(Debug, Serialize)]
struct UpsertPoints {
    points: Vec<PointStruct>,
}

#[derive(Debug, Serialize)]
struct NamedVector<'a> {
    name: &'a str,
    vector: &'a [f32],
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    vector: NamedVector<'a>,
    limit: usize,
    with_payload: bool,
    filter: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    score_threshold: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    score: f32,
    #[serde(default)]
    payload: Option<Value>,
}

fn populated_filter(lane: &str) -> Value {
    json!({ "must": [ { "key": "populated_lanes", "match": { "value": lane } } ] })
}

/// First `seq` for a batch of new points. Leaves room for 1000 points per
/// microsecond so later batches always sort after earlier ones.
fn batch_seq_base() -> u64 {
    (chrono::Utc::now().timestamp_micros().max(0) as u64).saturating_mul(1000)
}

fn to_point(chunk: DocumentChunk, seq: u64) -> Result<PointStruct> {
    let populated = chunk.populated_lanes();
    let vector: BTreeMap<String, Vec<f32>> = chunk
        .vectors
        .iter()
        .filter(|(lane, _)| populated.contains(lane))
        .map(|(lane, v)| (lane.clone(), v.clone()))
        .collect();

    let id = stable_point_id(&chunk.id);
    let stored = DocumentChunk {
        vectors: BTreeMap::new(),
        ..chunk
    };

    Ok(PointStruct {
        id,
        vector,
        payload: json!({
            "chunk_id": stored.id,
            "seq": seq,
            "populated_lanes": populated,
            "chunk": serde_json::to_value(&stored)?,
        }),
    })
}

/// Map a server score onto the "higher is better" scale used everywhere else.
fn normalize_score(distance: Distance, raw: f32) -> f32 {
    match distance {
        Distance::Euclid => 1.0 / (1.0 + raw),
        Distance::Cosine | Distance::Dot => raw,
    }
}

fn parse_hits(lane: &LaneSpec, response: SearchResponse, score_threshold: Option<f32>) -> Vec<ScoredChunk> {
    let mut hits: Vec<(u64, ScoredChunk)> = response
        .result
        .into_iter()
        .filter_map(|point| {
            let payload = point.payload?;
            // Points written without a seq rank last among ties.
            let seq = payload.get("seq").and_then(Value::as_u64).unwrap_or(u64::MAX);
            let chunk_value = payload.get("chunk")?.clone();
            match serde_json::from_value::<DocumentChunk>(chunk_value) {
                Ok(chunk) => Some((
                    seq,
                    ScoredChunk {
                        chunk: Arc::new(chunk),
                        score: normalize_score(lane.distance, point.score),
                        lane: lane.name.clone(),
                    },
                )),
                Err(e) => {
                    warn!(lane = %lane.name, error = %e, "Skipping point with malformed payload");
                    None
                }
            }
        })
        .filter(|(_, hit)| score_threshold.map_or(true, |t| hit.score >= t))
        .collect();

    hits.sort_by(|a, b| rank_order((a.1.score, a.0), (b.1.score, b.0)));
    hits.into_iter().map(|(_, hit)| hit).collect()
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn ensure_collection(&self) -> Result<()> {
        let response = self.authorize(self.client.get(self.url(""))).send().await.map_err(|e| {
            OrchestrationError::IndexError(format!("Qdrant collection lookup failed: {}", e))
        })?;

        if response.status() == StatusCode::NOT_FOUND {
            let body = CreateCollection {
                vectors: self
                    .lanes
                    .iter()
                    .map(|l| {
                        (
                            l.name.clone(),
                            VectorParams {
                                size: l.dimension,
                                distance: l.distance,
                            },
                        )
                    })
                    .collect(),
            };
            self.send(self.client.put(self.url("")).json(&body), "create collection")
                .await?;
            info!(collection = %self.collection, lanes = self.lanes.len(), "Created Qdrant collection");
            return Ok(());
        }

        if !response.status().is_success() {
            return Err(OrchestrationError::IndexError(format!(
                "Qdrant collection lookup returned {}",
                response.status()
            )));
        }

        let existing: Value = response.json().await?;
        self.check_existing_lanes(&existing)
    }

    async fn upsert(&self, chunk: DocumentChunk) -> Result<()> {
        self.upsert_batch(vec![chunk]).await.map(|_| ())
    }

    async fn upsert_batch(&self, chunks: Vec<DocumentChunk>) -> Result<usize> {
        for chunk in &chunks {
            self.validate_chunk(chunk)?;
        }

        let count = chunks.len();
        let ids: Vec<uuid::Uuid> = chunks.iter().map(|c| stable_point_id(&c.id)).collect();
        let existing = self.existing_seqs(&ids).await?;
        let base = batch_seq_base();

        let points = chunks
            .into_iter()
            .zip(ids)
            .enumerate()
            .map(|(i, (chunk, id))| {
                let seq = existing.get(&id).copied().unwrap_or(base + i as u64);
                to_point(chunk, seq)
            })
            .collect::<Result<Vec<_>>>()?;

        // wait=true: the call returns once the write is applied.
        self.send(
            self.client
                .put(self.url("/points?wait=true"))
                .json(&UpsertPoints { points }),
            "upsert",
        )
        .await?;

        debug!(collection = %self.collection, count, "Upserted points");
        Ok(count)
    }

    async fn search(
        &self,
        lane: &str,
        query: &[f32],
        k: usize,
        score_threshold: Option<f32>,
    ) -> Result<LaneSearch> {
        let spec = self.lane(lane)?.clone();
        spec.check_dimension(query)?;

        if crate::models::is_placeholder(query) {
            return Ok(LaneSearch::NoSignal);
        }

        // Euclid thresholds are applied client-side after score normalization.
        let server_threshold = match spec.distance {
            Distance::Euclid => None,
            _ => score_threshold,
        };

        let request = SearchRequest {
            vector: NamedVector { name: lane, vector: query },
            limit: k,
            with_payload: true,
            filter: populated_filter(lane),
            score_threshold: server_threshold,
        };

        let value = self
            .send(self.client.post(self.url("/points/search")).json(&request), "search")
            .await?;
        let response: SearchResponse = serde_json::from_value(value)?;

        let hits = parse_hits(&spec, response, score_threshold);
        if hits.is_empty() && self.count(Some(populated_filter(lane))).await? == 0 {
            return Ok(LaneSearch::NoSignal);
        }

        Ok(LaneSearch::Hits(hits))
    }

    async fn len(&self) -> Result<usize> {
        self.count(None).await
    }

    fn lanes(&self) -> &[LaneSpec] {
        &self.lanes
    }
}
