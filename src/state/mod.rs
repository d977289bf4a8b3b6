//! Per-query agent state
//!
//! Created once per query, mutated by each round, dropped after the
//! answer is returned. Nothing here is shared between queries.
//!
//! Lane merge policy: hits for the same chunk id from different lanes
//! collapse into one `RetrievedChunk` that keeps every lane's score.
//! The representative lane is the one whose score clears its own
//! confidence threshold by the widest margin, so raw scores from
//! different lanes are never compared directly. Lanes that fail or have
//! no signal are recorded in `skipped_lanes`, never dropped silently.

use crate::classifier::{QueryClassifier, QueryFreshness};
use crate::models::{Evidence, LaneSpec, RetrievedChunk, ScoredChunk, WebSnippet};
use crate::router::{ExhaustReason, RouterDecision};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    Decision,
    Evidence,
    LaneSkipped,
    ToolFailed,
    QueryRefined,
    Cancelled,
    Synthesized,
}

/// One entry in the evidence trace returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub iteration: u32,
    pub kind: TraceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub detail: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedLane {
    pub lane: String,
    pub reason: String,
    pub iteration: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFailure {
    pub source: String,
    pub reason: String,
    pub iteration: u32,
}

#[derive(Debug, Clone)]
pub struct AgentState {
    pub query: String,
    /// Query text sent to tools; replaced when refined.
    pub active_query: String,
    pub freshness: QueryFreshness,
    pub max_iterations: u32,
    /// Enabled lanes (with per-query threshold overrides applied).
    pub lanes: Vec<LaneSpec>,
    pub web_enabled: bool,

    pub decisions: Vec<RouterDecision>,
    pub trace: Vec<TraceEvent>,
    pub skipped_lanes: Vec<SkippedLane>,
    pub failures: Vec<ToolFailure>,

    pub iteration: u32,
    pub retrieval_rounds: u32,
    pub web_rounds: u32,

    pub terminal: bool,
    pub exhausted: Option<ExhaustReason>,
    pub answer: Option<String>,

    retrieved: Vec<RetrievedChunk>,
    retrieved_index: HashMap<String, usize>,
    web: Vec<WebSnippet>,
    web_urls: HashSet<String>,
    offline_lanes: BTreeSet<String>,
    answered_lanes: BTreeSet<String>,
    web_offline: bool,
    web_answered: bool,
}

impl AgentState {
    pub fn new(query: impl Into<String>, lanes: Vec<LaneSpec>, web_enabled: bool, max_iterations: u32) -> Self {
        let query = query.into();
        Self {
            freshness: QueryClassifier::classify(&query),
            active_query: query.clone(),
            query,
            max_iterations,
            lanes,
            web_enabled,
            decisions: Vec::new(),
            trace: Vec::new(),
            skipped_lanes: Vec::new(),
            failures: Vec::new(),
            iteration: 0,
            retrieval_rounds: 0,
            web_rounds: 0,
            terminal: false,
            exhausted: None,
            answer: None,
            retrieved: Vec::new(),
            retrieved_index: HashMap::new(),
            web: Vec::new(),
            web_urls: HashSet::new(),
            offline_lanes: BTreeSet::new(),
            answered_lanes: BTreeSet::new(),
            web_offline: false,
            web_answered: false,
        }
    }

    //
    // ================= Evidence =================
    //

    /// Merged chunks in order of first discovery.
    pub fn retrieved(&self) -> &[RetrievedChunk] {
        &self.retrieved
    }

    pub fn web_snippets(&self) -> &[WebSnippet] {
        &self.web
    }

    pub fn evidence_count(&self) -> usize {
        self.retrieved.len() + self.web.len()
    }

    pub fn confident_chunk_count(&self) -> usize {
        self.retrieved.iter().filter(|c| c.is_confident()).count()
    }

    pub fn lane_spec(&self, lane: &str) -> Option<&LaneSpec> {
        self.lanes.iter().find(|l| l.name == lane)
    }

    pub fn absorb(&mut self, evidence: Vec<Evidence>) {
        for item in evidence {
            match item {
                Evidence::Chunk(hit) => self.merge_chunk(hit),
                Evidence::Web(snippet) => self.merge_web(snippet),
            }
        }
    }

    fn merge_chunk(&mut self, hit: ScoredChunk) {
        let threshold = self
            .lane_spec(&hit.lane)
            .map(|l| l.confidence_threshold)
            .unwrap_or(f32::INFINITY);
        let margin = hit.score - threshold;

        match self.retrieved_index.get(&hit.chunk.id) {
            Some(&pos) => {
                let existing = &mut self.retrieved[pos];
                let lane_score = existing.lane_scores.entry(hit.lane.clone()).or_insert(hit.score);
                *lane_score = lane_score.max(hit.score);

                if margin > existing.margin {
                    existing.best_lane = hit.lane;
                    existing.score = hit.score;
                    existing.margin = margin;
                }
            }
            None => {
                self.retrieved_index.insert(hit.chunk.id.clone(), self.retrieved.len());
                self.retrieved.push(RetrievedChunk {
                    lane_scores: [(hit.lane.clone(), hit.score)].into_iter().collect(),
                    best_lane: hit.lane,
                    score: hit.score,
                    margin,
                    chunk: hit.chunk,
                });
            }
        }
    }

    fn merge_web(&mut self, snippet: WebSnippet) {
        if self.web_urls.insert(snippet.url.clone()) {
            self.web.push(snippet);
        }
    }

    //
    // ================= Source availability =================
    //

    /// Enabled lanes that have neither failed nor reported no signal.
    pub fn usable_lanes(&self) -> Vec<&LaneSpec> {
        self.lanes
            .iter()
            .filter(|l| !self.offline_lanes.contains(&l.name))
            .collect()
    }

    pub fn retrieval_usable(&self) -> bool {
        !self.usable_lanes().is_empty()
    }

    pub fn web_usable(&self) -> bool {
        self.web_enabled && !self.web_offline
    }

    pub fn web_failed(&self) -> bool {
        self.web_offline
    }

    /// True when no source ever answered and none is left to ask.
    pub fn all_sources_unavailable(&self) -> bool {
        self.evidence_count() == 0
            && self.answered_lanes.is_empty()
            && !self.web_answered
            && !self.retrieval_usable()
            && !self.web_usable()
    }

    pub fn mark_lane_answered(&mut self, lane: &str) {
        self.answered_lanes.insert(lane.to_string());
    }

    pub fn mark_web_answered(&mut self) {
        self.web_answered = true;
    }

    /// Take a lane out of rotation for the rest of the query and record why.
    pub fn skip_lane(&mut self, lane: &str, reason: impl Into<String>) {
        let reason = reason.into();
        self.offline_lanes.insert(lane.to_string());
        self.push_trace(TraceKind::LaneSkipped, Some(format!("retrieval:{}", lane)), reason.clone());
        self.skipped_lanes.push(SkippedLane {
            lane: lane.to_string(),
            reason,
            iteration: self.iteration,
        });
    }

    pub fn record_web_failure(&mut self, source: &str, reason: impl Into<String>) {
        self.web_offline = true;
        self.record_failure(source, reason);
    }

    pub fn record_failure(&mut self, source: &str, reason: impl Into<String>) {
        let reason = reason.into();
        self.push_trace(TraceKind::ToolFailed, Some(source.to_string()), reason.clone());
        self.failures.push(ToolFailure {
            source: source.to_string(),
            reason,
            iteration: self.iteration,
        });
    }

    //
    // ================= Log =================
    //

    pub fn record_decision(&mut self, decision: RouterDecision) {
        self.push_trace(
            TraceKind::Decision,
            None,
            format!("{}: {}", decision.action, decision.reason),
        );
        self.decisions.push(decision);
    }

    pub fn push_trace(&mut self, kind: TraceKind, source: Option<String>, detail: impl Into<String>) {
        self.trace.push(TraceEvent {
            iteration: self.iteration,
            kind,
            source,
            detail: detail.into(),
            at: Utc::now(),
        });
    }

    pub fn refine_query(&mut self, refined: String) {
        self.push_trace(
            TraceKind::QueryRefined,
            None,
            format!("\"{}\" -> \"{}\"", self.active_query, refined),
        );
        self.active_query = refined;
    }

    pub fn finish(&mut self, exhausted: Option<ExhaustReason>) {
        self.terminal = true;
        self.exhausted = exhausted;
    }
}
