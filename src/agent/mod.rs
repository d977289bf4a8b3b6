//! Main orchestrator - implements the unified loop
//!
//! QUERY → ROUTE → (RETRIEVE | WEB SEARCH) → MERGE → ROUTE ... → SYNTHESIZE
//!
//! Rounds run sequentially; the tools within a round run concurrently.
//! The router is consulted before every round, so the iteration cap is
//! enforced in one place.

use crate::config::AgentSettings;
use crate::error::OrchestrationError;
use crate::execution::{CallStatus, ExecutionEngine, Observation};
use crate::llm::LanguageModel;
use crate::models::{AnswerRecord, Confidence, LaneSpec, QueryOptions, ToolInput};
use crate::prompts::{clean_refined_query, refinement_prompt};
use crate::router::{ExhaustReason, Router, RouterAction};
use crate::state::{AgentState, TraceKind};
use crate::synthesizer::AnswerSynthesizer;
use crate::tools::{ActionKind, ToolRegistry};
use crate::Result;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct Orchestrator {
    router: Router,
    execution_engine: ExecutionEngine,
    synthesizer: AnswerSynthesizer,
    model: Arc<dyn LanguageModel>,
    lanes: Vec<LaneSpec>,
    top_k: usize,
}

impl Orchestrator {
    pub fn new(
        registry: ToolRegistry,
        synthesizer: AnswerSynthesizer,
        model: Arc<dyn LanguageModel>,
        lanes: Vec<LaneSpec>,
        settings: &AgentSettings,
    ) -> Self {
        Self {
            router: Router::new(settings.policy),
            execution_engine: ExecutionEngine::new(registry, settings.tool_timeout),
            synthesizer,
            model,
            lanes,
            top_k: settings.top_k,
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub async fn run(&self, query: &str) -> Result<AnswerRecord> {
        self.run_with(query, &QueryOptions::default(), &CancellationToken::new())
            .await
    }

    /// Answer one query. Cancelling `cancel` stops before the next round and
    /// answers from whatever evidence exists.
    pub async fn run_with(
        &self,
        query: &str,
        options: &QueryOptions,
        cancel: &CancellationToken,
    ) -> Result<AnswerRecord> {
        let query = query.trim();
        if query.is_empty() {
            return Err(OrchestrationError::InvalidInput(
                "query must not be empty".to_string(),
            ));
        }

        let start_time = Instant::now();
        let mut state = self.initial_state(query, options);
        let top_k = options.top_k.unwrap_or(self.top_k).max(1);

        info!(
            query = %query,
            freshness = ?state.freshness,
            lanes = state.lanes.len(),
            web = state.web_enabled,
            "Orchestrator: starting query"
        );

        loop {
            if cancel.is_cancelled() {
                state.push_trace(TraceKind::Cancelled, None, "cancelled before next round");
                state.finish(Some(ExhaustReason::Cancelled));
                warn!(iteration = state.iteration, "Query cancelled");
                break;
            }

            let decision = self.router.decide(&state);
            let action = decision.action;
            debug!(iteration = state.iteration, %action, reason = %decision.reason, "Router decision");
            state.record_decision(decision);

            match action {
                RouterAction::ReadyToAnswer => {
                    state.finish(None);
                    break;
                }
                RouterAction::Exhausted(reason) => {
                    state.finish(Some(reason));
                    break;
                }
                RouterAction::NeedsRetrieval => {
                    if state.retrieval_rounds > 0 {
                        self.refine(&mut state).await;
                    }
                    self.round(&mut state, ActionKind::Retrieve, top_k).await;
                }
                RouterAction::NeedsWebSearch => {
                    self.round(&mut state, ActionKind::WebSearch, top_k).await;
                }
            }
        }

        if state.exhausted == Some(ExhaustReason::SourcesExhausted) && state.all_sources_unavailable() {
            let detail = if state.failures.is_empty() && state.skipped_lanes.is_empty() {
                "no retrieval lane or web search is enabled".to_string()
            } else {
                failure_summary(&state).join("; ")
            };
            warn!(%detail, "No evidence source available");
            return Err(OrchestrationError::NoEvidenceSourceAvailable(detail));
        }

        let answer = self.synthesizer.synthesize(&state.query, &state).await?;
        state.answer = Some(answer.text.clone());
        state.push_trace(
            TraceKind::Synthesized,
            Some(self.model.name().to_string()),
            format!("{} citations", answer.citations.len()),
        );

        let (confidence, low_confidence_reasons) = match state.exhausted {
            None => (Confidence::Normal, Vec::new()),
            Some(reason) => (Confidence::Low, low_confidence_reasons(&state, reason)),
        };

        info!(
            iterations = state.iteration,
            retrieved = state.retrieved().len(),
            web = state.web_snippets().len(),
            %confidence,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Orchestrator: query answered"
        );

        Ok(AnswerRecord {
            query: state.query.clone(),
            text: answer.text,
            citations: answer.citations,
            confidence,
            low_confidence_reasons,
            caveats: failure_summary(&state),
            iterations: state.iteration,
            retrieved_count: state.retrieved().len(),
            web_count: state.web_snippets().len(),
            evidence_trace: state.trace,
        })
    }

    fn initial_state(&self, query: &str, options: &QueryOptions) -> AgentState {
        let registry = self.execution_engine.registry();
        let registered = registry.retrieval_lanes();

        let lanes: Vec<LaneSpec> = self
            .lanes
            .iter()
            .filter(|l| registered.contains(&l.name.as_str()) && options.lane_enabled(&l.name))
            .map(|l| {
                let mut lane = l.clone();
                if let Some(threshold) = options.confidence_thresholds.get(&l.name) {
                    lane.confidence_threshold = *threshold;
                }
                lane
            })
            .collect();

        let web_enabled =
            options.web_search_enabled.unwrap_or(true) && registry.has(ActionKind::WebSearch);
        let max_iterations = options
            .max_iterations
            .unwrap_or(self.router.policy().max_iterations);

        AgentState::new(query, lanes, web_enabled, max_iterations)
    }

    async fn round(&self, state: &mut AgentState, kind: ActionKind, top_k: usize) {
        let input = ToolInput {
            query: state.active_query.clone(),
            top_k,
        };

        let observations = {
            let usable: Vec<String> = state.usable_lanes().iter().map(|l| l.name.clone()).collect();
            self.execution_engine
                .execute_round(kind, &input, |tool| match tool.lane() {
                    Some(lane) => usable.iter().any(|u| u == lane),
                    None => true,
                })
                .await
        };

        for observation in observations {
            self.observe(state, kind, observation);
        }

        match kind {
            ActionKind::Retrieve => state.retrieval_rounds += 1,
            ActionKind::WebSearch => state.web_rounds += 1,
        }
        state.iteration += 1;
    }

    fn observe(&self, state: &mut AgentState, kind: ActionKind, observation: Observation) {
        let Observation {
            source,
            lane,
            status,
            execution_time_ms,
        } = observation;

        let failure = match status {
            CallStatus::Success(output) => {
                if output.no_signal {
                    if let Some(lane) = &lane {
                        state.skip_lane(lane, "no populated vectors in this lane");
                    }
                    return;
                }

                match &lane {
                    Some(lane) => state.mark_lane_answered(lane),
                    None if kind == ActionKind::WebSearch => state.mark_web_answered(),
                    None => {}
                }

                state.push_trace(
                    TraceKind::Evidence,
                    Some(source),
                    format!("{} items in {} ms", output.evidence.len(), execution_time_ms),
                );
                state.absorb(output.evidence);
                return;
            }
            CallStatus::Failed(e) => {
                if !e.is_recoverable() {
                    warn!(source = %source, error = %e, "Unexpected tool error; treating source as failed");
                }
                e.to_string()
            }
            CallStatus::TimedOut => format!(
                "timed out after {} ms",
                self.execution_engine.tool_timeout().as_millis()
            ),
        };

        match (&lane, kind) {
            (Some(lane), _) => {
                state.record_failure(&source, failure.clone());
                state.skip_lane(lane, failure);
            }
            (None, ActionKind::WebSearch) => state.record_web_failure(&source, failure),
            (None, ActionKind::Retrieve) => state.record_failure(&source, failure),
        }
    }

    /// Ask the model for a better search query. Failure keeps the current one.
    async fn refine(&self, state: &mut AgentState) {
        let prompt = refinement_prompt(&state.query, &state.active_query);

        match self.model.complete(&prompt).await {
            Ok(raw) => match clean_refined_query(&raw) {
                Some(refined) if refined != state.active_query => {
                    info!(refined = %refined, "Query refined");
                    state.refine_query(refined);
                }
                _ => debug!("Refinement produced no new query"),
            },
            Err(e) => {
                warn!(error = %e, "Query refinement failed; keeping current query");
                state.push_trace(
                    TraceKind::QueryRefined,
                    Some(self.model.name().to_string()),
                    format!("refinement failed: {}", e),
                );
            }
        }
    }
}

fn failure_summary(state: &AgentState) -> Vec<String> {
    let mut out: Vec<String> = state
        .skipped_lanes
        .iter()
        .map(|s| format!("lane {} skipped: {}", s.lane, s.reason))
        .collect();
    out.extend(
        state
            .failures
            .iter()
            .filter(|f| !f.source.starts_with("retrieval:"))
            .map(|f| format!("{} failed: {}", f.source, f.reason)),
    );
    out
}

fn low_confidence_reasons(state: &AgentState, reason: ExhaustReason) -> Vec<String> {
    let mut reasons = vec![reason.to_string()];

    if state.evidence_count() == 0 {
        reasons.push("no evidence was found".to_string());
    } else if state.confident_chunk_count() == 0 && state.web_snippets().is_empty() {
        reasons.push("no retrieved chunk met its lane's confidence threshold".to_string());
    }

    reasons.extend(failure_summary(state));
    reasons
}
