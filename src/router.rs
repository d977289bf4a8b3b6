//! Router
//!
//! Pure decision function over `AgentState`: same state in, same decision
//! out. No I/O, no clock. Rules are evaluated in order and the first match
//! wins:
//!
//! 1. iteration budget spent             -> Exhausted(IterationBudget)
//! 2. evidence is sufficient             -> ReadyToAnswer
//! 3. retrieval usable, never attempted  -> NeedsRetrieval
//! 4. web usable, rounds left, and retrieval is weak or the query is
//!    time-sensitive without web evidence -> NeedsWebSearch
//! 5. retrieval usable, rounds left      -> NeedsRetrieval (refined query)
//! 6. otherwise                          -> Exhausted(SourcesExhausted)

use crate::classifier::QueryFreshness;
use crate::state::AgentState;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustReason {
    IterationBudget,
    SourcesExhausted,
    Cancelled,
}

impl fmt::Display for ExhaustReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExhaustReason::IterationBudget => "iteration budget reached",
            ExhaustReason::SourcesExhausted => "evidence sources exhausted",
            ExhaustReason::Cancelled => "query cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "reason", rename_all = "snake_case")]
pub enum RouterAction {
    NeedsRetrieval,
    NeedsWebSearch,
    ReadyToAnswer,
    Exhausted(ExhaustReason),
}

impl RouterAction {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RouterAction::ReadyToAnswer | RouterAction::Exhausted(_))
    }
}

impl fmt::Display for RouterAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterAction::NeedsRetrieval => f.write_str("needs_retrieval"),
            RouterAction::NeedsWebSearch => f.write_str("needs_web_search"),
            RouterAction::ReadyToAnswer => f.write_str("ready_to_answer"),
            RouterAction::Exhausted(reason) => write!(f, "exhausted ({})", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterDecision {
    pub iteration: u32,
    pub action: RouterAction,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterPolicy {
    pub max_iterations: u32,
    /// Confident chunks needed to answer from the knowledge base alone.
    pub min_supporting_chunks: usize,
    pub max_retrieval_rounds: u32,
    pub max_web_rounds: u32,
}

impl Default for RouterPolicy {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            min_supporting_chunks: 2,
            max_retrieval_rounds: 2,
            max_web_rounds: 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Router {
    policy: RouterPolicy,
}

impl Router {
    pub fn new(policy: RouterPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RouterPolicy {
        &self.policy
    }

    pub fn decide(&self, state: &AgentState) -> RouterDecision {
        let (action, reason) = self.evaluate(state);
        RouterDecision {
            iteration: state.iteration,
            action,
            reason,
        }
    }

    fn evaluate(&self, state: &AgentState) -> (RouterAction, String) {
        let policy = &self.policy;

        if state.iteration >= state.max_iterations {
            return (
                RouterAction::Exhausted(ExhaustReason::IterationBudget),
                format!("{} of {} iterations used", state.iteration, state.max_iterations),
            );
        }

        let confident = state.confident_chunk_count();
        let web_hits = state.web_snippets().len();
        let needs_fresh = state.freshness == QueryFreshness::TimeSensitive
            && state.web_usable()
            && state.web_rounds < policy.max_web_rounds
            && web_hits == 0;

        if !needs_fresh {
            if confident >= policy.min_supporting_chunks {
                return (
                    RouterAction::ReadyToAnswer,
                    format!("{} confident chunks", confident),
                );
            }
            if web_hits > 0 && confident > 0 {
                return (
                    RouterAction::ReadyToAnswer,
                    format!("{} confident chunks corroborated by {} web results", confident, web_hits),
                );
            }
            if web_hits > 0 && !state.retrieval_usable() {
                return (
                    RouterAction::ReadyToAnswer,
                    format!("{} web results, knowledge base unavailable", web_hits),
                );
            }
        }

        let retrieval_usable = state.retrieval_usable();

        if retrieval_usable && state.retrieval_rounds == 0 {
            return (
                RouterAction::NeedsRetrieval,
                "knowledge base not searched yet".to_string(),
            );
        }

        let weak = confident < policy.min_supporting_chunks;
        if state.web_usable() && state.web_rounds < policy.max_web_rounds && (weak || needs_fresh) {
            let reason = if needs_fresh {
                "time-sensitive query without web evidence".to_string()
            } else if !retrieval_usable {
                "knowledge base unavailable".to_string()
            } else {
                format!(
                    "retrieval weak ({} of {} confident chunks)",
                    confident, policy.min_supporting_chunks
                )
            };
            return (RouterAction::NeedsWebSearch, reason);
        }

        if retrieval_usable && state.retrieval_rounds < policy.max_retrieval_rounds {
            return (
                RouterAction::NeedsRetrieval,
                format!(
                    "retrying with refined query ({} of {} confident chunks)",
                    confident, policy.min_supporting_chunks
                ),
            );
        }

        (
            RouterAction::Exhausted(ExhaustReason::SourcesExhausted),
            format!("no source left to try ({} confident chunks)", confident),
        )
    }
}
