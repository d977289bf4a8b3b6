//! Execution engine for one orchestrator round
//!
//! Every tool selected for the round runs concurrently, each under its
//! own timeout. A failing or slow tool becomes a `CallStatus` entry; it
//! never aborts the other calls in the round.

use crate::error::OrchestrationError;
use crate::models::{ToolInput, ToolOutput};
use crate::tools::{ActionKind, Tool, ToolRegistry};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug)]
pub enum CallStatus {
    Success(ToolOutput),
    Failed(OrchestrationError),
    TimedOut,
}

/// What one tool call produced.
#[derive(Debug)]
pub struct Observation {
    pub source: String,
    pub lane: Option<String>,
    pub status: CallStatus,
    pub execution_time_ms: u64,
}

pub struct ExecutionEngine {
    tool_registry: ToolRegistry,
    tool_timeout: Duration,
}

impl ExecutionEngine {
    pub fn new(tool_registry: ToolRegistry, tool_timeout: Duration) -> Self {
        Self {
            tool_registry,
            tool_timeout,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.tool_registry
    }

    pub fn tool_timeout(&self) -> Duration {
        self.tool_timeout
    }

    /// Run every tool registered for `kind` that `eligible` accepts.
    pub async fn execute_round<F>(&self, kind: ActionKind, input: &ToolInput, eligible: F) -> Vec<Observation>
    where
        F: Fn(&dyn Tool) -> bool,
    {
        let tools: Vec<Arc<dyn Tool>> = self
            .tool_registry
            .tools_for(kind)
            .iter()
            .filter(|tool| eligible(tool.as_ref()))
            .cloned()
            .collect();

        debug!(%kind, tools = tools.len(), query = %input.query, "Starting round");

        let calls = tools.iter().map(|tool| self.call(Arc::clone(tool), input));
        join_all(calls).await
    }

    async fn call(&self, tool: Arc<dyn Tool>, input: &ToolInput) -> Observation {
        let start = Instant::now();

        let status = match tokio::time::timeout(self.tool_timeout, tool.invoke(input)).await {
            Ok(Ok(output)) => CallStatus::Success(output),
            Ok(Err(e)) => {
                warn!(source = tool.source(), error = %e, "Tool call failed");
                CallStatus::Failed(e)
            }
            Err(_) => {
                warn!(
                    source = tool.source(),
                    timeout_ms = self.tool_timeout.as_millis() as u64,
                    "Tool call timed out"
                );
                CallStatus::TimedOut
            }
        };

        Observation {
            source: tool.source().to_string(),
            lane: tool.lane().map(str::to_string),
            status,
            execution_time_ms: start.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::WebSearchTool;
    use crate::testing::StubSearch;

    fn engine(search: StubSearch, timeout: Duration) -> ExecutionEngine {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(WebSearchTool::new(Arc::new(search), 5)));
        ExecutionEngine::new(registry, timeout)
    }

    fn input() -> ToolInput {
        ToolInput {
            query: "latest bank news".into(),
            top_k: 3,
        }
    }

    #[tokio::test]
    async fn test_successful_round() {
        let engine = engine(StubSearch::with_results(2), Duration::from_secs(1));
        let observations = engine.execute_round(ActionKind::WebSearch, &input(), |_| true).await;

        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].source, "web_search");
        assert!(matches!(&observations[0].status, CallStatus::Success(out) if out.evidence.len() == 2));
    }

    #[tokio::test]
    async fn test_failure_and_timeout_are_observations() {
        let failing = engine(StubSearch::failing(), Duration::from_secs(1));
        let observations = failing.execute_round(ActionKind::WebSearch, &input(), |_| true).await;
        assert!(matches!(observations[0].status, CallStatus::Failed(_)));

        let slow = engine(
            StubSearch::with_results(1).slow(Duration::from_millis(200)),
            Duration::from_millis(20),
        );
        let observations = slow.execute_round(ActionKind::WebSearch, &input(), |_| true).await;
        assert!(matches!(observations[0].status, CallStatus::TimedOut));
    }

    #[tokio::test]
    async fn test_filter_and_missing_kind() {
        let engine = engine(StubSearch::with_results(1), Duration::from_secs(1));
        assert!(engine
            .execute_round(ActionKind::WebSearch, &input(), |_| false)
            .await
            .is_empty());
        assert!(engine
            .execute_round(ActionKind::Retrieve, &input(), |_| true)
            .await
            .is_empty());
    }
}
