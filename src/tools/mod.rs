//! Tool trait and registry
//!
//! Tools are looked up by the router action they serve. One action may
//! map to several tools (one per retrieval lane); the orchestrator runs
//! all of them in the same round.

use crate::models::{ToolInput, ToolOutput};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub mod retrieval;
pub mod web_search;

pub use retrieval::{LaneRetriever, RetrievalTool};
pub use web_search::{SearchProvider, TavilyProvider, WebSearchTool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Retrieve,
    WebSearch,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Retrieve => f.write_str("retrieve"),
            ActionKind::WebSearch => f.write_str("web_search"),
        }
    }
}

/// A single evidence source.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn kind(&self) -> ActionKind;

    /// Stable name used in traces, e.g. `retrieval:local_bge`.
    fn source(&self) -> &str;

    /// Retrieval lane this tool searches, if any.
    fn lane(&self) -> Option<&str> {
        None
    }

    fn description(&self) -> &str;

    async fn invoke(&self, input: &ToolInput) -> Result<ToolOutput>;
}

/// Tool registry keyed by action kind
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<ActionKind, Vec<Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.entry(tool.kind()).or_default().push(tool);
    }

    /// Registration order is preserved.
    pub fn tools_for(&self, kind: ActionKind) -> &[Arc<dyn Tool>] {
        self.tools.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has(&self, kind: ActionKind) -> bool {
        !self.tools_for(kind).is_empty()
    }

    /// Lanes served by registered retrieval tools.
    pub fn retrieval_lanes(&self) -> Vec<&str> {
        self.tools_for(ActionKind::Retrieve)
            .iter()
            .filter_map(|t| t.lane())
            .collect()
    }

    pub fn list(&self) -> Vec<(&str, &str)> {
        let mut out: Vec<(&str, &str)> = self
            .tools
            .values()
            .flatten()
            .map(|t| (t.source(), t.description()))
            .collect();
        out.sort();
        out
    }
}

/// Registry with one retriever per embedded lane plus web search when configured.
pub fn build_registry(
    retrieval: Option<Arc<RetrievalTool>>,
    web: Option<Arc<WebSearchTool>>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    if let Some(retrieval) = retrieval {
        for lane in retrieval.lanes() {
            registry.register(Arc::new(retrieval.lane_handle(&lane)));
        }
    }

    if let Some(web) = web {
        registry.register(web);
    }

    registry
}
