//! Answer synthesizer
//!
//! Packages evidence in a fixed order, numbers it `[1]..[n]`, asks the
//! model for an answer and keeps citations for the markers it used.
//! Order: chunks by best-lane priority, then score descending, then chunk
//! id; web snippets after, by rank.

use crate::config::SynthesisSettings;
use crate::llm::LanguageModel;
use crate::models::{Citation, CitationKind, RetrievedChunk, WebSnippet};
use crate::prompts::answer_prompt;
use crate::state::AgentState;
use crate::Result;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

const NO_EVIDENCE: &str = "No evidence was gathered for this query.";

#[derive(Debug, Clone)]
pub struct SynthesizedAnswer {
    pub text: String,
    pub citations: Vec<Citation>,
}

/// Evidence rendered for the prompt, with one citation per numbered item.
#[derive(Debug, Clone)]
pub struct PreparedEvidence {
    pub context: String,
    pub citations: Vec<Citation>,
}

pub struct AnswerSynthesizer {
    model: Arc<dyn LanguageModel>,
    settings: SynthesisSettings,
}

impl AnswerSynthesizer {
    pub fn new(model: Arc<dyn LanguageModel>, settings: SynthesisSettings) -> Self {
        Self { model, settings }
    }

    pub fn prepare(&self, state: &AgentState) -> PreparedEvidence {
        let mut chunks: Vec<&RetrievedChunk> = state.retrieved().iter().collect();
        chunks.sort_by(|a, b| {
            lane_priority(state, &a.best_lane)
                .cmp(&lane_priority(state, &b.best_lane))
                .then_with(|| b.score.total_cmp(&a.score))
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        chunks.truncate(self.settings.max_chunks);

        let mut web: Vec<&WebSnippet> = state.web_snippets().iter().collect();
        web.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.url.cmp(&b.url)));
        web.truncate(self.settings.max_web_results);

        let mut blocks = Vec::with_capacity(chunks.len() + web.len());
        let mut citations = Vec::with_capacity(chunks.len() + web.len());

        for chunk in chunks {
            let marker = citations.len() + 1;
            let label = chunk.chunk.location_label();
            blocks.push(format!(
                "[{}] Knowledge base: {} (lane {}, score {:.3})\n{}",
                marker,
                label,
                chunk.best_lane,
                chunk.score,
                excerpt(&chunk.chunk.text, self.settings.excerpt_chars)
            ));
            citations.push(Citation {
                marker,
                kind: CitationKind::Chunk,
                reference: format!("chunk:{}", chunk.chunk.id),
                label,
            });
        }

        for snippet in web {
            let marker = citations.len() + 1;
            blocks.push(format!(
                "[{}] Web: {} ({})\n{}",
                marker,
                snippet.title,
                snippet.url,
                excerpt(&snippet.content, self.settings.excerpt_chars)
            ));
            citations.push(Citation {
                marker,
                kind: CitationKind::Web,
                reference: snippet.url.clone(),
                label: snippet.title.clone(),
            });
        }

        let context = if blocks.is_empty() {
            NO_EVIDENCE.to_string()
        } else {
            blocks.join("\n\n")
        };

        PreparedEvidence { context, citations }
    }

    pub async fn synthesize(&self, query: &str, state: &AgentState) -> Result<SynthesizedAnswer> {
        let prepared = self.prepare(state);
        debug!(items = prepared.citations.len(), "Evidence packaged");

        let text = self
            .model
            .complete(&answer_prompt(query, &prepared.context))
            .await?;
        let text = text.trim().to_string();

        let used = cited_markers(&text, prepared.citations.len());
        info!(
            model = self.model.name(),
            presented = prepared.citations.len(),
            cited = used.len(),
            "Answer synthesized"
        );

        if used.is_empty() {
            if prepared.citations.is_empty() {
                return Ok(SynthesizedAnswer { text, citations: Vec::new() });
            }
            let footer = sources_footer(&prepared.citations);
            return Ok(SynthesizedAnswer {
                text: format!("{}\n\n{}", text, footer),
                citations: prepared.citations,
            });
        }

        let citations = prepared
            .citations
            .into_iter()
            .filter(|c| used.contains(&c.marker))
            .collect();

        Ok(SynthesizedAnswer { text, citations })
    }
}

fn lane_priority(state: &AgentState, lane: &str) -> u32 {
    state.lane_spec(lane).map(|l| l.priority).unwrap_or(u32::MAX)
}

/// First `max_chars` characters, on a char boundary.
fn excerpt(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", text[..cut].trim_end()),
        None => text.to_string(),
    }
}

/// Markers `[n]` (and `[n, m]`) in `text` that refer to presented items.
fn cited_markers(text: &str, presented: usize) -> BTreeSet<usize> {
    let mut found = BTreeSet::new();
    let mut rest = text;

    while let Some(open) = rest.find('[') {
        rest = &rest[open + 1..];
        let Some(close) = rest.find(']') else { break };
        let inner = &rest[..close];

        let numbers: Option<Vec<usize>> = inner
            .split(',')
            .map(|part| part.trim().parse::<usize>().ok())
            .collect();
        if let Some(numbers) = numbers {
            found.extend(numbers.into_iter().filter(|n| (1..=presented).contains(n)));
        }

        rest = &rest[close + 1..];
    }

    found
}

fn sources_footer(citations: &[Citation]) -> String {
    let lines: Vec<String> = citations
        .iter()
        .map(|c| match c.kind {
            CitationKind::Chunk => format!("[{}] {} ({})", c.marker, c.label, c.reference),
            CitationKind::Web => format!("[{}] {} {}", c.marker, c.label, c.reference),
        })
        .collect();
    format!("Sources:\n{}", lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestrationError;
    use crate::models::{DocumentChunk, Evidence, LaneSpec, ScoredChunk, CLOUD_LANE, LOCAL_LANE};
    use crate::testing::StubModel;

    fn settings() -> SynthesisSettings {
        SynthesisSettings {
            excerpt_chars: 20,
            max_chunks: 6,
            max_web_results: 5,
        }
    }

    fn state() -> AgentState {
        let mut state = AgentState::new(
            "What was net income?",
            vec![
                LaneSpec::new(LOCAL_LANE, 3).with_threshold(0.5),
                LaneSpec::new(CLOUD_LANE, 3).with_threshold(0.3).with_priority(1),
            ],
            true,
            5,
        );
        let hit = |id: &str, lane: &str, score: f32| {
            Evidence::Chunk(ScoredChunk {
                chunk: Arc::new(DocumentChunk::new(id, "fy2025.pdf", format!("Chunk {} text", id)).with_page(3)),
                score,
                lane: lane.to_string(),
            })
        };
        state.absorb(vec![
            hit("b", CLOUD_LANE, 0.95),
            hit("c", LOCAL_LANE, 0.7),
            hit("a", LOCAL_LANE, 0.7),
            hit("d", LOCAL_LANE, 0.9),
        ]);
        state.absorb(vec![Evidence::Web(WebSnippet {
            title: "CIBC results".into(),
            url: "https://news.example/cibc".into(),
            content: "x".repeat(100),
            score: 0.8,
            rank: 1,
        })]);
        state
    }

    #[test]
    fn test_evidence_order_is_deterministic() {
        let synthesizer = AnswerSynthesizer::new(Arc::new(StubModel::answering("ok")), settings());
        let prepared = synthesizer.prepare(&state());

        let refs: Vec<&str> = prepared.citations.iter().map(|c| c.reference.as_str()).collect();
        assert_eq!(
            refs,
            vec!["chunk:d", "chunk:a", "chunk:c", "chunk:b", "https://news.example/cibc"]
        );
        assert_eq!(prepared.citations[4].marker, 5);
        assert!(prepared.context.contains("[1] Knowledge base: fy2025.pdf p.3"));
        assert!(prepared.context.contains(&format!("{}...", "x".repeat(20))));
    }

    #[tokio::test]
    async fn test_only_referenced_items_are_cited() {
        let model = Arc::new(StubModel::answering("Net income was $7.2B [1], up from last year [2, 5]. [9]"));
        let synthesizer = AnswerSynthesizer::new(model.clone(), settings());

        let answer = synthesizer.synthesize("What was net income?", &state()).await.unwrap();
        let markers: Vec<usize> = answer.citations.iter().map(|c| c.marker).collect();
        assert_eq!(markers, vec![1, 2, 5]);
        assert!(!answer.text.contains("Sources:"));
        assert!(model.prompts()[0].contains("QUERY: What was net income?"));
    }

    #[tokio::test]
    async fn test_unreferenced_answer_gets_sources_footer() {
        let synthesizer =
            AnswerSynthesizer::new(Arc::new(StubModel::answering("Net income was $7.2B.")), settings());

        let answer = synthesizer.synthesize("q", &state()).await.unwrap();
        assert_eq!(answer.citations.len(), 5);
        assert!(answer.text.contains("Sources:\n[1] fy2025.pdf p.3 (chunk:d)"));
        assert!(answer.text.contains("[5] CIBC results https://news.example/cibc"));
    }

    #[tokio::test]
    async fn test_no_evidence_answer_has_no_citations() {
        let model = Arc::new(StubModel::answering("I could not find this [1]."));
        let synthesizer = AnswerSynthesizer::new(model.clone(), settings());
        let empty = AgentState::new("q", Vec::new(), false, 5);

        let answer = synthesizer.synthesize("q", &empty).await.unwrap();
        assert!(answer.citations.is_empty());
        assert!(model.prompts()[0].contains(NO_EVIDENCE));
    }

    #[tokio::test]
    async fn test_model_unavailable_propagates() {
        let synthesizer = AnswerSynthesizer::new(Arc::new(StubModel::failing()), settings());
        let err = synthesizer.synthesize("q", &state()).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::ModelUnavailable(_)));
    }

    #[test]
    fn test_marker_parsing() {
        let found = cited_markers("a [1] b [2,3] c [x] d [10] e [", 4);
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(excerpt("héllo wörld", 5), "héllo...");
        assert_eq!(excerpt("short", 10), "short");
    }
}
