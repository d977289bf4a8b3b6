//! Query classifier
//!
//! Classifies queries as either:
//! - TimeSensitive: needs live information (e.g., "latest rate decision", "stock price today")
//! - Archival: answerable from ingested reports (e.g., "net income for fiscal 2024")

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryFreshness {
    TimeSensitive,
    Archival,
}

/// Static keyword lists, matched on word boundaries.
const FRESHNESS_KEYWORDS: &[&str] = &[
    // Recency
    "current", "currently", "latest", "recent", "recently", "today", "tonight",
    "yesterday", "this week", "this month", "right now", "as of now",
    // News flow
    "news", "headline", "breaking", "announced", "update",
    // Live market data
    "live", "real-time", "realtime", "stock price", "share price", "trading at",
];

/// Phrases that anchor a query to a reported period even when a
/// freshness keyword also appears ("latest annual report").
const ARCHIVAL_ANCHORS: &[&str] = &[
    "annual report", "fiscal", "fy20", "quarterly report", "10-k", "10-q", "filing",
];

pub struct QueryClassifier;

impl QueryClassifier {
    pub fn classify(query: &str) -> QueryFreshness {
        let lowered = query.to_lowercase();

        let fresh_score = FRESHNESS_KEYWORDS
            .iter()
            .filter(|kw| contains_word(&lowered, kw))
            .count();

        let anchored = ARCHIVAL_ANCHORS.iter().any(|kw| lowered.contains(kw));

        if fresh_score >= 2 || (fresh_score == 1 && !anchored) {
            QueryFreshness::TimeSensitive
        } else {
            QueryFreshness::Archival
        }
    }
}

/// Whole-word (or whole-phrase) match, so "update" does not fire on "updated".
fn contains_word(text: &str, needle: &str) -> bool {
    text.match_indices(needle).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + needle.len()..].chars().next();
        let boundary = |c: Option<char>| c.map_or(true, |c| !c.is_alphanumeric());
        boundary(before) && boundary(after)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_sensitive_queries() {
        let cases = vec![
            "What is the latest news on CIBC?",
            "current prime rate",
            "how is the stock price doing today",
            "what did the Bank of Canada announce this week",
        ];

        for c in cases {
            assert_eq!(QueryClassifier::classify(c), QueryFreshness::TimeSensitive, "{}", c);
        }
    }

    #[test]
    fn test_archival_queries() {
        let cases = vec![
            "What was CIBC's net income for the full year 2025?",
            "Summarize the capital markets segment results",
            "explain the CET1 ratio",
            "What does the latest annual report say about credit losses?",
        ];

        for c in cases {
            assert_eq!(QueryClassifier::classify(c), QueryFreshness::Archival, "{}", c);
        }
    }

    #[test]
    fn test_word_boundaries() {
        assert!(!contains_word("the updated guidance", "update"));
        assert!(contains_word("any update?", "update"));
        assert!(contains_word("news", "news"));
    }
}
