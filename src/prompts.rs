//! Prompt templates

/// System instruction sent with every model call.
pub const SYSTEM_PROMPT: &str = r#"You are a financial reasoning assistant.

You answer from a local knowledge base of financial documents and from web
search results supplied to you as numbered evidence.

Guidelines:
- Prefer the knowledge base for reported figures and historical facts
- Prefer web results for current events, latest news and market data
- Cite every fact with the [n] marker of the evidence it came from
- Say plainly when the evidence does not contain the answer"#;

/// Rendered evidence block plus the question.
pub fn answer_prompt(query: &str, context: &str) -> String {
    format!(
        r#"Answer the user's query using only the numbered evidence below.

EVIDENCE:
{}

QUERY: {}

Instructions:
1. Combine information from all relevant evidence items
2. Give specific figures, dates and names when the evidence has them
3. Put the [n] marker after every sentence that relies on evidence item n
4. If the evidence is insufficient, say what is missing
5. Keep the answer focused on the query

ANSWER:"#,
        context, query
    )
}

/// Ask for a broader search query after weak retrieval.
pub fn refinement_prompt(original_query: &str, current_query: &str) -> String {
    format!(
        r#"The user asked: "{}"

The search query "{}" returned weak results from the knowledge base.
Write ONE improved search query that:
1. Expands key terms with synonyms
2. Adds relevant financial terminology (e.g. fiscal year, net income, segment)
3. Keeps the original intent

Return only the query text, with no explanation or quotes."#,
        original_query, current_query
    )
}

/// Strip labels, quotes and extra lines a model may wrap a refined query in.
pub fn clean_refined_query(raw: &str) -> Option<String> {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())?;

    let line = line
        .strip_prefix("Refined query:")
        .or_else(|| line.strip_prefix("Query:"))
        .unwrap_or(line)
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim();

    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}
