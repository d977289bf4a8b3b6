//! Error types for the reasoning orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Vector Index Errors
    // =============================

    #[error("Dimension mismatch on lane '{lane}': expected {expected}, got {actual}")]
    DimensionMismatch {
        lane: String,
        expected: usize,
        actual: usize,
    },

    #[error("Unknown lane: {0}")]
    UnknownLane(String),

    #[error("Lane conflict: {0}")]
    LaneConflict(String),

    #[error("Index error: {0}")]
    IndexError(String),

    // =============================
    // Tool-level Errors (recoverable)
    // =============================

    #[error("Embedding unavailable for lane '{lane}': {reason}")]
    EmbeddingUnavailable { lane: String, reason: String },

    #[error("Web search unavailable: {0}")]
    SearchUnavailable(String),

    // =============================
    // Query-fatal Errors
    // =============================

    #[error("Language model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("No evidence source available: {0}")]
    NoEvidenceSourceAvailable(String),

    // =============================
    // Input & Configuration
    // =============================

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OrchestrationError {
    /// Tool-level failures the router reroutes around instead of failing the query.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            OrchestrationError::EmbeddingUnavailable { .. }
                | OrchestrationError::SearchUnavailable(_)
        )
    }

    /// Errors that end a query without an answer.
    pub fn is_fatal_for_query(&self) -> bool {
        matches!(
            self,
            OrchestrationError::ModelUnavailable(_)
                | OrchestrationError::NoEvidenceSourceAvailable(_)
        )
    }
}
