//! Typed settings loaded from the environment (and `.env`).
//!
//! Every component receives only its own section.

use crate::error::OrchestrationError;
use crate::models::LaneSpec;
use crate::router::RouterPolicy;
use crate::Result;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexBackend {
    Memory,
    Qdrant,
}

#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub backend: IndexBackend,
    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    pub collection: String,
    /// Snapshot file for the in-memory backend.
    pub snapshot_path: Option<PathBuf>,
    pub lanes: Vec<LaneSpec>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    Ollama,
    Gemini,
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: LlmProvider,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    pub ollama_base_url: String,
    pub local_model: String,
    pub openai_base_url: String,
    pub openai_api_key: Option<String>,
    pub cloud_model: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub base_url: String,
    pub tavily_api_key: Option<String>,
    pub max_results: usize,
    pub search_depth: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub policy: RouterPolicy,
    pub top_k: usize,
    pub tool_timeout: Duration,
    /// Optional floor applied inside the index search itself.
    pub min_search_score: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct SynthesisSettings {
    pub excerpt_chars: usize,
    pub max_chunks: usize,
    pub max_web_results: usize,
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub batch_size: usize,
    pub embed_missing: bool,
    pub placeholder_missing: bool,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub index: IndexSettings,
    pub llm: LlmSettings,
    pub embedding: EmbeddingSettings,
    pub search: SearchSettings,
    pub agent: AgentSettings,
    pub synthesis: SynthesisSettings,
    pub ingest: IngestSettings,
    pub api: ApiSettings,
}

impl Settings {
    /// Load `.env` (if present) and read the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let backend = match vars.string("INDEX_BACKEND", "memory").to_lowercase().as_str() {
            "memory" | "in_memory" => IndexBackend::Memory,
            "qdrant" => IndexBackend::Qdrant,
            other => {
                return Err(OrchestrationError::InvalidConfig(format!(
                    "INDEX_BACKEND must be 'memory' or 'qdrant', got '{}'",
                    other
                )))
            }
        };

        let local = LaneSpec::local_default();
        let cloud = LaneSpec::cloud_default();
        let lanes = vec![
            LaneSpec {
                dimension: vars.parse("LOCAL_LANE_DIM", local.dimension)?,
                confidence_threshold: vars.parse("LOCAL_LANE_THRESHOLD", local.confidence_threshold)?,
                ..local
            },
            LaneSpec {
                dimension: vars.parse("CLOUD_LANE_DIM", cloud.dimension)?,
                confidence_threshold: vars.parse("CLOUD_LANE_THRESHOLD", cloud.confidence_threshold)?,
                ..cloud
            },
        ];

        let index = IndexSettings {
            backend,
            qdrant_url: vars.string("QDRANT_URL", "http://localhost:6333"),
            qdrant_api_key: vars.optional("QDRANT_API_KEY"),
            collection: vars.string("QDRANT_COLLECTION", "financial_documents"),
            snapshot_path: vars.optional("INDEX_SNAPSHOT_PATH").map(PathBuf::from),
            lanes,
            timeout: Duration::from_secs(vars.parse("INDEX_TIMEOUT_SECS", 30)?),
        };

        let provider = match vars.string("LLM_PROVIDER", "ollama").to_lowercase().as_str() {
            "ollama" => LlmProvider::Ollama,
            "gemini" => LlmProvider::Gemini,
            other => {
                return Err(OrchestrationError::InvalidConfig(format!(
                    "LLM_PROVIDER must be 'ollama' or 'gemini', got '{}'",
                    other
                )))
            }
        };

        let llm = LlmSettings {
            provider,
            base_url: vars.string("OLLAMA_BASE_URL", "http://localhost:11434"),
            model: vars.string("DEFAULT_MODEL", "llama3"),
            temperature: vars.parse("MODEL_TEMPERATURE", 0.7)?,
            max_tokens: vars.parse("MODEL_MAX_TOKENS", 2048)?,
            api_key: vars.optional("GEMINI_API_KEY"),
            timeout: Duration::from_secs(vars.parse("LLM_TIMEOUT_SECS", 120)?),
        };

        let embedding = EmbeddingSettings {
            ollama_base_url: vars.string("OLLAMA_BASE_URL", "http://localhost:11434"),
            local_model: vars.string("LOCAL_EMBED_MODEL", "bge-small-en-v1.5"),
            openai_base_url: vars.string("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            openai_api_key: vars.optional("OPENAI_API_KEY"),
            cloud_model: vars.string("CLOUD_EMBED_MODEL", "text-embedding-3-small"),
            timeout: Duration::from_secs(vars.parse("EMBED_TIMEOUT_SECS", 30)?),
        };

        let search = SearchSettings {
            base_url: vars.string("TAVILY_BASE_URL", "https://api.tavily.com"),
            tavily_api_key: vars.optional("TAVILY_API_KEY"),
            max_results: vars.parse("TAVILY_MAX_RESULTS", 5)?,
            search_depth: vars.string("TAVILY_SEARCH_DEPTH", "basic"),
            timeout: Duration::from_secs(vars.parse("SEARCH_TIMEOUT_SECS", 20)?),
        };

        let defaults = RouterPolicy::default();
        let policy = RouterPolicy {
            max_iterations: vars.parse("MAX_ITERATIONS", defaults.max_iterations)?,
            min_supporting_chunks: vars.parse("MIN_SUPPORTING_CHUNKS", defaults.min_supporting_chunks)?,
            max_retrieval_rounds: vars.parse("MAX_RETRIEVAL_ROUNDS", defaults.max_retrieval_rounds)?,
            max_web_rounds: vars.parse("MAX_WEB_ROUNDS", defaults.max_web_rounds)?,
        };

        let agent = AgentSettings {
            policy,
            top_k: vars.parse("RETRIEVAL_TOP_K", 5)?,
            tool_timeout: Duration::from_millis(vars.parse("TOOL_TIMEOUT_MS", 20_000)?),
            min_search_score: match vars.optional("MIN_SEARCH_SCORE") {
                Some(raw) => Some(parse_value("MIN_SEARCH_SCORE", &raw)?),
                None => None,
            },
        };

        let synthesis = SynthesisSettings {
            excerpt_chars: vars.parse("EXCERPT_CHARS", 500)?,
            max_chunks: vars.parse("SYNTHESIS_MAX_CHUNKS", 6)?,
            max_web_results: vars.parse("SYNTHESIS_MAX_WEB", 5)?,
        };

        let ingest = IngestSettings {
            batch_size: vars.parse("INGEST_BATCH_SIZE", 64)?,
            embed_missing: vars.parse("INGEST_EMBED_MISSING", true)?,
            placeholder_missing: vars.parse("INGEST_PLACEHOLDER_MISSING", true)?,
        };

        let api = ApiSettings {
            port: match vars.optional("PORT") {
                Some(raw) => parse_value("PORT", &raw)?,
                None => vars.parse("API_PORT", 8080)?,
            },
        };

        let settings = Self {
            index,
            llm,
            embedding,
            search,
            agent,
            synthesis,
            ingest,
            api,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent.policy.max_iterations == 0 {
            return Err(OrchestrationError::InvalidConfig(
                "MAX_ITERATIONS must be at least 1".to_string(),
            ));
        }
        if self.agent.top_k == 0 {
            return Err(OrchestrationError::InvalidConfig(
                "RETRIEVAL_TOP_K must be at least 1".to_string(),
            ));
        }
        if self.ingest.batch_size == 0 {
            return Err(OrchestrationError::InvalidConfig(
                "INGEST_BATCH_SIZE must be at least 1".to_string(),
            ));
        }
        if let Some(lane) = self.index.lanes.iter().find(|l| l.dimension == 0) {
            return Err(OrchestrationError::InvalidConfig(format!(
                "lane '{}' has zero dimension",
                lane.name
            )));
        }
        if self.llm.provider == LlmProvider::Gemini && self.llm.api_key.is_none() {
            return Err(OrchestrationError::InvalidConfig(
                "GEMINI_API_KEY is required when LLM_PROVIDER=gemini".to_string(),
            ));
        }
        Ok(())
    }
}

struct Vars<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<'a, F: Fn(&str) -> Option<String>> Vars<'a, F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.optional(key) {
            Some(raw) => parse_value(key, &raw),
            None => Ok(default),
        }
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim().parse::<T>().map_err(|_| {
        OrchestrationError::InvalidConfig(format!("{} has invalid value '{}'", key, raw))
    })
}
