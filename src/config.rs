use crate::chunking::ChunkingOptions;
use crate::error::{RagError, Result};
use crate::index::DEFAULT_TOP_K;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_EMBEDDING_MODEL: &str = "models/gemini-embedding-001";
const DEFAULT_LLM_MODEL: &str = "models/gemini-3-pro-preview";
const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful research assistant. Always cite your sources.";

/// Sampling parameters sent with every generation request
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: i32,
    pub max_output_tokens: i32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        GenerationOptions {
            temperature: 0.2,
            top_p: 0.8,
            top_k: 40,
            max_output_tokens: 2048,
        }
    }
}

/// Application configuration, built once at startup and passed by reference
/// to the clients, the indexer and the engine.
#[derive(Clone)]
pub struct Config {
    pub api_key: String,
    pub base_url: String,
    pub embedding_model: String,
    /// Optional truncation of the embedding vectors
    pub embedding_dimensions: Option<u32>,
    pub llm_model: String,
    pub generation: GenerationOptions,
    /// Intake directory scanned for documents
    pub data_dir: PathBuf,
    /// Directory holding the persisted index snapshot
    pub persist_dir: PathBuf,
    pub similarity_top_k: usize,
    /// Maximum characters of chunk text returned with each citation
    pub preview_chars: usize,
    /// Prior turns included in chat prompts
    pub history_turns: usize,
    pub system_prompt: String,
    pub chunking: ChunkingOptions,
    pub embed_batch_size: usize,
    pub request_timeout: Duration,
    /// Chat sessions the HTTP service keeps before evicting the least recently used
    pub max_sessions: usize,
}

impl Config {
    /// Create a new configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty values count as unset
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get("GOOGLE_API_KEY")
            .or_else(|| get("GEMINI_API_KEY"))
            .ok_or_else(|| RagError::Config("GOOGLE_API_KEY is not set".to_string()))?;

        let defaults = GenerationOptions::default();
        let chunk_defaults = ChunkingOptions::default();
        let chunking = ChunkingOptions {
            target_tokens: parse_or(&get, "RAG_CHUNK_TOKENS", chunk_defaults.target_tokens)?,
            overlap_tokens: parse_or(&get, "RAG_CHUNK_OVERLAP", chunk_defaults.overlap_tokens)?,
        };
        if chunking.target_tokens == 0 {
            return Err(RagError::Config("RAG_CHUNK_TOKENS must be positive".to_string()));
        }

        let embed_batch_size = parse_or(&get, "RAG_EMBED_BATCH_SIZE", 100usize)?;
        if embed_batch_size == 0 {
            return Err(RagError::Config("RAG_EMBED_BATCH_SIZE must be positive".to_string()));
        }

        let max_sessions = parse_or(&get, "RAG_MAX_SESSIONS", 1000usize)?;
        if max_sessions == 0 {
            return Err(RagError::Config("RAG_MAX_SESSIONS must be positive".to_string()));
        }

        Ok(Config {
            api_key,
            base_url: get("GEMINI_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            embedding_model: get("GEMINI_EMBEDDING_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            embedding_dimensions: get("GEMINI_EMBEDDING_DIMENSIONS")
                .map(|v| parse_value("GEMINI_EMBEDDING_DIMENSIONS", &v))
                .transpose()?,
            llm_model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            generation: GenerationOptions {
                temperature: parse_or(&get, "GEMINI_TEMPERATURE", defaults.temperature)?,
                top_p: parse_or(&get, "GEMINI_TOP_P", defaults.top_p)?,
                top_k: parse_or(&get, "GEMINI_TOP_K", defaults.top_k)?,
                max_output_tokens: parse_or(
                    &get,
                    "GEMINI_MAX_OUTPUT_TOKENS",
                    defaults.max_output_tokens,
                )?,
            },
            data_dir: get("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            persist_dir: get("PERSIST_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./storage")),
            similarity_top_k: parse_or(&get, "RAG_TOP_K", DEFAULT_TOP_K)?,
            preview_chars: parse_or(&get, "RAG_PREVIEW_CHARS", 200usize)?,
            history_turns: parse_or(&get, "RAG_HISTORY_TURNS", 10usize)?,
            system_prompt: get("RAG_SYSTEM_PROMPT")
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            chunking,
            embed_batch_size,
            request_timeout: Duration::from_secs(parse_or(&get, "REQUEST_TIMEOUT_SECS", 120u64)?),
            max_sessions,
        })
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("embedding_model", &self.embedding_model)
            .field("embedding_dimensions", &self.embedding_dimensions)
            .field("llm_model", &self.llm_model)
            .field("generation", &self.generation)
            .field("data_dir", &self.data_dir)
            .field("persist_dir", &self.persist_dir)
            .field("similarity_top_k", &self.similarity_top_k)
            .field("preview_chars", &self.preview_chars)
            .field("history_turns", &self.history_turns)
            .field("chunking", &self.chunking)
            .field("embed_batch_size", &self.embed_batch_size)
            .field("request_timeout", &self.request_timeout)
            .field("max_sessions", &self.max_sessions)
            .finish_non_exhaustive()
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => parse_value(key, &value),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| RagError::Config(format!("{} has an invalid value: {:?}", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("GOOGLE_API_KEY", "secret")])).unwrap();
        assert_eq!(config.api_key, "secret");
        assert_eq!(config.embedding_model, DEFAULT_EMBEDDING_MODEL);
        assert_eq!(config.llm_model, DEFAULT_LLM_MODEL);
        assert_eq!(config.similarity_top_k, 2);
        assert_eq!(config.preview_chars, 200);
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.persist_dir, PathBuf::from("./storage"));
        assert_eq!(config.chunking, ChunkingOptions::default());
        assert_eq!(config.embedding_dimensions, None);
        assert_eq!(config.max_sessions, 1000);
    }

    #[test]
    fn test_gemini_key_fallback_and_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "other"),
            ("GEMINI_BASE_URL", "http://localhost:9000/"),
            ("RAG_TOP_K", "5"),
            ("GEMINI_EMBEDDING_DIMENSIONS", "768"),
            ("GEMINI_TEMPERATURE", "0.7"),
        ]))
        .unwrap();
        assert_eq!(config.api_key, "other");
        assert_eq!(config.base_url, "http://localhost:9000");
        assert_eq!(config.similarity_top_k, 5);
        assert_eq!(config.embedding_dimensions, Some(768));
        assert_eq!(config.generation.temperature, 0.7);
    }

    #[test]
    fn test_missing_api_key() {
        let err = Config::from_lookup(lookup(&[("GOOGLE_API_KEY", "  ")])).unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
    }

    #[test]
    fn test_invalid_number() {
        let err = Config::from_lookup(lookup(&[("GOOGLE_API_KEY", "k"), ("RAG_TOP_K", "two")]))
            .unwrap_err();
        assert!(err.to_string().contains("RAG_TOP_K"));

        let err = Config::from_lookup(lookup(&[("GOOGLE_API_KEY", "k"), ("RAG_MAX_SESSIONS", "0")]))
            .unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = Config::from_lookup(lookup(&[("GOOGLE_API_KEY", "hunter2")])).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
