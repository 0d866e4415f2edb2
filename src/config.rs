use serde::{Deserialize, Serialize};

/// Daemon configuration, captured once at startup from the environment and
/// treated as a read-only snapshot afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Daemon bind address (loopback by default).
    pub host: String,
    pub port: u16,
    /// Embedding backend configuration.
    pub embedding: EmbeddingConfig,
    /// LLM collaborator configuration.
    pub llm: LlmConfig,
    /// Cross-encoder reranker sidecar configuration.
    pub reranker: RerankerConfig,
    /// Hybrid scorer multipliers.
    pub heuristics: HeuristicConfig,
    /// Chunk sizing (token budget).
    pub chunk_min_tokens: usize,
    pub chunk_max_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "ollama", "openai", or "hash" (deterministic local feature hashing).
    pub provider: String,
    /// Base URL for HTTP embedding providers.
    pub base_url: String,
    /// Model id; salts the embedding cache and names the active model.
    pub model: String,
    /// Embedding vector dimension; drives the collection dimension.
    pub dimension: usize,
    /// API key (OpenAI-compatible providers only).
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Master switch for rerank + selection.
    pub enabled: bool,
    /// "gemini" or "openai".
    pub provider: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Skip the LLM when the best vector score meets this threshold.
    pub threshold: f32,
    /// Hard per-call timeout.
    pub timeout_ms: u64,
    pub enable_rewrite: bool,
    /// Rewrite model; empty falls back to `model`.
    pub rewrite_model: String,
    pub rewrite_cache_size: usize,
    pub summarize_on_index: bool,
    /// Summary model; empty falls back to `model`.
    pub summary_model: String,
    pub summary_max_chars: usize,
}

impl LlmConfig {
    pub fn rewrite_model(&self) -> &str {
        if self.rewrite_model.is_empty() {
            &self.model
        } else {
            &self.rewrite_model
        }
    }

    pub fn summary_model(&self) -> &str {
        if self.summary_model.is_empty() {
            &self.model
        } else {
            &self.summary_model
        }
    }
}

/// Configuration for the cross-encoder reranker sidecar (e.g. llama-server
/// exposing an OpenAI-compatible /v1/rerank endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    pub enabled: bool,
    /// Base URL; None leaves reranking disabled even when `enabled` is set.
    pub base_url: Option<String>,
    pub model: String,
    /// Candidates handed to the cross-encoder.
    pub top_k: usize,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeuristicConfig {
    pub route_boost: f32,
    pub intent_boost: f32,
    pub noise_penalty: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            reranker: RerankerConfig::default(),
            heuristics: HeuristicConfig::default(),
            chunk_min_tokens: 200,
            chunk_max_tokens: 800,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hash".to_string(),
            base_url: "http://localhost:11434".to_string(),
            model: "BAAI/bge-base-en-v1.5".to_string(),
            dimension: 768,
            api_key: None,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "gemini".to_string(),
            api_key: None,
            model: "gemini-2.5-flash".to_string(),
            threshold: 0.85,
            timeout_ms: 2_000,
            enable_rewrite: false,
            rewrite_model: String::new(),
            rewrite_cache_size: 256,
            summarize_on_index: false,
            summary_model: String::new(),
            summary_max_chars: 320,
        }
    }
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: None,
            model: "cross-encoder/ms-marco-MiniLM-L-6-v2".to_string(),
            top_k: 10,
            timeout_ms: 2_000,
        }
    }
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            route_boost: 1.3,
            intent_boost: 1.2,
            noise_penalty: 0.7,
        }
    }
}

fn env_str(name: &str, target: &mut String) {
    if let Ok(val) = std::env::var(name) {
        *target = val;
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Ok(val) = std::env::var(name) {
        if let Ok(parsed) = val.parse() {
            *target = parsed;
        }
    }
}

fn env_bool(name: &str, target: &mut bool) {
    if let Ok(val) = std::env::var(name) {
        *target = matches!(val.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on");
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        env_str("XTRC_HOST", &mut config.host);
        env_parse("XTRC_PORT", &mut config.port);

        env_str("XTRC_EMBEDDING_PROVIDER", &mut config.embedding.provider);
        env_str("XTRC_EMBEDDING_BASE_URL", &mut config.embedding.base_url);
        env_str("XTRC_EMBEDDING_MODEL", &mut config.embedding.model);
        env_parse("XTRC_EMBEDDING_DIM", &mut config.embedding.dimension);
        if let Ok(key) = std::env::var("XTRC_EMBEDDING_API_KEY") {
            config.embedding.api_key = Some(key);
        }

        env_bool("USE_LLM", &mut config.llm.enabled);
        env_str("LLM_PROVIDER", &mut config.llm.provider);
        if let Ok(key) = std::env::var("LLM_API_KEY") {
            config.llm.api_key = Some(key);
        }
        env_str("LLM_MODEL", &mut config.llm.model);
        env_parse("LLM_THRESHOLD", &mut config.llm.threshold);
        env_parse("LLM_TIMEOUT_MS", &mut config.llm.timeout_ms);
        env_bool("LLM_ENABLE_REWRITE", &mut config.llm.enable_rewrite);
        env_str("REWRITE_MODEL", &mut config.llm.rewrite_model);
        env_parse("LLM_CACHE_SIZE", &mut config.llm.rewrite_cache_size);
        env_bool("SUMMARIZE_ON_INDEX", &mut config.llm.summarize_on_index);
        env_str("SUMMARY_MODEL", &mut config.llm.summary_model);
        env_parse("SUMMARY_MAX_CHARS", &mut config.llm.summary_max_chars);

        env_bool("LOCAL_RERANKER_ENABLED", &mut config.reranker.enabled);
        if let Ok(url) = std::env::var("LOCAL_RERANKER_BASE_URL") {
            config.reranker.base_url = Some(url);
        }
        env_str("LOCAL_RERANKER_MODEL", &mut config.reranker.model);
        env_parse("LOCAL_RERANKER_TOP_K", &mut config.reranker.top_k);
        env_parse("LOCAL_RERANKER_TIMEOUT_MS", &mut config.reranker.timeout_ms);

        env_parse("HEURISTIC_ROUTE_BOOST", &mut config.heuristics.route_boost);
        env_parse("HEURISTIC_INTENT_BOOST", &mut config.heuristics.intent_boost);
        env_parse("HEURISTIC_NOISE_PENALTY", &mut config.heuristics.noise_penalty);

        env_parse("CHUNK_MIN_TOKENS", &mut config.chunk_min_tokens);
        env_parse("CHUNK_MAX_TOKENS", &mut config.chunk_max_tokens);

        config.clamp();
        config
    }

    /// Keep derived knobs inside sane ranges regardless of env input.
    fn clamp(&mut self) {
        self.llm.threshold = self.llm.threshold.clamp(0.0, 1.0);
        self.llm.timeout_ms = self.llm.timeout_ms.max(100);
        self.llm.summary_max_chars = self.llm.summary_max_chars.max(64);
        self.llm.rewrite_cache_size = self.llm.rewrite_cache_size.max(1);
        self.reranker.top_k = self.reranker.top_k.max(1);
        self.heuristics.route_boost = self.heuristics.route_boost.max(0.1);
        self.heuristics.intent_boost = self.heuristics.intent_boost.max(0.1);
        self.heuristics.noise_penalty = self.heuristics.noise_penalty.max(0.1);
        if self.chunk_min_tokens == 0 {
            self.chunk_min_tokens = 1;
        }
        if self.chunk_max_tokens <= self.chunk_min_tokens {
            self.chunk_max_tokens = self.chunk_min_tokens * 4;
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Name of the per-repository storage directory.
pub const DATA_DIR_NAME: &str = ".xtrc";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.bind_addr(), "127.0.0.1:8765");
        assert_eq!(config.llm.threshold, 0.85);
        assert_eq!(config.llm.timeout_ms, 2_000);
        assert_eq!(config.heuristics.route_boost, 1.3);
        assert_eq!(config.heuristics.intent_boost, 1.2);
        assert_eq!(config.heuristics.noise_penalty, 0.7);
        assert_eq!(config.chunk_min_tokens, 200);
        assert_eq!(config.chunk_max_tokens, 800);
        assert_eq!(config.reranker.top_k, 10);
    }

    #[test]
    fn test_llm_model_fallbacks() {
        let mut llm = LlmConfig::default();
        assert_eq!(llm.rewrite_model(), "gemini-2.5-flash");
        assert_eq!(llm.summary_model(), "gemini-2.5-flash");
        llm.rewrite_model = "gemini-2.5-flash-lite".to_string();
        assert_eq!(llm.rewrite_model(), "gemini-2.5-flash-lite");
    }

    #[test]
    fn test_clamp_repairs_inverted_chunk_budget() {
        let mut config = Config {
            chunk_min_tokens: 500,
            chunk_max_tokens: 100,
            ..Config::default()
        };
        config.clamp();
        assert!(config.chunk_max_tokens > config.chunk_min_tokens);
    }

    #[test]
    fn test_clamp_bounds_threshold() {
        let mut config = Config::default();
        config.llm.threshold = 7.5;
        config.clamp();
        assert_eq!(config.llm.threshold, 1.0);
    }
}
