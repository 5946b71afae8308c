//! Engine configuration
//!
//! [`AuditConfig`] groups one section per component. Every field has a
//! default, so partial TOML/YAML files and sparse environments are fine.
//! Precedence when combined by callers: defaults, then file, then
//! `EXPENSE_AUDIT_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Rule library settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Rules fetched per repository page during reload
    pub page_size: usize,
    /// Timeout for repository reads while building the rule context
    pub repository_timeout_ms: u64,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            repository_timeout_ms: 5000,
        }
    }
}

/// Vector store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// Embedding dimension shared by every chunk and query
    pub dimension: usize,
    /// Result count used when a caller passes zero
    pub default_top_k: usize,
    /// Per-attempt operation timeout
    pub timeout_ms: u64,
    /// Retries after the first attempt for transient failures
    pub max_retries: u32,
    /// Fixed delay between attempts
    pub retry_delay_ms: u64,
    /// Inverted lists built by `build_index`
    pub index_lists: usize,
    /// Lists probed per approximate query
    pub index_probes: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            dimension: 1536,
            default_top_k: 5,
            timeout_ms: 5000,
            max_retries: 2,
            retry_delay_ms: 100,
            index_lists: 100,
            index_probes: 10,
        }
    }
}

impl VectorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Which embedder to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// OpenAI-compatible `/embeddings` endpoint
    Http,
    /// Deterministic local feature hashing
    Hashing,
}

impl FromStr for EmbeddingProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(EmbeddingProvider::Http),
            "hashing" => Ok(EmbeddingProvider::Hashing),
            other => Err(format!("unknown embedding provider: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub endpoint: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Http,
            endpoint: "http://localhost:8000/v1/embeddings".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key: None,
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub endpoint: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            temperature: 0.1,
            max_tokens: 1024,
            timeout_ms: 30_000,
        }
    }
}

/// Retrieval and indexing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Chunks retrieved per audit or query
    pub top_k: usize,
    /// Target chunk length in characters
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks
    pub chunk_overlap: usize,
    /// Confidence reported for validated free-form answers
    pub query_confidence: f64,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            chunk_size: 800,
            chunk_overlap: 100,
            query_confidence: 0.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub claim_fetch_timeout_ms: u64,
    /// Timeout for audit record reads and writes
    pub repository_timeout_ms: u64,
    /// Upper bound on the whole semantic analysis stage
    pub rag_timeout_ms: u64,
    /// Confidence strictly above this passes the semantic stage
    pub rag_pass_threshold: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            claim_fetch_timeout_ms: 5000,
            repository_timeout_ms: 5000,
            rag_timeout_ms: 60_000,
            rag_pass_threshold: 0.6,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub rules: RulesConfig,
    pub vector: VectorConfig,
    pub embedding: EmbeddingConfig,
    pub chat: ChatConfig,
    pub rag: RagConfig,
    pub orchestrator: OrchestratorConfig,
}

impl AuditConfig {
    pub fn builder() -> AuditConfigBuilder {
        AuditConfigBuilder::new()
    }

    /// Load from a `.toml`, `.yaml` or `.yml` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        let config: AuditConfig = match extension.as_str() {
            "toml" => toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: display.clone(),
                message: e.to_string(),
            })?,
            "yaml" | "yml" => serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: display.clone(),
                message: e.to_string(),
            })?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };

        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `EXPENSE_AUDIT_*` variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `EXPENSE_AUDIT_*` variables on top of `self`
    ///
    /// Unparseable values are ignored and the current value kept.
    pub fn with_env_overrides(mut self) -> Self {
        env_override("EXPENSE_AUDIT_RULES_PAGE_SIZE", &mut self.rules.page_size);
        env_override("EXPENSE_AUDIT_VECTOR_DIMENSION", &mut self.vector.dimension);
        env_override("EXPENSE_AUDIT_VECTOR_TOP_K", &mut self.vector.default_top_k);
        env_override("EXPENSE_AUDIT_VECTOR_TIMEOUT_MS", &mut self.vector.timeout_ms);
        env_override("EXPENSE_AUDIT_VECTOR_MAX_RETRIES", &mut self.vector.max_retries);
        env_override("EXPENSE_AUDIT_EMBEDDING_PROVIDER", &mut self.embedding.provider);
        env_override("EXPENSE_AUDIT_EMBEDDING_ENDPOINT", &mut self.embedding.endpoint);
        env_override("EXPENSE_AUDIT_EMBEDDING_MODEL", &mut self.embedding.model);
        env_override("EXPENSE_AUDIT_CHAT_ENDPOINT", &mut self.chat.endpoint);
        env_override("EXPENSE_AUDIT_CHAT_MODEL", &mut self.chat.model);
        env_override("EXPENSE_AUDIT_CHAT_TIMEOUT_MS", &mut self.chat.timeout_ms);
        env_override("EXPENSE_AUDIT_RAG_TOP_K", &mut self.rag.top_k);

        if let Ok(key) = std::env::var("EXPENSE_AUDIT_API_KEY") {
            self.embedding.api_key.get_or_insert_with(|| key.clone());
            self.chat.api_key.get_or_insert(key);
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vector.dimension == 0 {
            return Err(ConfigError::Invalid("vector.dimension must be positive".to_string()));
        }
        if self.vector.default_top_k == 0 {
            return Err(ConfigError::Invalid("vector.default_top_k must be positive".to_string()));
        }
        if self.rules.page_size == 0 {
            return Err(ConfigError::Invalid("rules.page_size must be positive".to_string()));
        }
        if self.rag.chunk_size == 0 || self.rag.chunk_overlap >= self.rag.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "rag.chunk_overlap ({}) must be smaller than rag.chunk_size ({})",
                self.rag.chunk_overlap, self.rag.chunk_size
            )));
        }
        if !(0.0..=1.0).contains(&self.orchestrator.rag_pass_threshold) {
            return Err(ConfigError::Invalid(
                "orchestrator.rag_pass_threshold must be within [0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.rag.query_confidence) {
            return Err(ConfigError::Invalid("rag.query_confidence must be within [0, 1]".to_string()));
        }
        if self.vector.index_probes == 0 || self.vector.index_lists == 0 {
            return Err(ConfigError::Invalid("vector index lists and probes must be positive".to_string()));
        }
        Ok(())
    }
}

fn env_override<T: FromStr>(name: &str, slot: &mut T) {
    if let Some(value) = std::env::var(name).ok().and_then(|v| v.parse().ok()) {
        *slot = value;
    }
}

/// Builder for [`AuditConfig`]
#[derive(Debug, Default)]
pub struct AuditConfigBuilder {
    config: AuditConfig,
}

impl AuditConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dimension(mut self, dimension: usize) -> Self {
        self.config.vector.dimension = dimension;
        self
    }

    pub fn embedding_provider(mut self, provider: EmbeddingProvider) -> Self {
        self.config.embedding.provider = provider;
        self
    }

    pub fn embedding_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.embedding.endpoint = endpoint.into();
        self
    }

    pub fn chat_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.chat.endpoint = endpoint.into();
        self
    }

    pub fn chat_model(mut self, model: impl Into<String>) -> Self {
        self.config.chat.model = model.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.config.embedding.api_key = Some(key.clone());
        self.config.chat.api_key = Some(key);
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.config.rag.top_k = top_k;
        self
    }

    pub fn chunking(mut self, size: usize, overlap: usize) -> Self {
        self.config.rag.chunk_size = size;
        self.config.rag.chunk_overlap = overlap;
        self
    }

    pub fn vector_retries(mut self, max_retries: u32, delay_ms: u64) -> Self {
        self.config.vector.max_retries = max_retries;
        self.config.vector.retry_delay_ms = delay_ms;
        self
    }

    pub fn build(self) -> Result<AuditConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AuditConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.vector.max_retries, 2);
        assert_eq!(config.vector.default_top_k, 5);
        assert_eq!(config.orchestrator.rag_pass_threshold, 0.6);
    }

    #[test]
    fn test_builder_rejects_bad_chunking() {
        let err = AuditConfig::builder().chunking(100, 100).build().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let config = AuditConfig::builder().dimension(64).top_k(3).build().unwrap();
        assert_eq!(config.vector.dimension, 64);
        assert_eq!(config.rag.top_k, 3);
    }

    #[test]
    fn test_partial_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[vector]\ndimension = 256\n\n[embedding]\nprovider = \"hashing\"\n"
        )
        .unwrap();

        let config = AuditConfig::from_file(file.path()).unwrap();
        assert_eq!(config.vector.dimension, 256);
        assert_eq!(config.vector.default_top_k, 5);
        assert_eq!(config.embedding.provider, EmbeddingProvider::Hashing);
    }

    #[test]
    fn test_yaml_file_and_unknown_extension() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "rag:\n  top_k: 8\nchat:\n  model: local-llm\n").unwrap();
        let config = AuditConfig::from_file(file.path()).unwrap();
        assert_eq!(config.rag.top_k, 8);
        assert_eq!(config.chat.model, "local-llm");

        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(
            AuditConfig::from_file(file.path()),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_env_override_helper() {
        std::env::set_var("EXPENSE_AUDIT_TEST_ONLY_DIMENSION", "32");
        let mut dimension = 8usize;
        env_override("EXPENSE_AUDIT_TEST_ONLY_DIMENSION", &mut dimension);
        assert_eq!(dimension, 32);

        std::env::set_var("EXPENSE_AUDIT_TEST_ONLY_DIMENSION", "not-a-number");
        env_override("EXPENSE_AUDIT_TEST_ONLY_DIMENSION", &mut dimension);
        assert_eq!(dimension, 32);
        std::env::remove_var("EXPENSE_AUDIT_TEST_ONLY_DIMENSION");
    }
}
