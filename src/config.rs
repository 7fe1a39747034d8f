use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub sanitize: SanitizeConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
    /// Rebuild from the store when `serve` starts without a usable index.
    #[serde(default = "default_rebuild_on_start")]
    pub rebuild_on_start: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
            rebuild_on_start: default_rebuild_on_start(),
        }
    }
}

fn default_rebuild_on_start() -> bool {
    true
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("./data/index")
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_provider")]
    pub provider: String,
    #[serde(default = "default_completion_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_completion_provider(),
            model: default_completion_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

fn default_completion_provider() -> String {
    "openai".to_string()
}
fn default_completion_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}
fn default_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}
fn default_api_key_env() -> String {
    "GROQ_API_KEY".to_string()
}
fn default_max_tokens() -> u32 {
    500
}
fn default_temperature() -> f32 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ParserConfig {
    #[serde(default = "default_year")]
    pub default_year: u16,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            default_year: default_year(),
        }
    }
}

fn default_year() -> u16 {
    2025
}

#[derive(Debug, Deserialize, Clone)]
pub struct SanitizeConfig {
    #[serde(default = "default_max_len")]
    pub max_len: usize,
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self {
            max_len: default_max_len(),
        }
    }
}

fn default_max_len() -> usize {
    finops_copilot_core::sanitize::DEFAULT_MAX_LEN
}

/// Per-call timeouts for the guarded external calls, in seconds.
#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutsConfig {
    #[serde(default = "default_store_secs")]
    pub store_secs: u64,
    #[serde(default = "default_index_secs")]
    pub index_secs: u64,
    #[serde(default = "default_completion_secs")]
    pub completion_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            store_secs: default_store_secs(),
            index_secs: default_index_secs(),
            completion_secs: default_completion_secs(),
        }
    }
}

fn default_store_secs() -> u64 {
    10
}
fn default_index_secs() -> u64 {
    30
}
fn default_completion_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parses and validates a TOML configuration string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "hash" | "disabled" => {}
        "openai" | "ollama" => {
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be hash, disabled, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }

    // Validate completion
    match config.completion.provider.as_str() {
        "openai" | "disabled" => {}
        other => bail!(
            "Unknown completion provider: '{}'. Must be openai or disabled.",
            other
        ),
    }
    if !(0.0..=2.0).contains(&config.completion.temperature) {
        bail!("completion.temperature must be in [0.0, 2.0]");
    }
    if config.completion.max_tokens == 0 {
        bail!("completion.max_tokens must be > 0");
    }

    if config.sanitize.max_len == 0 {
        bail!("sanitize.max_len must be > 0");
    }

    let t = &config.timeouts;
    if t.store_secs == 0 || t.index_secs == 0 || t.completion_secs == 0 {
        bail!("timeouts must be > 0 seconds");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config("[db]\npath = \"./data/copilot.sqlite\"\n").unwrap();
        assert_eq!(config.retrieval.top_k, 10);
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.completion.model, "llama-3.3-70b-versatile");
        assert_eq!(config.completion.api_key_env, "GROQ_API_KEY");
        assert_eq!(config.completion.max_tokens, 500);
        assert_eq!(config.parser.default_year, 2025);
        assert_eq!(config.sanitize.max_len, 2000);
        assert_eq!(config.timeouts.completion_secs, 60);
    }

    #[test]
    fn test_rejects_unknown_providers() {
        let err = parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));

        let err = parse_config("[db]\npath = \"x\"\n[completion]\nprovider = \"magic\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("Unknown completion provider"));
    }

    #[test]
    fn test_remote_embedding_requires_model_and_dims() {
        let err = parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_example_config_parses() {
        let config = parse_config(include_str!("../config/copilot.example.toml")).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8000");
        assert!(config.index.rebuild_on_start);
    }

    #[test]
    fn test_rejects_zero_top_k() {
        assert!(parse_config("[db]\npath = \"x\"\n[retrieval]\ntop_k = 0\n").is_err());
    }

    #[test]
    fn test_missing_db_section() {
        assert!(parse_config("[server]\nbind = \"127.0.0.1:1\"\n").is_err());
    }
}
