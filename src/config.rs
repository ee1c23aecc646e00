use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// A configuration rooted at `dir`, with embeddings and generation disabled.
    pub fn minimal(dir: &Path) -> Self {
        Self {
            storage: StorageConfig {
                vector_store_dir: dir.join("vector_store"),
                upload_dir: dir.join("uploads"),
            },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_vector_store_dir")]
    pub vector_store_dir: PathBuf,
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            vector_store_dir: default_vector_store_dir(),
            upload_dir: default_upload_dir(),
        }
    }
}

fn default_vector_store_dir() -> PathBuf {
    PathBuf::from("data/vector_store")
}
fn default_upload_dir() -> PathBuf {
    PathBuf::from("data/uploads")
}

/// Splitter settings, measured in characters.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    150
}

/// Distance used by the vector index.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Cosine similarity, higher is closer.
    #[default]
    Cosine,
    /// Euclidean distance, lower is closer.
    L2,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub metric: Metric,
    #[serde(default = "default_condense_question")]
    pub condense_question: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            metric: Metric::default(),
            condense_question: default_condense_question(),
        }
    }
}

fn default_top_k() -> usize {
    4
}
fn default_condense_question() -> bool {
    true
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
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
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
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            url: None,
            temperature: default_temperature(),
            max_retries: 5,
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_temperature() -> f32 {
    0.2
}
fn default_generation_timeout_secs() -> u64 {
    60
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
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

    let config = parse_config(&content)?;
    Ok(config)
}

/// Parse and validate a TOML configuration string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.overlap must be smaller than chunking.chunk_size");
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "local" => {}
        "openai" | "ollama" => {
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    // Validate generation
    match config.generation.provider.as_str() {
        "disabled" => {}
        "openai" | "ollama" => {
            if config.generation.model.is_none() {
                anyhow::bail!(
                    "generation.model must be specified when provider is '{}'",
                    config.generation.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if !(0.0..=2.0).contains(&config.generation.temperature) {
        anyhow::bail!("generation.temperature must be in [0.0, 2.0]");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.chunking.chunk_size, 1000);
        assert_eq!(cfg.chunking.overlap, 150);
        assert_eq!(cfg.retrieval.top_k, 4);
        assert_eq!(cfg.retrieval.metric, Metric::Cosine);
        assert!(cfg.retrieval.condense_question);
        assert!(!cfg.embedding.is_enabled());
        assert!(!cfg.generation.is_enabled());
        assert!((cfg.generation.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(cfg.server.bind, "127.0.0.1:8000");
    }

    #[test]
    fn test_full_config() {
        let cfg = parse_config(
            r#"
[storage]
vector_store_dir = "/srv/kb/vectors"
upload_dir = "/srv/kb/uploads"

[chunking]
chunk_size = 500
overlap = 50

[retrieval]
top_k = 6
metric = "l2"
condense_question = false

[embedding]
provider = "openai"
model = "text-embedding-3-small"
dims = 1536

[generation]
provider = "ollama"
model = "llama3.2"
url = "http://localhost:11434"
"#,
        )
        .unwrap();
        assert_eq!(cfg.storage.vector_store_dir, PathBuf::from("/srv/kb/vectors"));
        assert_eq!(cfg.chunking.chunk_size, 500);
        assert_eq!(cfg.retrieval.metric, Metric::L2);
        assert!(!cfg.retrieval.condense_question);
        assert_eq!(cfg.embedding.dims, Some(1536));
        assert_eq!(cfg.generation.url.as_deref(), Some("http://localhost:11434"));
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let err = parse_config("[chunking]\nchunk_size = 100\noverlap = 100\n").unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn test_openai_embedding_requires_dims() {
        let err = parse_config("[embedding]\nprovider = \"openai\"\nmodel = \"m\"\n").unwrap_err();
        assert!(err.to_string().contains("dims"));
    }

    #[test]
    fn test_unknown_generation_provider() {
        let err = parse_config("[generation]\nprovider = \"gemini\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown generation provider"));
    }

    #[test]
    fn test_zero_top_k_rejected() {
        assert!(parse_config("[retrieval]\ntop_k = 0\n").is_err());
    }
}
