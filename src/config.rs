use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{RagError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    /// Root directory scanned by batch ingestion.
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Directory the vector index persists into.
    #[serde(default = "default_persist_dir")]
    pub persist_dir: PathBuf,
    /// Document metadata file (filename -> ingestion record).
    #[serde(default = "default_metadata_file")]
    pub metadata_file: PathBuf,
    /// Worker pool bound for batch ingestion.
    #[serde(default = "default_ingest_concurrency")]
    pub ingest_concurrency: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            persist_dir: default_persist_dir(),
            metadata_file: default_metadata_file(),
            ingest_concurrency: default_ingest_concurrency(),
        }
    }
}

fn default_persist_dir() -> PathBuf {
    PathBuf::from("vector_index")
}
fn default_metadata_file() -> PathBuf {
    PathBuf::from("ingested_files.json")
}
fn default_ingest_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Default number of chunks fetched per query.
    #[serde(default = "default_similarity_k")]
    pub similarity_k: usize,
    /// Drop results scoring below this, when set.
    #[serde(default)]
    pub score_threshold: Option<f32>,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_k: default_similarity_k(),
            score_threshold: None,
            cache_capacity: default_cache_capacity(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_similarity_k() -> usize {
    5
}
fn default_cache_capacity() -> usize {
    128
}
fn default_cache_ttl_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_embedding_model(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_embedding_retries(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_embedding_retries() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    /// Longest prompt accepted before the request is rejected.
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
    /// Transport clients older than this are rebuilt before use.
    #[serde(default = "default_transport_max_age_secs")]
    pub transport_max_age_secs: u64,
    /// Malformed stream lines tolerated before the stream fails.
    #[serde(default = "default_max_stream_decode_failures")]
    pub max_stream_decode_failures: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_generation_model(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_generation_retries(),
            max_prompt_chars: default_max_prompt_chars(),
            transport_max_age_secs: default_transport_max_age_secs(),
            max_stream_decode_failures: default_max_stream_decode_failures(),
        }
    }
}

fn default_generation_model() -> String {
    "mistral".to_string()
}
fn default_generation_retries() -> u32 {
    3
}
fn default_max_prompt_chars() -> usize {
    16_000
}
fn default_transport_max_age_secs() -> u64 {
    300
}
fn default_max_stream_decode_failures() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrchestratorConfig {
    /// Longest accepted question, in characters.
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,
    /// Budget for the Relevant Documents prompt section.
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    /// Chat history messages included in the prompt (most recent kept).
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Retry envelope around a whole query attempt.
    #[serde(default = "default_query_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_status_ttl_secs")]
    pub status_ttl_secs: u64,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_query_chars: default_max_query_chars(),
            max_context_chars: default_max_context_chars(),
            history_limit: default_history_limit(),
            max_attempts: default_query_attempts(),
            status_ttl_secs: default_status_ttl_secs(),
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_max_query_chars() -> usize {
    2_000
}
fn default_max_context_chars() -> usize {
    4_096
}
fn default_history_limit() -> usize {
    10
}
fn default_query_attempts() -> u32 {
    3
}
fn default_status_ttl_secs() -> u64 {
    30
}
fn default_system_prompt() -> String {
    "You are a helpful assistant. Answer the question below using only the context provided."
        .to_string()
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        RagError::Config(format!("failed to read config file {}: {e}", path.display()))
    })?;

    let config: Config =
        toml::from_str(&content).map_err(|e| RagError::Config(format!("failed to parse: {e}")))?;

    validate(&config)?;
    Ok(config)
}

/// Cross-field validation shared by file loading and programmatic construction.
pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        return Err(RagError::Config("chunking.chunk_size must be > 0".into()));
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        return Err(RagError::Config(format!(
            "chunking.chunk_overlap ({}) must be strictly less than chunk_size ({})",
            config.chunking.chunk_overlap, config.chunking.chunk_size
        )));
    }
    if config.retrieval.similarity_k == 0 {
        return Err(RagError::Config(
            "retrieval.similarity_k must be >= 1".into(),
        ));
    }
    if config.retrieval.cache_capacity == 0 {
        return Err(RagError::Config(
            "retrieval.cache_capacity must be >= 1".into(),
        ));
    }
    if config.index.ingest_concurrency == 0 {
        return Err(RagError::Config(
            "index.ingest_concurrency must be >= 1".into(),
        ));
    }
    if config.orchestrator.max_attempts == 0 {
        return Err(RagError::Config(
            "orchestrator.max_attempts must be >= 1".into(),
        ));
    }
    if config.orchestrator.max_context_chars >= config.generation.max_prompt_chars {
        return Err(RagError::Config(
            "orchestrator.max_context_chars must be below generation.max_prompt_chars".into(),
        ));
    }
    if let Some(t) = config.retrieval.score_threshold {
        if !(0.0..=1.0).contains(&t) {
            return Err(RagError::Config(
                "retrieval.score_threshold must be in [0.0, 1.0]".into(),
            ));
        }
    }
    Ok(())
}

impl Config {
    /// Config rooted at `documents_root` with defaults everywhere else.
    /// Relative index paths are placed next to the documents root.
    pub fn with_documents_root(documents_root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = documents_root.into();
        let base = root.parent().map(Path::to_path_buf).unwrap_or_default();
        Config {
            documents: DocumentsConfig { root },
            index: IndexConfig {
                persist_dir: base.join("vector_index"),
                metadata_file: base.join("ingested_files.json"),
                ingest_concurrency: default_ingest_concurrency(),
            },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}
