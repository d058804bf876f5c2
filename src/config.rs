//! Configuration for the pipeline

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Main pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Durable store configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Chunking configuration
    #[serde(default)]
    pub chunking: ChunkingConfig,
    /// Embedding configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Stage processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,
    /// Retrieval configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// External service endpoints (HTTP providers)
    #[serde(default)]
    pub services: ServiceConfig,
}

impl PipelineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&raw).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Durable store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("prism-rag.db"),
        }
    }
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target tokens per chunk
    pub target_tokens: usize,
    /// Token overlap carried from the previous window
    pub overlap_tokens: usize,
    /// Floor below which a trailing fragment is merged into the previous chunk
    pub min_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: 1000,
            overlap_tokens: 200,
            min_tokens: 400,
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Chunks per embedding call
    pub batch_size: usize,
    /// Expected vector dimensionality
    pub dimensions: usize,
    /// Retry attempts per batch before its chunks are marked failed
    pub max_retries: u32,
    /// Timeout per embedding call in seconds
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            dimensions: 1024,
            max_retries: 3,
            timeout_secs: 60,
        }
    }
}

/// Stage processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Concurrent extraction calls; defaults to CPU count capped at 8
    pub parallel_extractions: Option<usize>,
    /// Timeout per extraction call in seconds
    pub extraction_timeout_secs: u64,
    /// Chunks per index upsert call
    pub index_batch_size: usize,
    /// Timeout per index upsert call in seconds
    pub index_timeout_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            parallel_extractions: None,
            extraction_timeout_secs: 120,
            index_batch_size: 100,
            index_timeout_secs: 60,
        }
    }
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Timeout per retrieval call in seconds
    pub timeout_secs: u64,
    /// Synonym hints appended by the expanded retry, keyed by trigger term
    #[serde(default = "default_synonyms")]
    pub synonyms: Vec<SynonymHint>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            synonyms: default_synonyms(),
        }
    }
}

/// One synonym expansion rule: when `term` appears in the query, append `hints`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynonymHint {
    pub term: String,
    pub hints: Vec<String>,
}

fn default_synonyms() -> Vec<SynonymHint> {
    [
        ("SCADA", ["substation control system", "monitoring system", "supervisory control"]),
        ("automation", ["control system", "SCADA", "monitoring"]),
        ("protection", ["relay system", "protective device", "safety system"]),
        ("substation", ["substation automation", "substation control", "switchyard"]),
    ]
    .into_iter()
    .map(|(term, hints)| SynonymHint {
        term: term.to_string(),
        hints: hints.into_iter().map(String::from).collect(),
    })
    .collect()
}

/// External service endpoints for the HTTP providers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Extraction service base URL
    pub extraction_url: String,
    /// Embedding service base URL
    pub embedding_url: String,
    /// Embedding model to request
    pub embedding_model: String,
    /// Agentic retrieval service base URL
    pub retrieval_url: String,
    /// Index service base URL
    pub index_url: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            extraction_url: "http://localhost:7071".to_string(),
            embedding_url: "http://localhost:7072".to_string(),
            embedding_model: "text-embedding-3-large".to_string(),
            retrieval_url: "http://localhost:7073".to_string(),
            index_url: "http://localhost:7074".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_parameters() {
        let config = PipelineConfig::default();
        assert_eq!(config.chunking.target_tokens, 1000);
        assert_eq!(config.chunking.overlap_tokens, 200);
        assert_eq!(config.chunking.min_tokens, 400);
        assert_eq!(config.embedding.batch_size, 100);
        assert_eq!(config.embedding.max_retries, 3);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: PipelineConfig = toml::from_str(
            r#"
            [chunking]
            target_tokens = 512
            overlap_tokens = 64
            min_tokens = 128
            "#,
        )
        .unwrap();
        assert_eq!(config.chunking.target_tokens, 512);
        assert_eq!(config.embedding.batch_size, 100);
    }
}
