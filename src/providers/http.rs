//! HTTP implementations of the collaborator interfaces
//!
//! Thin reqwest JSON clients. Timeouts, retries, and backoff are the caller's
//! concern; these adapters just shape requests and responses.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::types::{ChatTurn, DocumentRecord, ExtractedText};

use super::{
    EmbeddingProvider, ExtractionService, IndexEntry, IndexSink, RetrievalOutput, RetrievalService,
};

/// Extraction service over HTTP
pub struct HttpExtractionService {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct ExtractRequest<'a> {
    project_id: &'a str,
    filename: &'a str,
    source_format: &'a str,
}

#[derive(Deserialize)]
struct ExtractResponse {
    markdown: String,
    #[serde(default)]
    partition_count: Option<u32>,
    #[serde(default = "default_true")]
    complete: bool,
}

fn default_true() -> bool {
    true
}

impl HttpExtractionService {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.extraction_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ExtractionService for HttpExtractionService {
    async fn extract(&self, document: &DocumentRecord) -> Result<ExtractedText> {
        let format_name = format!("{:?}", document.source_format).to_lowercase();
        let request = ExtractRequest {
            project_id: &document.project_id,
            filename: &document.filename,
            source_format: &format_name,
        };

        let response = self
            .client
            .post(format!("{}/extract", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::external(
                "extraction",
                format!("status {} for '{}'", response.status(), document.filename),
            ));
        }

        let body: ExtractResponse = response.json().await?;
        Ok(ExtractedText {
            markdown: body.markdown,
            partition_count: body.partition_count,
            complete: body.complete,
        })
    }

    fn name(&self) -> &str {
        "http-extraction"
    }
}

/// Embedding model over HTTP
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimensions: usize,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    dimensions: usize,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl HttpEmbeddingProvider {
    pub fn new(config: &ServiceConfig, dimensions: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.embedding_url.trim_end_matches('/').to_string(),
            model: config.embedding_model.clone(),
            dimensions,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.model,
            dimensions: self.dimensions,
            input: texts,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::external(
                "embedding",
                format!("status {}", response.status()),
            ));
        }

        let body: EmbedResponse = response.json().await?;
        if body.embeddings.len() != texts.len() {
            return Err(Error::external(
                "embedding",
                format!(
                    "requested {} vectors, got {}",
                    texts.len(),
                    body.embeddings.len()
                ),
            ));
        }
        Ok(body.embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_tag(&self) -> &str {
        &self.model
    }

    fn name(&self) -> &str {
        "http-embedding"
    }
}

/// Agentic retrieval service over HTTP
pub struct HttpRetrievalService {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct RetrieveRequest<'a> {
    project_id: &'a str,
    query: &'a str,
    history: &'a [ChatTurn],
}

impl HttpRetrievalService {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.retrieval_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl RetrievalService for HttpRetrievalService {
    async fn retrieve(
        &self,
        project_id: &str,
        query: &str,
        history: &[ChatTurn],
    ) -> Result<RetrievalOutput> {
        let request = RetrieveRequest {
            project_id,
            query,
            history,
        };

        let response = self
            .client
            .post(format!("{}/retrieve", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::external(
                "retrieval",
                format!("status {}", response.status()),
            ));
        }

        Ok(response.json().await?)
    }

    fn name(&self) -> &str {
        "http-retrieval"
    }
}

/// Search-index upload over HTTP
pub struct HttpIndexSink {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    project_id: &'a str,
    entries: &'a [IndexEntry],
}

impl HttpIndexSink {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.index_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl IndexSink for HttpIndexSink {
    async fn upsert(&self, project_id: &str, entries: &[IndexEntry]) -> Result<()> {
        let request = UpsertRequest {
            project_id,
            entries,
        };

        let response = self
            .client
            .post(format!("{}/index/upsert", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::external(
                "index",
                format!("status {}", response.status()),
            ));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "http-index"
    }
}
