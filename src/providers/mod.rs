//! External collaborator interfaces
//!
//! The pipeline core never parses binary formats, hosts an index, or generates
//! answers itself; those concerns live behind these traits. Callers apply
//! timeouts and retries, implementations just speak to their service.

pub mod http;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{ChatTurn, DocumentRecord, ExtractedText};

/// Text/layout extraction for one document
///
/// The service holds the original binaries; it is addressed by project and
/// filename and returns markdown with partition markers.
#[async_trait]
pub trait ExtractionService: Send + Sync {
    async fn extract(&self, document: &DocumentRecord) -> Result<ExtractedText>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// Embedding model over batches of enriched chunk texts
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts; one vector per input, in order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Vector dimensionality
    fn dimensions(&self) -> usize;

    /// Model version tag recorded on embedding records
    fn model_tag(&self) -> &str;

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// One grounding passage returned by the retrieval service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedPassage {
    /// Chunk id the passage was indexed under
    pub chunk_id: String,
    /// Passage text as stored in the index
    pub content: String,
    /// Reranker relevance score
    pub relevance: f32,
}

/// How the service characterized its answer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnswerDisposition {
    /// Answer grounded in retrieved passages
    #[default]
    Grounded,
    /// The source material explicitly states the information is absent
    Excluded,
    /// Nothing relevant was retrieved
    NoContent,
}

/// Raw response from the agentic retrieval service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalOutput {
    /// Synthesized answer text
    pub answer: String,
    /// Grounding passages, reranked
    pub passages: Vec<RetrievedPassage>,
    /// Subqueries the service decomposed the query into
    pub subqueries: Vec<String>,
    /// Disposition hint for outcome tagging
    #[serde(default)]
    pub disposition: AnswerDisposition,
}

/// Agentic retrieval: decomposes, searches in parallel, reranks, synthesizes
#[async_trait]
pub trait RetrievalService: Send + Sync {
    async fn retrieve(
        &self,
        project_id: &str,
        query: &str,
        history: &[ChatTurn],
    ) -> Result<RetrievalOutput>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

/// One chunk+vector entry pushed to the external index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk_id: String,
    /// Enriched text, what the index stores and searches
    pub content: String,
    pub vector: Vec<f32>,
    pub source_file: String,
    pub location: String,
}

/// Upload side of the external search index
#[async_trait]
pub trait IndexSink: Send + Sync {
    /// Merge-or-upload a batch of entries, keyed by chunk id
    async fn upsert(&self, project_id: &str, entries: &[IndexEntry]) -> Result<()>;

    /// Provider name for logging
    fn name(&self) -> &str;
}
