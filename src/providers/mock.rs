//! Deterministic in-process fakes for the collaborator interfaces
//!
//! Used by tests and offline dry runs. The embedding fake derives
//! content-dependent vectors from character trigrams, so identical text always
//! embeds identically without any model; the retrieval fake replays scripted
//! responses and records every query it was asked.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::types::{ChatTurn, DocumentRecord, ExtractedText};

use super::{
    AnswerDisposition, EmbeddingProvider, ExtractionService, IndexEntry, IndexSink,
    RetrievalOutput, RetrievalService,
};

/// Extraction fake backed by a filename -> markdown map
#[derive(Default)]
pub struct MockExtractionService {
    documents: Mutex<HashMap<String, String>>,
    /// Calls that should fail before any succeed
    failures_remaining: AtomicU32,
}

impl MockExtractionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register extraction output for a filename
    pub fn insert(&self, filename: impl Into<String>, markdown: impl Into<String>) {
        self.documents.lock().insert(filename.into(), markdown.into());
    }

    /// Make the next `n` calls fail with a transient error
    pub fn fail_next(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExtractionService for MockExtractionService {
    async fn extract(&self, document: &DocumentRecord) -> Result<ExtractedText> {
        if self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::external("mock-extraction", "scripted failure"));
        }

        let markdown = self
            .documents
            .lock()
            .get(&document.filename)
            .cloned()
            .ok_or_else(|| Error::input(&document.filename, "no extraction output registered"))?;
        Ok(ExtractedText {
            partition_count: None,
            complete: true,
            markdown,
        })
    }

    fn name(&self) -> &str {
        "mock-extraction"
    }
}

/// Deterministic trigram-based embedding fake
pub struct MockEmbeddingProvider {
    dimensions: usize,
    /// Batch calls that should fail before any succeed
    failures_remaining: AtomicU32,
    calls: AtomicUsize,
}

impl MockEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            failures_remaining: AtomicU32::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Make the next `n` batch calls fail with a transient error
    pub fn fail_next(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Number of batch calls made so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Content-dependent vector: trigram hashing, L2-normalized
    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let lower = text.to_lowercase();
        let chars: Vec<char> = lower.chars().filter(|c| !c.is_whitespace()).collect();

        for window in chars.windows(3) {
            let mut key = 0usize;
            for &c in window {
                key = key.wrapping_mul(31).wrapping_add(c as usize);
            }
            vector[key % self.dimensions] += 1.0;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::external("mock-embedding", "scripted failure"));
        }
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_tag(&self) -> &str {
        "mock-trigram-v1"
    }

    fn name(&self) -> &str {
        "mock-embedding"
    }
}

/// Retrieval fake that replays scripted responses and records queries
#[derive(Default)]
pub struct MockRetrievalService {
    responses: Mutex<VecDeque<RetrievalOutput>>,
    queries: Mutex<Vec<String>>,
}

impl MockRetrievalService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the response for the next call
    pub fn push_response(&self, output: RetrievalOutput) {
        self.responses.lock().push_back(output);
    }

    /// Queue an empty (no passages) response
    pub fn push_empty(&self) {
        self.push_response(RetrievalOutput {
            answer: "No relevant content was found.".to_string(),
            passages: Vec::new(),
            subqueries: Vec::new(),
            disposition: AnswerDisposition::NoContent,
        });
    }

    /// Queries received so far, in order
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl RetrievalService for MockRetrievalService {
    async fn retrieve(
        &self,
        _project_id: &str,
        query: &str,
        _history: &[ChatTurn],
    ) -> Result<RetrievalOutput> {
        self.queries.lock().push(query.to_string());
        self.responses.lock().pop_front().ok_or_else(|| {
            Error::external("mock-retrieval", "no scripted response queued")
        })
    }

    fn name(&self) -> &str {
        "mock-retrieval"
    }
}

/// Index fake that records upserted entries
#[derive(Default)]
pub struct MockIndexSink {
    entries: Mutex<HashMap<String, IndexEntry>>,
    batches: AtomicUsize,
}

impl MockIndexSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently in the fake index
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of upsert batches received
    pub fn batch_count(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    /// Entry stored for a chunk id, if any
    pub fn get(&self, chunk_id: &str) -> Option<IndexEntry> {
        self.entries.lock().get(chunk_id).cloned()
    }
}

#[async_trait]
impl IndexSink for MockIndexSink {
    async fn upsert(&self, _project_id: &str, entries: &[IndexEntry]) -> Result<()> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        let mut store = self.entries.lock();
        for entry in entries {
            store.insert(entry.chunk_id.clone(), entry.clone());
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "mock-index"
    }
}
