//! Resumable batch embedding
//!
//! Chunks are embedded in fixed-size batches in (document, sequence) order.
//! The persisted embedding records are the unit of progress: each batch is
//! committed before the next one starts, and the skip set is re-read from the
//! store before every batch, so a restart resumes exactly where the last
//! commit left off and a stale skip set can never orphan a chunk.

use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use crate::providers::EmbeddingProvider;
use crate::storage::PipelineDb;
use crate::types::{Chunk, EmbeddingRecord, Stage};

use super::{retry_with_backoff, TaskHandle};

/// Embedding stage executor
pub struct EmbeddingBatchProcessor {
    db: Arc<PipelineDb>,
    provider: Arc<dyn EmbeddingProvider>,
    config: EmbeddingConfig,
}

impl EmbeddingBatchProcessor {
    pub fn new(
        db: Arc<PipelineDb>,
        provider: Arc<dyn EmbeddingProvider>,
        config: EmbeddingConfig,
    ) -> Self {
        Self {
            db,
            provider,
            config,
        }
    }

    /// Embed every chunk of a project that does not yet have a record
    ///
    /// `force` bypasses the already-embedded skip check for this invocation;
    /// records are overwritten in place, keyed by chunk id. A failed batch
    /// marks its chunks in the task error list and processing continues with
    /// the next batch.
    pub async fn run(&self, project_id: &str, task: &TaskHandle, force: bool) -> Result<()> {
        let chunks = self.db.list_chunks(project_id)?;
        task.update(|t| t.progress.items_total = chunks.len())?;

        let call_timeout = Duration::from_secs(self.config.timeout_secs);
        let total_batches = chunks.len().div_ceil(self.config.batch_size.max(1));

        for (batch_num, batch) in chunks.chunks(self.config.batch_size.max(1)).enumerate() {
            task.checkpoint()?;

            // Fresh skip set per batch: only what is durably committed counts
            let embedded = if force {
                Default::default()
            } else {
                self.db.embedded_chunk_ids(project_id)?
            };
            let pending: Vec<&Chunk> = batch
                .iter()
                .filter(|chunk| !embedded.contains(&chunk.id))
                .collect();

            let skipped = batch.len() - pending.len();
            if skipped > 0 {
                task.update(|t| t.progress.items_skipped += skipped)?;
            }
            if pending.is_empty() {
                continue;
            }

            let texts: Vec<String> = pending
                .iter()
                .map(|chunk| chunk.enriched_content.clone())
                .collect();

            let result = retry_with_backoff(
                self.provider.name(),
                self.config.max_retries.max(1),
                call_timeout,
                || self.provider.embed_batch(&texts),
            )
            .await
            .and_then(|vectors| {
                if vectors.len() == pending.len() {
                    Ok(vectors)
                } else {
                    Err(Error::external(
                        self.provider.name(),
                        format!(
                            "batch returned {} vectors for {} chunks",
                            vectors.len(),
                            pending.len()
                        ),
                    ))
                }
            });

            match result {
                Ok(vectors) => {
                    for (chunk, vector) in pending.iter().zip(vectors) {
                        let record =
                            EmbeddingRecord::new(&chunk.id, vector, self.provider.model_tag());
                        self.db.upsert_embedding(project_id, &record)?;
                    }
                    // Counters move only after the batch commit
                    task.update(|t| t.progress.items_processed += pending.len())?;
                    tracing::debug!(
                        batch = batch_num + 1,
                        total_batches,
                        embedded = pending.len(),
                        "batch committed"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        batch = batch_num + 1,
                        total_batches,
                        "batch failed after {} attempts: {}",
                        self.config.max_retries,
                        e
                    );
                    let message = e.to_string();
                    for chunk in &pending {
                        task.add_error(&chunk.id, Stage::Embedding, &message);
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashmap::DashMap;

    use crate::providers::mock::MockEmbeddingProvider;
    use crate::types::{chunk_id, DocumentRecord, PipelineTask, TaskStatus};

    fn seed_chunks(db: &PipelineDb, n: usize) -> (DocumentRecord, Vec<Chunk>) {
        let mut doc = DocumentRecord::new("proj", "a.pdf", 10, chrono::Utc::now());
        doc.content_hash = "feedbeef00112233".to_string();
        let chunks: Vec<Chunk> = (0..n)
            .map(|i| Chunk {
                id: chunk_id(&doc.content_hash, i),
                document_id: doc.id,
                document_hash: doc.content_hash.clone(),
                content: format!("body {}", i),
                enriched_content: format!("Document: a\n\nbody {}", i),
                location: "Page 1".to_string(),
                section_hierarchy: Vec::new(),
                seq: i as u32,
                token_count: 2,
                enriched_token_count: 4,
            })
            .collect();
        db.replace_document_chunks("proj", doc.id, &chunks).unwrap();
        (doc, chunks)
    }

    fn handle(db: &Arc<PipelineDb>) -> TaskHandle {
        let registry = Arc::new(DashMap::new());
        TaskHandle::new(
            PipelineTask::new("proj", crate::types::Stage::Embedding),
            db.clone(),
            registry,
        )
        .unwrap()
    }

    fn processor(
        db: &Arc<PipelineDb>,
        provider: &Arc<MockEmbeddingProvider>,
        batch_size: usize,
    ) -> EmbeddingBatchProcessor {
        EmbeddingBatchProcessor::new(
            db.clone(),
            provider.clone() as Arc<dyn EmbeddingProvider>,
            EmbeddingConfig {
                batch_size,
                dimensions: 16,
                max_retries: 2,
                timeout_secs: 5,
            },
        )
    }

    #[tokio::test]
    async fn embeds_all_chunks_in_batches() {
        let db = Arc::new(PipelineDb::in_memory().unwrap());
        let (_, chunks) = seed_chunks(&db, 7);
        let provider = Arc::new(MockEmbeddingProvider::new(16));
        let task = handle(&db);

        processor(&db, &provider, 3)
            .run("proj", &task, false)
            .await
            .unwrap();

        assert_eq!(db.count_embeddings("proj").unwrap(), 7);
        assert_eq!(provider.call_count(), 3);
        let snapshot = task.snapshot().unwrap();
        assert_eq!(snapshot.progress.items_processed, 7);
        assert!(snapshot.errors.is_empty());
        for chunk in &chunks {
            assert!(db.get_embedding(&chunk.id).unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn resume_skips_committed_batches_and_converges() {
        let db = Arc::new(PipelineDb::in_memory().unwrap());
        let (_, chunks) = seed_chunks(&db, 6);

        // First run embeds only the first batch by hand
        let provider = Arc::new(MockEmbeddingProvider::new(16));
        for chunk in &chunks[..3] {
            let vectors = provider
                .embed_batch(&[chunk.enriched_content.clone()])
                .await
                .unwrap();
            db.upsert_embedding(
                "proj",
                &EmbeddingRecord::new(&chunk.id, vectors[0].clone(), provider.model_tag()),
            )
            .unwrap();
        }
        let baseline_calls = provider.call_count();

        let task = handle(&db);
        processor(&db, &provider, 3)
            .run("proj", &task, false)
            .await
            .unwrap();

        // Only the remaining batch was sent to the provider
        assert_eq!(provider.call_count(), baseline_calls + 1);
        assert_eq!(db.count_embeddings("proj").unwrap(), 6);
        let snapshot = task.snapshot().unwrap();
        assert_eq!(snapshot.progress.items_skipped, 3);
        assert_eq!(snapshot.progress.items_processed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_batch_is_reported_and_following_batches_continue() {
        let db = Arc::new(PipelineDb::in_memory().unwrap());
        seed_chunks(&db, 6);
        let provider = Arc::new(MockEmbeddingProvider::new(16));
        // Exhaust both attempts for the first batch
        provider.fail_next(2);
        let task = handle(&db);

        processor(&db, &provider, 3)
            .run("proj", &task, false)
            .await
            .unwrap();

        let snapshot = task.snapshot().unwrap();
        assert_eq!(snapshot.progress.items_failed, 3);
        assert_eq!(snapshot.progress.items_processed, 3);
        assert_eq!(snapshot.errors.len(), 3);
        assert_eq!(db.count_embeddings("proj").unwrap(), 3);
        assert_eq!(snapshot.finish_status(), TaskStatus::SucceededWithErrors);

        // Re-running embeds just the failed subset
        let retry_task = handle(&db);
        processor(&db, &provider, 3)
            .run("proj", &retry_task, false)
            .await
            .unwrap();
        assert_eq!(db.count_embeddings("proj").unwrap(), 6);
        let retry_snapshot = retry_task.snapshot().unwrap();
        assert_eq!(retry_snapshot.progress.items_skipped, 3);
        assert_eq!(retry_snapshot.progress.items_processed, 3);
    }

    #[tokio::test]
    async fn force_reembeds_everything_without_duplicates() {
        let db = Arc::new(PipelineDb::in_memory().unwrap());
        seed_chunks(&db, 4);
        let provider = Arc::new(MockEmbeddingProvider::new(16));

        let task = handle(&db);
        processor(&db, &provider, 2)
            .run("proj", &task, false)
            .await
            .unwrap();
        assert_eq!(db.count_embeddings("proj").unwrap(), 4);

        let force_task = handle(&db);
        processor(&db, &provider, 2)
            .run("proj", &force_task, true)
            .await
            .unwrap();
        // Overwritten in place, still one record per chunk
        assert_eq!(db.count_embeddings("proj").unwrap(), 4);
        assert_eq!(
            force_task.snapshot().unwrap().progress.items_processed,
            4
        );
    }

    #[tokio::test]
    async fn cancellation_stops_at_batch_boundary() {
        let db = Arc::new(PipelineDb::in_memory().unwrap());
        seed_chunks(&db, 6);
        let provider = Arc::new(MockEmbeddingProvider::new(16));
        let task = handle(&db);
        task.request_cancel();

        let result = processor(&db, &provider, 3).run("proj", &task, false).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(db.count_embeddings("proj").unwrap(), 0);
        assert_eq!(provider.call_count(), 0);
    }
}
