//! Pipeline orchestrator
//!
//! Drives the stage sequence `extraction -> deduplication -> chunking ->
//! embedding -> indexing` as a task-per-stage state machine. Guarantees:
//! at most one running task per project and stage, upstream output present
//! before a stage starts, staleness detection against the fingerprint each
//! stage last consumed, cooperative cancellation at unit boundaries, and
//! force re-run that overwrites prior output in place under stable keys.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::join_all;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::ingestion::{resolve_inventory, StructureChunker};
use crate::providers::{EmbeddingProvider, ExtractionService, IndexEntry, IndexSink};
use crate::storage::PipelineDb;
use crate::types::{
    chunk_id, Chunk, DocumentRecord, ExtractionStatus, PipelineTask, Stage, TaskStatus,
};

use super::{retry_with_backoff, EmbeddingBatchProcessor, TaskHandle};

/// Stage sequencer and task state machine
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: PipelineConfig,
    db: Arc<PipelineDb>,
    extraction: Arc<dyn ExtractionService>,
    embedding: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn IndexSink>,
    /// Live tasks, source of truth while a task runs
    registry: Arc<DashMap<Uuid, PipelineTask>>,
    /// Handles with cancellation flags
    handles: DashMap<Uuid, TaskHandle>,
    /// Exclusivity claims: one running task per (project, stage)
    running: DashMap<(String, Stage), Uuid>,
    /// Join handles for completion waiting
    joins: DashMap<Uuid, JoinHandle<()>>,
}

impl Orchestrator {
    pub fn new(
        config: PipelineConfig,
        db: Arc<PipelineDb>,
        extraction: Arc<dyn ExtractionService>,
        embedding: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn IndexSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                db,
                extraction,
                embedding,
                index,
                registry: Arc::new(DashMap::new()),
                handles: DashMap::new(),
                running: DashMap::new(),
                joins: DashMap::new(),
            }),
        }
    }

    /// Register an uploaded file with the pipeline
    ///
    /// Re-registering a filename updates the existing record and resets its
    /// extraction status; records are never deleted here.
    pub fn register_document(
        &self,
        project_id: &str,
        filename: &str,
        file_size: u64,
        modified_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<DocumentRecord> {
        let record = match self.inner.db.get_document_by_filename(project_id, filename)? {
            Some(mut existing) => {
                existing.file_size = file_size;
                existing.modified_at = modified_at;
                existing.extraction_status = ExtractionStatus::Pending;
                existing
            }
            None => DocumentRecord::new(project_id, filename, file_size, modified_at),
        };
        self.inner.db.upsert_document(&record)?;
        tracing::info!(project_id, filename, "document registered");
        Ok(record)
    }

    /// Invoke a stage for a project
    ///
    /// Returns the task id immediately; the stage body runs in the background.
    /// Rejects with [`Error::StateConflict`] when the same stage is already
    /// queued or running for the project, or when the upstream output is
    /// absent. A fingerprint mismatch against the stage's last consumed input
    /// re-runs the stage with its skip checks bypassed.
    pub async fn run_stage(&self, project_id: &str, stage: Stage, force: bool) -> Result<Uuid> {
        let inner = &self.inner;
        let key = (project_id.to_string(), stage);
        let task = PipelineTask::new(project_id, stage);
        let task_id = task.id;

        match inner.running.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                return Err(Error::conflict(format!(
                    "stage '{}' already has task {} for project '{}'",
                    stage,
                    entry.get(),
                    project_id
                )));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(task_id);
            }
        }

        let prepared = inner.prepare(project_id, stage, force);
        let (fingerprint, effective_force) = match prepared {
            Ok(prep) => prep,
            Err(e) => {
                inner.running.remove(&key);
                return Err(e);
            }
        };

        let handle = match TaskHandle::new(task, inner.db.clone(), inner.registry.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                inner.running.remove(&key);
                return Err(e);
            }
        };
        inner.handles.insert(task_id, handle.clone());

        let spawn_inner = self.inner.clone();
        let project = project_id.to_string();
        let join = tokio::spawn(async move {
            spawn_inner
                .execute(&project, stage, &handle, fingerprint, effective_force)
                .await;
            spawn_inner.running.remove(&key);
        });
        inner.joins.insert(task_id, join);

        Ok(task_id)
    }

    /// Current state of a task
    pub fn get_task(&self, task_id: Uuid) -> Result<Option<PipelineTask>> {
        if let Some(task) = self.inner.registry.get(&task_id) {
            return Ok(Some(task.value().clone()));
        }
        self.inner.db.get_task(task_id)
    }

    /// Request cooperative cancellation of a running task
    pub fn cancel_task(&self, task_id: Uuid) -> Result<()> {
        let handle = self
            .inner
            .handles
            .get(&task_id)
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
        if let Some(task) = handle.snapshot() {
            if task.status.is_terminal() {
                return Err(Error::conflict(format!(
                    "task {} already finished as {:?}",
                    task_id, task.status
                )));
            }
        }
        handle.request_cancel();
        tracing::info!(%task_id, "cancellation requested");
        Ok(())
    }

    /// Wait for a task to finish and return its final state
    pub async fn wait(&self, task_id: Uuid) -> Result<PipelineTask> {
        if let Some((_, join)) = self.inner.joins.remove(&task_id) {
            let _ = join.await;
        }
        self.get_task(task_id)?
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))
    }

    /// All tasks recorded for a project, newest first
    pub fn list_tasks(&self, project_id: &str) -> Result<Vec<PipelineTask>> {
        self.inner.db.list_tasks(project_id)
    }

    /// Direct store access for read-side callers (CLI status, query planner)
    pub fn db(&self) -> Arc<PipelineDb> {
        self.inner.db.clone()
    }
}

impl Inner {
    /// Validate prerequisites and detect staleness before a stage starts
    ///
    /// Returns the upstream fingerprint to record and whether skip checks
    /// should be bypassed for this invocation.
    fn prepare(&self, project_id: &str, stage: Stage, force: bool) -> Result<(Option<String>, bool)> {
        let current = self.upstream_fingerprint(project_id, stage)?;

        let last = self.db.latest_successful_task(project_id, stage)?;
        let stale = match (&current, &last) {
            (Some(cur), Some(task)) => task.input_fingerprint.as_deref() != Some(cur.as_str()),
            _ => false,
        };
        if stale {
            tracing::info!(
                project_id,
                stage = %stage,
                "upstream output changed since last run, re-running stage"
            );
        }

        Ok((current, force || stale))
    }

    /// Fingerprint of the upstream output a stage is about to consume
    ///
    /// Errors with a state conflict when the upstream output is absent, so the
    /// stage is refused before any work starts.
    fn upstream_fingerprint(&self, project_id: &str, stage: Stage) -> Result<Option<String>> {
        match stage {
            Stage::Extraction => {
                if self.db.list_documents(project_id)?.is_empty() {
                    return Err(Error::conflict(format!(
                        "no documents registered for project '{}'",
                        project_id
                    )));
                }
                Ok(None)
            }
            Stage::Deduplication => {
                let keys: Vec<String> = self
                    .db
                    .list_documents(project_id)?
                    .into_iter()
                    .filter(|d| d.extraction_status == ExtractionStatus::Completed)
                    .map(|d| {
                        format!("{}:{}", d.id, d.extracted_text_key.unwrap_or_default())
                    })
                    .collect();
                if keys.is_empty() {
                    return Err(Error::conflict(
                        "extraction output absent; run extraction first",
                    ));
                }
                Ok(Some(fingerprint(keys)))
            }
            Stage::Chunking => {
                let keys: Vec<String> = self
                    .db
                    .list_canonical_documents(project_id)?
                    .into_iter()
                    .map(|d| format!("{}:{}", d.id, d.content_hash))
                    .collect();
                if keys.is_empty() {
                    return Err(Error::conflict(
                        "document inventory absent; run deduplication first",
                    ));
                }
                Ok(Some(fingerprint(keys)))
            }
            Stage::Embedding => {
                let keys: Vec<String> = self
                    .db
                    .list_chunks(project_id)?
                    .into_iter()
                    .map(|c| c.id)
                    .collect();
                if keys.is_empty() {
                    return Err(Error::conflict("chunk set absent; run chunking first"));
                }
                Ok(Some(fingerprint(keys)))
            }
            Stage::Indexing => {
                let mut keys: Vec<String> =
                    self.db.embedded_chunk_ids(project_id)?.into_iter().collect();
                if keys.is_empty() {
                    return Err(Error::conflict("embeddings absent; run embedding first"));
                }
                keys.sort();
                Ok(Some(fingerprint(keys)))
            }
        }
    }

    /// Run a stage body and settle the task into its terminal state
    async fn execute(
        &self,
        project_id: &str,
        stage: Stage,
        handle: &TaskHandle,
        fingerprint: Option<String>,
        force: bool,
    ) {
        let started = handle.update(|task| {
            task.status = TaskStatus::Running;
            task.started_at = Some(chrono::Utc::now());
            task.input_fingerprint = fingerprint;
        });
        if let Err(e) = started {
            tracing::error!("failed to start task: {}", e);
            return;
        }
        tracing::info!(project_id, stage = %stage, task_id = %handle.id(), "stage started");

        let result = match stage {
            Stage::Extraction => self.run_extraction(project_id, handle, force).await,
            Stage::Deduplication => self.run_deduplication(project_id, handle).await,
            Stage::Chunking => self.run_chunking(project_id, handle, force).await,
            Stage::Embedding => {
                EmbeddingBatchProcessor::new(
                    self.db.clone(),
                    self.embedding.clone(),
                    self.config.embedding.clone(),
                )
                .run(project_id, handle, force)
                .await
            }
            Stage::Indexing => self.run_indexing(project_id, handle).await,
        };

        let final_status = match result {
            Ok(()) => handle
                .snapshot()
                .map(|task| task.finish_status())
                .unwrap_or(TaskStatus::Succeeded),
            Err(Error::Cancelled) => TaskStatus::Cancelled,
            Err(e) => {
                handle.add_error(stage.as_str(), stage, e.to_string());
                TaskStatus::Failed
            }
        };

        if let Err(e) = handle.update(|task| {
            task.status = final_status;
            task.finished_at = Some(chrono::Utc::now());
        }) {
            tracing::error!("failed to finish task: {}", e);
        }
        tracing::info!(
            project_id,
            stage = %stage,
            task_id = %handle.id(),
            status = ?final_status,
            "stage finished"
        );
    }

    /// Extraction stage: bounded fan-out over documents, per-call timeout
    async fn run_extraction(&self, project_id: &str, task: &TaskHandle, force: bool) -> Result<()> {
        let documents = self.db.list_documents(project_id)?;
        task.update(|t| t.progress.items_total = documents.len())?;

        let parallel = self
            .config
            .processing
            .parallel_extractions
            .unwrap_or_else(|| num_cpus::get().min(8))
            .max(1);
        let semaphore = Arc::new(Semaphore::new(parallel));
        let call_timeout = Duration::from_secs(self.config.processing.extraction_timeout_secs);

        let futures: Vec<_> = documents
            .into_iter()
            .map(|mut doc| {
                let task = task.clone();
                let semaphore = semaphore.clone();
                let extraction = self.extraction.clone();
                let db = self.db.clone();
                let project = project_id.to_string();
                async move {
                    let _permit = semaphore.acquire().await.expect("semaphore open");
                    if task.is_cancelled() {
                        return;
                    }
                    if doc.extraction_status == ExtractionStatus::Completed && !force {
                        let _ = task.update(|t| t.progress.items_skipped += 1);
                        return;
                    }

                    doc.extraction_status = ExtractionStatus::Processing;
                    let _ = db.upsert_document(&doc);

                    let result =
                        retry_with_backoff("extraction", 2, call_timeout, || {
                            extraction.extract(&doc)
                        })
                        .await;

                    match result {
                        Ok(extracted) if extracted.markdown.trim().is_empty() => {
                            doc.extraction_status = ExtractionStatus::Failed;
                            let _ = db.upsert_document(&doc);
                            task.add_error(
                                &doc.filename,
                                Stage::Extraction,
                                "extraction returned empty output",
                            );
                        }
                        Ok(extracted) => {
                            let key = format!("{}/{}", project, doc.filename);
                            match db.put_extracted_text(&key, &project, &extracted.markdown) {
                                Ok(()) => {
                                    doc.extraction_status = ExtractionStatus::Completed;
                                    doc.extracted_text_key = Some(key);
                                    let _ = db.upsert_document(&doc);
                                    let _ = task.update(|t| t.progress.items_processed += 1);
                                }
                                Err(e) => {
                                    doc.extraction_status = ExtractionStatus::Failed;
                                    let _ = db.upsert_document(&doc);
                                    task.add_error(&doc.filename, Stage::Extraction, e.to_string());
                                }
                            }
                        }
                        Err(e) => {
                            doc.extraction_status = ExtractionStatus::Failed;
                            let _ = db.upsert_document(&doc);
                            task.add_error(&doc.filename, Stage::Extraction, e.to_string());
                        }
                    }
                }
            })
            .collect();

        join_all(futures).await;
        task.checkpoint()?;
        Ok(())
    }

    /// Deduplication stage: local hashing only, no external calls
    async fn run_deduplication(&self, project_id: &str, task: &TaskHandle) -> Result<()> {
        let completed: Vec<DocumentRecord> = self
            .db
            .list_documents(project_id)?
            .into_iter()
            .filter(|d| d.extraction_status == ExtractionStatus::Completed)
            .collect();
        task.update(|t| t.progress.items_total = completed.len())?;

        let mut inputs = Vec::with_capacity(completed.len());
        for doc in completed {
            let text = match &doc.extracted_text_key {
                Some(key) => self.db.get_extracted_text(key)?,
                None => None,
            };
            inputs.push((doc, text));
        }

        let resolution = resolve_inventory(&inputs);
        for (item, message) in &resolution.errors {
            task.add_error(item, Stage::Deduplication, message);
        }
        for update in &resolution.updates {
            let Some(mut doc) = self.db.get_document(update.document_id)? else {
                continue;
            };
            doc.content_hash = update.content_hash.clone();
            doc.dedup_status = update.status;
            doc.superseded_by = update.superseded_by;
            self.db.upsert_document(&doc)?;
        }
        task.update(|t| t.progress.items_processed = resolution.updates.len())?;

        tracing::info!(
            project_id,
            canonical = resolution.canonical_ids().len(),
            superseded = resolution.updates.len() - resolution.canonical_ids().len(),
            "inventory resolved"
        );
        Ok(())
    }

    /// Chunking stage: per-document, cancellation observed per document
    async fn run_chunking(&self, project_id: &str, task: &TaskHandle, force: bool) -> Result<()> {
        let documents = self.db.list_canonical_documents(project_id)?;
        task.update(|t| t.progress.items_total = documents.len())?;

        let chunker = StructureChunker::new(self.config.chunking.clone());
        for doc in documents {
            task.checkpoint()?;

            // Chunk ids derive from the content hash; the first chunk existing
            // means this exact content was already chunked
            if !force {
                let already = self
                    .db
                    .get_chunk(&chunk_id(&doc.content_hash, 0))?
                    .map(|c| c.document_id == doc.id)
                    .unwrap_or(false);
                if already {
                    task.update(|t| t.progress.items_skipped += 1)?;
                    continue;
                }
            }

            let text = match &doc.extracted_text_key {
                Some(key) => self.db.get_extracted_text(key)?,
                None => None,
            };
            let Some(text) = text else {
                task.add_error(&doc.filename, Stage::Chunking, "extracted text missing");
                continue;
            };

            let chunks = chunker.chunk_document(&doc, &text);
            self.db
                .replace_document_chunks(project_id, doc.id, &chunks)?;
            task.update(|t| t.progress.items_processed += 1)?;
            tracing::debug!(filename = %doc.filename, chunks = chunks.len(), "document chunked");
        }
        Ok(())
    }

    /// Indexing stage: push embedded chunks to the external index in batches
    async fn run_indexing(&self, project_id: &str, task: &TaskHandle) -> Result<()> {
        let embedded = self.db.embedded_chunk_ids(project_id)?;
        let chunks: Vec<Chunk> = self
            .db
            .list_chunks(project_id)?
            .into_iter()
            .filter(|c| embedded.contains(&c.id))
            .collect();
        task.update(|t| t.progress.items_total = chunks.len())?;

        let call_timeout = Duration::from_secs(self.config.processing.index_timeout_secs);
        let mut filenames: HashMap<Uuid, String> = HashMap::new();

        for batch in chunks.chunks(self.config.processing.index_batch_size.max(1)) {
            task.checkpoint()?;

            let mut entries = Vec::with_capacity(batch.len());
            for chunk in batch {
                let filename = match filenames.get(&chunk.document_id) {
                    Some(name) => name.clone(),
                    None => {
                        let name = self
                            .db
                            .get_document(chunk.document_id)?
                            .map(|d| d.filename)
                            .unwrap_or_default();
                        filenames.insert(chunk.document_id, name.clone());
                        name
                    }
                };
                let Some(embedding) = self.db.get_embedding(&chunk.id)? else {
                    continue;
                };
                entries.push(IndexEntry {
                    chunk_id: chunk.id.clone(),
                    content: chunk.enriched_content.clone(),
                    vector: embedding.vector,
                    source_file: filename,
                    location: chunk.location.clone(),
                });
            }

            let result = retry_with_backoff("index", 3, call_timeout, || {
                self.index.upsert(project_id, &entries)
            })
            .await;

            match result {
                Ok(()) => {
                    task.update(|t| t.progress.items_processed += entries.len())?;
                }
                Err(e) => {
                    let message = e.to_string();
                    for chunk in batch {
                        task.add_error(&chunk.id, Stage::Indexing, &message);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Stable fingerprint over a set of keys: sha256 of the sorted, joined set
fn fingerprint<I: IntoIterator<Item = String>>(keys: I) -> String {
    let mut keys: Vec<String> = keys.into_iter().collect();
    keys.sort();
    let mut hasher = Sha256::new();
    hasher.update(keys.join("\n").as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::{
        MockEmbeddingProvider, MockExtractionService, MockIndexSink,
    };

    struct Harness {
        orchestrator: Orchestrator,
        extraction: Arc<MockExtractionService>,
        index: Arc<MockIndexSink>,
    }

    fn harness() -> Harness {
        let db = Arc::new(PipelineDb::in_memory().unwrap());
        let extraction = Arc::new(MockExtractionService::new());
        let embedding = Arc::new(MockEmbeddingProvider::new(16));
        let index = Arc::new(MockIndexSink::new());
        let orchestrator = Orchestrator::new(
            PipelineConfig::default(),
            db,
            extraction.clone(),
            embedding,
            index.clone(),
        );
        Harness {
            orchestrator,
            extraction,
            index,
        }
    }

    async fn run_and_wait(h: &Harness, stage: Stage) -> PipelineTask {
        let id = h.orchestrator.run_stage("proj", stage, false).await.unwrap();
        h.orchestrator.wait(id).await.unwrap()
    }

    fn long_markdown(pages: usize) -> String {
        (1..=pages)
            .map(|p| {
                format!(
                    "## Page {}\n{}",
                    p,
                    (0..30)
                        .map(|i| format!("Plenty of words fill sentence {} on this page.", i))
                        .collect::<Vec<_>>()
                        .join(" ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[tokio::test]
    async fn stage_with_absent_upstream_is_refused() {
        let h = harness();
        let err = h
            .orchestrator
            .run_stage("proj", Stage::Extraction, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StateConflict(_)));

        h.orchestrator
            .register_document("proj", "a.pdf", 10, chrono::Utc::now())
            .unwrap();
        for stage in [Stage::Deduplication, Stage::Chunking, Stage::Embedding, Stage::Indexing] {
            let err = h.orchestrator.run_stage("proj", stage, false).await.unwrap_err();
            assert!(
                matches!(err, Error::StateConflict(_)),
                "stage {} should be refused before its upstream ran",
                stage
            );
        }
    }

    #[tokio::test]
    async fn second_invocation_of_running_stage_is_rejected() {
        let h = harness();
        h.orchestrator
            .register_document("proj", "a.pdf", 10, chrono::Utc::now())
            .unwrap();
        h.extraction.insert("a.pdf", long_markdown(1));

        let first = h
            .orchestrator
            .run_stage("proj", Stage::Extraction, false)
            .await
            .unwrap();
        // The spawned body has not run yet on this runtime; the claim is held
        let err = h
            .orchestrator
            .run_stage("proj", Stage::Extraction, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StateConflict(_)));

        let finished = h.orchestrator.wait(first).await.unwrap();
        assert_eq!(finished.status, TaskStatus::Succeeded);

        // After completion the stage can run again
        let second = h
            .orchestrator
            .run_stage("proj", Stage::Extraction, false)
            .await
            .unwrap();
        let finished = h.orchestrator.wait(second).await.unwrap();
        assert!(finished.status.is_terminal());
    }

    #[tokio::test]
    async fn cancelled_before_start_lands_in_cancelled_without_output() {
        let h = harness();
        h.orchestrator
            .register_document("proj", "a.pdf", 10, chrono::Utc::now())
            .unwrap();
        h.extraction.insert("a.pdf", long_markdown(2));

        let id = h
            .orchestrator
            .run_stage("proj", Stage::Extraction, false)
            .await
            .unwrap();
        h.orchestrator.cancel_task(id).unwrap();
        let task = h.orchestrator.wait(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(task.progress.items_processed, 0);

        // Cancelling a finished task is a conflict
        assert!(matches!(
            h.orchestrator.cancel_task(id),
            Err(Error::StateConflict(_))
        ));
    }

    #[tokio::test]
    async fn per_document_extraction_failures_do_not_abort_the_batch() {
        let h = harness();
        h.orchestrator
            .register_document("proj", "good.pdf", 10, chrono::Utc::now())
            .unwrap();
        h.orchestrator
            .register_document("proj", "bad.pdf", 10, chrono::Utc::now())
            .unwrap();
        h.extraction.insert("good.pdf", long_markdown(1));
        // bad.pdf has no registered output -> per-document input error

        let task = run_and_wait(&h, Stage::Extraction).await;
        assert_eq!(task.status, TaskStatus::SucceededWithErrors);
        assert_eq!(task.progress.items_processed, 1);
        assert_eq!(task.progress.items_failed, 1);
        assert_eq!(task.errors.len(), 1);
        assert_eq!(task.errors[0].item, "bad.pdf");
    }

    #[tokio::test]
    async fn skip_checks_and_force_rerun() {
        let h = harness();
        h.orchestrator
            .register_document("proj", "a.pdf", 10, chrono::Utc::now())
            .unwrap();
        h.extraction.insert("a.pdf", long_markdown(1));

        let first = run_and_wait(&h, Stage::Extraction).await;
        assert_eq!(first.progress.items_processed, 1);

        // Second run skips the already-extracted document
        let second = run_and_wait(&h, Stage::Extraction).await;
        assert_eq!(second.progress.items_skipped, 1);
        assert_eq!(second.progress.items_processed, 0);

        // Force bypasses the skip check for one invocation
        let id = h
            .orchestrator
            .run_stage("proj", Stage::Extraction, true)
            .await
            .unwrap();
        let forced = h.orchestrator.wait(id).await.unwrap();
        assert_eq!(forced.progress.items_processed, 1);
        assert_eq!(forced.progress.items_skipped, 0);
    }

    #[tokio::test]
    async fn full_stage_sequence_produces_index_entries() {
        let h = harness();
        h.orchestrator
            .register_document("proj", "a.pdf", 10, chrono::Utc::now())
            .unwrap();
        h.extraction.insert("a.pdf", long_markdown(3));

        for stage in [
            Stage::Extraction,
            Stage::Deduplication,
            Stage::Chunking,
            Stage::Embedding,
            Stage::Indexing,
        ] {
            let task = run_and_wait(&h, stage).await;
            assert_eq!(task.status, TaskStatus::Succeeded, "stage {} failed", stage);
        }

        let db = h.orchestrator.db();
        let chunk_count = db.count_chunks("proj").unwrap();
        assert!(chunk_count > 0);
        assert_eq!(db.count_embeddings("proj").unwrap(), chunk_count);
        assert_eq!(h.index.len(), chunk_count);
    }

    #[tokio::test]
    async fn upstream_change_forces_downstream_rerun() {
        let h = harness();
        h.orchestrator
            .register_document("proj", "a.pdf", 10, chrono::Utc::now())
            .unwrap();
        h.extraction.insert("a.pdf", long_markdown(2));

        for stage in [Stage::Extraction, Stage::Deduplication, Stage::Chunking] {
            run_and_wait(&h, stage).await;
        }

        // A second document changes the inventory under chunking's feet
        h.orchestrator
            .register_document("proj", "b.pdf", 10, chrono::Utc::now())
            .unwrap();
        h.extraction.insert("b.pdf", long_markdown(1));
        run_and_wait(&h, Stage::Extraction).await;
        run_and_wait(&h, Stage::Deduplication).await;

        // The fingerprint mismatch re-runs chunking for everything
        let task = run_and_wait(&h, Stage::Chunking).await;
        assert_eq!(task.progress.items_processed, 2);
        assert_eq!(task.progress.items_skipped, 0);

        // With a settled inventory the per-document skip check applies again
        let task = run_and_wait(&h, Stage::Chunking).await;
        assert_eq!(task.progress.items_skipped, 2);
    }
}
