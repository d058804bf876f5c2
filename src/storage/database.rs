//! SQLite store for pipeline state
//!
//! Durable keyed collections for document records, extracted text, chunks,
//! embedding records, and the task log. State survives process restart, which
//! is what makes the resume and idempotency checks work. Writes follow a
//! single-writer-per-key discipline: project+stage for tasks, chunk id for
//! embeddings.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{
    Chunk, DedupStatus, DocumentRecord, EmbeddingRecord, ExtractionStatus, PipelineTask,
    SourceFormat, Stage, TaskErrorEntry, TaskProgress, TaskStatus,
};

/// SQLite-backed pipeline store
pub struct PipelineDb {
    conn: Arc<Mutex<Connection>>,
}

impl PipelineDb {
    /// Create or open the database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| Error::storage(format!("failed to open database: {}", e)))?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Create an in-memory database (tests and dry runs)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::storage(format!("failed to open in-memory database: {}", e)))?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA cache_size=10000;
            PRAGMA temp_store=MEMORY;
        "#,
        )
        .map_err(|e| Error::storage(format!("failed to set pragmas: {}", e)))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                filename TEXT NOT NULL,
                source_format TEXT NOT NULL,
                content_hash TEXT NOT NULL DEFAULT '',
                file_size INTEGER NOT NULL,
                modified_at TEXT NOT NULL,
                extraction_status TEXT NOT NULL,
                dedup_status TEXT NOT NULL,
                superseded_by TEXT,
                extracted_text_key TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_documents_project ON documents(project_id);
            CREATE INDEX IF NOT EXISTS idx_documents_content_hash ON documents(content_hash);

            CREATE TABLE IF NOT EXISTS extracted_texts (
                key TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                markdown TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                document_hash TEXT NOT NULL,
                seq INTEGER NOT NULL,
                content TEXT NOT NULL,
                enriched_content TEXT NOT NULL,
                location TEXT NOT NULL,
                section_hierarchy TEXT NOT NULL,
                token_count INTEGER NOT NULL,
                enriched_token_count INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_project ON chunks(project_id);
            CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);

            CREATE TABLE IF NOT EXISTS embeddings (
                chunk_id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                vector TEXT NOT NULL,
                model TEXT NOT NULL,
                dimensions INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_embeddings_project ON embeddings(project_id);

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                stage TEXT NOT NULL,
                status TEXT NOT NULL,
                items_total INTEGER NOT NULL DEFAULT 0,
                items_processed INTEGER NOT NULL DEFAULT 0,
                items_skipped INTEGER NOT NULL DEFAULT 0,
                items_failed INTEGER NOT NULL DEFAULT 0,
                errors TEXT NOT NULL DEFAULT '[]',
                input_fingerprint TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                finished_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_project_stage ON tasks(project_id, stage);
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
        "#,
        )
        .map_err(|e| Error::storage(format!("failed to run migrations: {}", e)))?;

        tracing::debug!("database migrations complete");
        Ok(())
    }

    // ==================== Documents ====================

    /// Insert or update a document record
    pub fn upsert_document(&self, record: &DocumentRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO documents (
                id, project_id, filename, source_format, content_hash, file_size,
                modified_at, extraction_status, dedup_status, superseded_by, extracted_text_key
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO UPDATE SET
                filename = excluded.filename,
                source_format = excluded.source_format,
                content_hash = excluded.content_hash,
                file_size = excluded.file_size,
                modified_at = excluded.modified_at,
                extraction_status = excluded.extraction_status,
                dedup_status = excluded.dedup_status,
                superseded_by = excluded.superseded_by,
                extracted_text_key = excluded.extracted_text_key
            "#,
            params![
                record.id.to_string(),
                record.project_id,
                record.filename,
                source_format_to_str(record.source_format),
                record.content_hash,
                record.file_size as i64,
                record.modified_at.to_rfc3339(),
                extraction_status_to_str(record.extraction_status),
                dedup_status_to_str(record.dedup_status),
                record.superseded_by.map(|id| id.to_string()),
                record.extracted_text_key,
            ],
        )?;
        Ok(())
    }

    /// Get a document by id
    pub fn get_document(&self, id: Uuid) -> Result<Option<DocumentRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT * FROM documents WHERE id = ?1")?;
        let record = stmt
            .query_row(params![id.to_string()], row_to_document)
            .optional()?;
        Ok(record)
    }

    /// Get a project's document by filename
    pub fn get_document_by_filename(
        &self,
        project_id: &str,
        filename: &str,
    ) -> Result<Option<DocumentRecord>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT * FROM documents WHERE project_id = ?1 AND filename = ?2")?;
        let record = stmt
            .query_row(params![project_id, filename], row_to_document)
            .optional()?;
        Ok(record)
    }

    /// List all documents for a project, ordered by filename
    pub fn list_documents(&self, project_id: &str) -> Result<Vec<DocumentRecord>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT * FROM documents WHERE project_id = ?1 ORDER BY filename")?;
        let rows = stmt.query_map(params![project_id], row_to_document)?;
        let mut documents = Vec::new();
        for row in rows {
            documents.push(row?);
        }
        Ok(documents)
    }

    /// List the canonical documents of a project, ordered by content hash
    pub fn list_canonical_documents(&self, project_id: &str) -> Result<Vec<DocumentRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM documents WHERE project_id = ?1 AND dedup_status = 'canonical'
             ORDER BY content_hash",
        )?;
        let rows = stmt.query_map(params![project_id], row_to_document)?;
        let mut documents = Vec::new();
        for row in rows {
            documents.push(row?);
        }
        Ok(documents)
    }

    /// Count documents that finished extraction for a project
    pub fn count_extracted_documents(&self, project_id: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents
             WHERE project_id = ?1 AND extraction_status = 'completed'",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ==================== Extracted text ====================

    /// Store extraction output under its storage key
    pub fn put_extracted_text(&self, key: &str, project_id: &str, markdown: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO extracted_texts (key, project_id, markdown) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET markdown = excluded.markdown",
            params![key, project_id, markdown],
        )?;
        Ok(())
    }

    /// Fetch extraction output by storage key
    pub fn get_extracted_text(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let text = conn
            .query_row(
                "SELECT markdown FROM extracted_texts WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(text)
    }

    // ==================== Chunks ====================

    /// Replace a document's chunk set
    ///
    /// Upserts by chunk id and removes chunks of the document that are no
    /// longer derived (a shorter re-extraction, a changed hash). Embeddings of
    /// removed chunks go with them. Returns the removed chunk ids.
    pub fn replace_document_chunks(
        &self,
        project_id: &str,
        document_id: Uuid,
        chunks: &[Chunk],
    ) -> Result<Vec<String>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let keep_ids: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        let mut removed = Vec::new();
        {
            let mut stmt = tx.prepare("SELECT id FROM chunks WHERE document_id = ?1")?;
            let rows = stmt.query_map(params![document_id.to_string()], |row| {
                row.get::<_, String>(0)
            })?;
            for row in rows {
                let id = row?;
                if !keep_ids.contains(id.as_str()) {
                    removed.push(id);
                }
            }
        }
        for id in &removed {
            tx.execute("DELETE FROM chunks WHERE id = ?1", params![id])?;
            tx.execute("DELETE FROM embeddings WHERE chunk_id = ?1", params![id])?;
        }

        for chunk in chunks {
            tx.execute(
                r#"
                INSERT INTO chunks (
                    id, project_id, document_id, document_hash, seq, content,
                    enriched_content, location, section_hierarchy, token_count,
                    enriched_token_count
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT(id) DO UPDATE SET
                    document_id = excluded.document_id,
                    document_hash = excluded.document_hash,
                    seq = excluded.seq,
                    content = excluded.content,
                    enriched_content = excluded.enriched_content,
                    location = excluded.location,
                    section_hierarchy = excluded.section_hierarchy,
                    token_count = excluded.token_count,
                    enriched_token_count = excluded.enriched_token_count
                "#,
                params![
                    chunk.id,
                    project_id,
                    chunk.document_id.to_string(),
                    chunk.document_hash,
                    chunk.seq as i64,
                    chunk.content,
                    chunk.enriched_content,
                    chunk.location,
                    serde_json::to_string(&chunk.section_hierarchy)?,
                    chunk.token_count as i64,
                    chunk.enriched_token_count as i64,
                ],
            )?;
        }

        tx.commit()?;
        Ok(removed)
    }

    /// Get a chunk by id
    pub fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT * FROM chunks WHERE id = ?1")?;
        let chunk = stmt.query_row(params![chunk_id], row_to_chunk).optional()?;
        Ok(chunk)
    }

    /// List a project's chunks in (document, sequence) order
    pub fn list_chunks(&self, project_id: &str) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM chunks WHERE project_id = ?1 ORDER BY document_hash, seq",
        )?;
        let rows = stmt.query_map(params![project_id], row_to_chunk)?;
        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(row?);
        }
        Ok(chunks)
    }

    /// Count a project's chunks
    pub fn count_chunks(&self, project_id: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ==================== Embeddings ====================

    /// Insert or overwrite the embedding record for a chunk
    pub fn upsert_embedding(&self, project_id: &str, record: &EmbeddingRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO embeddings (chunk_id, project_id, vector, model, dimensions, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(chunk_id) DO UPDATE SET
                vector = excluded.vector,
                model = excluded.model,
                dimensions = excluded.dimensions,
                created_at = excluded.created_at
            "#,
            params![
                record.chunk_id,
                project_id,
                serde_json::to_string(&record.vector)?,
                record.model,
                record.dimensions as i64,
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Ids of chunks that already have a persisted embedding
    pub fn embedded_chunk_ids(&self, project_id: &str) -> Result<HashSet<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT chunk_id FROM embeddings WHERE project_id = ?1")?;
        let rows = stmt.query_map(params![project_id], |row| row.get::<_, String>(0))?;
        let mut ids = HashSet::new();
        for row in rows {
            ids.insert(row?);
        }
        Ok(ids)
    }

    /// Get the embedding record for a chunk
    pub fn get_embedding(&self, chunk_id: &str) -> Result<Option<EmbeddingRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT * FROM embeddings WHERE chunk_id = ?1")?;
        let record = stmt
            .query_row(params![chunk_id], row_to_embedding)
            .optional()?;
        Ok(record)
    }

    /// Count a project's embedding records
    pub fn count_embeddings(&self, project_id: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM embeddings WHERE project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ==================== Tasks ====================

    /// Insert or update a pipeline task
    pub fn upsert_task(&self, task: &PipelineTask) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO tasks (
                id, project_id, stage, status, items_total, items_processed,
                items_skipped, items_failed, errors, input_fingerprint,
                created_at, started_at, finished_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                items_total = excluded.items_total,
                items_processed = excluded.items_processed,
                items_skipped = excluded.items_skipped,
                items_failed = excluded.items_failed,
                errors = excluded.errors,
                input_fingerprint = excluded.input_fingerprint,
                started_at = excluded.started_at,
                finished_at = excluded.finished_at
            "#,
            params![
                task.id.to_string(),
                task.project_id,
                task.stage.as_str(),
                task_status_to_str(task.status),
                task.progress.items_total as i64,
                task.progress.items_processed as i64,
                task.progress.items_skipped as i64,
                task.progress.items_failed as i64,
                serde_json::to_string(&task.errors)?,
                task.input_fingerprint,
                task.created_at.to_rfc3339(),
                task.started_at.map(|t| t.to_rfc3339()),
                task.finished_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Get a task by id
    pub fn get_task(&self, id: Uuid) -> Result<Option<PipelineTask>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT * FROM tasks WHERE id = ?1")?;
        let task = stmt
            .query_row(params![id.to_string()], row_to_task)
            .optional()?;
        Ok(task)
    }

    /// Latest finished-successfully task for a project stage, if any
    ///
    /// Carries the input fingerprint the stage last consumed; the staleness
    /// check compares against it.
    pub fn latest_successful_task(
        &self,
        project_id: &str,
        stage: Stage,
    ) -> Result<Option<PipelineTask>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM tasks WHERE project_id = ?1 AND stage = ?2
             AND status IN ('succeeded', 'succeeded_with_errors')
             ORDER BY finished_at DESC LIMIT 1",
        )?;
        let task = stmt
            .query_row(params![project_id, stage.as_str()], row_to_task)
            .optional()?;
        Ok(task)
    }

    /// List all tasks for a project, newest first
    pub fn list_tasks(&self, project_id: &str) -> Result<Vec<PipelineTask>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT * FROM tasks WHERE project_id = ?1 ORDER BY created_at DESC")?;
        let rows = stmt.query_map(params![project_id], row_to_task)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?);
        }
        Ok(tasks)
    }
}

// ==================== Row mappers & enum strings ====================

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentRecord> {
    Ok(DocumentRecord {
        id: parse_uuid(row, "id")?,
        project_id: row.get("project_id")?,
        filename: row.get("filename")?,
        source_format: source_format_from_str(&row.get::<_, String>("source_format")?),
        content_hash: row.get("content_hash")?,
        file_size: row.get::<_, i64>("file_size")? as u64,
        modified_at: parse_datetime(row, "modified_at")?,
        extraction_status: extraction_status_from_str(
            &row.get::<_, String>("extraction_status")?,
        ),
        dedup_status: dedup_status_from_str(&row.get::<_, String>("dedup_status")?),
        superseded_by: row
            .get::<_, Option<String>>("superseded_by")?
            .and_then(|s| Uuid::parse_str(&s).ok()),
        extracted_text_key: row.get("extracted_text_key")?,
    })
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
    let hierarchy: Vec<String> =
        serde_json::from_str(&row.get::<_, String>("section_hierarchy")?).unwrap_or_default();
    Ok(Chunk {
        id: row.get("id")?,
        document_id: parse_uuid(row, "document_id")?,
        document_hash: row.get("document_hash")?,
        seq: row.get::<_, i64>("seq")? as u32,
        content: row.get("content")?,
        enriched_content: row.get("enriched_content")?,
        location: row.get("location")?,
        section_hierarchy: hierarchy,
        token_count: row.get::<_, i64>("token_count")? as u32,
        enriched_token_count: row.get::<_, i64>("enriched_token_count")? as u32,
    })
}

fn row_to_embedding(row: &rusqlite::Row<'_>) -> rusqlite::Result<EmbeddingRecord> {
    let vector: Vec<f32> =
        serde_json::from_str(&row.get::<_, String>("vector")?).unwrap_or_default();
    Ok(EmbeddingRecord {
        chunk_id: row.get("chunk_id")?,
        vector,
        model: row.get("model")?,
        dimensions: row.get::<_, i64>("dimensions")? as usize,
        created_at: parse_datetime(row, "created_at")?,
    })
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<PipelineTask> {
    let errors: Vec<TaskErrorEntry> =
        serde_json::from_str(&row.get::<_, String>("errors")?).unwrap_or_default();
    Ok(PipelineTask {
        id: parse_uuid(row, "id")?,
        project_id: row.get("project_id")?,
        stage: Stage::parse(&row.get::<_, String>("stage")?).unwrap_or(Stage::Extraction),
        status: task_status_from_str(&row.get::<_, String>("status")?),
        progress: TaskProgress {
            items_total: row.get::<_, i64>("items_total")? as usize,
            items_processed: row.get::<_, i64>("items_processed")? as usize,
            items_skipped: row.get::<_, i64>("items_skipped")? as usize,
            items_failed: row.get::<_, i64>("items_failed")? as usize,
        },
        errors,
        input_fingerprint: row.get("input_fingerprint")?,
        created_at: parse_datetime(row, "created_at")?,
        started_at: parse_optional_datetime(row, "started_at")?,
        finished_at: parse_optional_datetime(row, "finished_at")?,
    })
}

fn parse_uuid(row: &rusqlite::Row<'_>, column: &str) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(column)?;
    Uuid::parse_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_datetime(row: &rusqlite::Row<'_>, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_optional_datetime(
    row: &rusqlite::Row<'_>,
    column: &str,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(column)?;
    Ok(raw
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc)))
}

fn source_format_to_str(format: SourceFormat) -> &'static str {
    match format {
        SourceFormat::Paginated => "paginated",
        SourceFormat::Spreadsheet => "spreadsheet",
        SourceFormat::Email => "email",
        SourceFormat::Plain => "plain",
    }
}

fn source_format_from_str(s: &str) -> SourceFormat {
    match s {
        "paginated" => SourceFormat::Paginated,
        "spreadsheet" => SourceFormat::Spreadsheet,
        "email" => SourceFormat::Email,
        _ => SourceFormat::Plain,
    }
}

fn extraction_status_to_str(status: ExtractionStatus) -> &'static str {
    match status {
        ExtractionStatus::Pending => "pending",
        ExtractionStatus::Processing => "processing",
        ExtractionStatus::Completed => "completed",
        ExtractionStatus::Failed => "failed",
    }
}

fn extraction_status_from_str(s: &str) -> ExtractionStatus {
    match s {
        "processing" => ExtractionStatus::Processing,
        "completed" => ExtractionStatus::Completed,
        "failed" => ExtractionStatus::Failed,
        _ => ExtractionStatus::Pending,
    }
}

fn dedup_status_to_str(status: DedupStatus) -> &'static str {
    match status {
        DedupStatus::Active => "active",
        DedupStatus::Canonical => "canonical",
        DedupStatus::Superseded => "superseded",
    }
}

fn dedup_status_from_str(s: &str) -> DedupStatus {
    match s {
        "canonical" => DedupStatus::Canonical,
        "superseded" => DedupStatus::Superseded,
        _ => DedupStatus::Active,
    }
}

fn task_status_to_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Queued => "queued",
        TaskStatus::Running => "running",
        TaskStatus::Succeeded => "succeeded",
        TaskStatus::SucceededWithErrors => "succeeded_with_errors",
        TaskStatus::Failed => "failed",
        TaskStatus::Cancelled => "cancelled",
    }
}

fn task_status_from_str(s: &str) -> TaskStatus {
    match s {
        "running" => TaskStatus::Running,
        "succeeded" => TaskStatus::Succeeded,
        "succeeded_with_errors" => TaskStatus::SucceededWithErrors,
        "failed" => TaskStatus::Failed,
        "cancelled" => TaskStatus::Cancelled,
        _ => TaskStatus::Queued,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::chunk_id;

    fn sample_chunk(doc: &DocumentRecord, seq: usize) -> Chunk {
        Chunk {
            id: chunk_id(&doc.content_hash, seq),
            document_id: doc.id,
            document_hash: doc.content_hash.clone(),
            content: format!("chunk body {}", seq),
            enriched_content: format!("Document: d\n\nchunk body {}", seq),
            location: "Page 1".to_string(),
            section_hierarchy: vec!["Intro".to_string()],
            seq: seq as u32,
            token_count: 3,
            enriched_token_count: 6,
        }
    }

    fn sample_doc() -> DocumentRecord {
        let mut doc = DocumentRecord::new("proj", "a.pdf", 42, Utc::now());
        doc.content_hash = "abcdef0123456789".to_string();
        doc
    }

    #[test]
    fn document_round_trip() {
        let db = PipelineDb::in_memory().unwrap();
        let mut doc = sample_doc();
        doc.extraction_status = ExtractionStatus::Completed;
        doc.extracted_text_key = Some("proj/a.pdf/text".to_string());
        db.upsert_document(&doc).unwrap();

        let loaded = db.get_document(doc.id).unwrap().unwrap();
        assert_eq!(loaded.filename, "a.pdf");
        assert_eq!(loaded.extraction_status, ExtractionStatus::Completed);
        assert_eq!(loaded.extracted_text_key, doc.extracted_text_key);
        assert_eq!(loaded.content_hash, doc.content_hash);

        // Upsert updates in place
        doc.dedup_status = DedupStatus::Canonical;
        db.upsert_document(&doc).unwrap();
        assert_eq!(db.list_documents("proj").unwrap().len(), 1);
        assert_eq!(
            db.get_document(doc.id).unwrap().unwrap().dedup_status,
            DedupStatus::Canonical
        );
    }

    #[test]
    fn chunk_replacement_drops_stale_chunks_and_their_embeddings() {
        let db = PipelineDb::in_memory().unwrap();
        let doc = sample_doc();
        let chunks: Vec<Chunk> = (0..3).map(|i| sample_chunk(&doc, i)).collect();
        db.replace_document_chunks("proj", doc.id, &chunks).unwrap();
        assert_eq!(db.count_chunks("proj").unwrap(), 3);

        for chunk in &chunks {
            db.upsert_embedding(
                "proj",
                &EmbeddingRecord::new(&chunk.id, vec![0.1, 0.2], "model-v1"),
            )
            .unwrap();
        }
        assert_eq!(db.count_embeddings("proj").unwrap(), 3);

        // Re-chunk to two chunks; the third and its embedding must go
        let removed = db
            .replace_document_chunks("proj", doc.id, &chunks[..2])
            .unwrap();
        assert_eq!(removed, vec![chunks[2].id.clone()]);
        assert_eq!(db.count_chunks("proj").unwrap(), 2);
        assert_eq!(db.count_embeddings("proj").unwrap(), 2);
        assert!(db.get_embedding(&chunks[2].id).unwrap().is_none());
    }

    #[test]
    fn embedding_upsert_is_idempotent_per_chunk_id() {
        let db = PipelineDb::in_memory().unwrap();
        let record = EmbeddingRecord::new("abc_chunk_000", vec![1.0, 2.0, 3.0], "model-v1");
        db.upsert_embedding("proj", &record).unwrap();
        db.upsert_embedding("proj", &record).unwrap();
        assert_eq!(db.count_embeddings("proj").unwrap(), 1);

        let loaded = db.get_embedding("abc_chunk_000").unwrap().unwrap();
        assert_eq!(loaded.vector, vec![1.0, 2.0, 3.0]);
        assert_eq!(loaded.model, "model-v1");

        let ids = db.embedded_chunk_ids("proj").unwrap();
        assert!(ids.contains("abc_chunk_000"));
    }

    #[test]
    fn task_round_trip_and_latest_successful() {
        let db = PipelineDb::in_memory().unwrap();
        let mut task = PipelineTask::new("proj", Stage::Chunking);
        db.upsert_task(&task).unwrap();

        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        db.upsert_task(&task).unwrap();

        task.status = TaskStatus::SucceededWithErrors;
        task.errors.push(TaskErrorEntry {
            item: "bad.pdf".to_string(),
            stage: Stage::Chunking,
            message: "boom".to_string(),
        });
        task.input_fingerprint = Some("fp1".to_string());
        task.finished_at = Some(Utc::now());
        db.upsert_task(&task).unwrap();

        let loaded = db.get_task(task.id).unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::SucceededWithErrors);
        assert_eq!(loaded.errors.len(), 1);
        assert_eq!(loaded.input_fingerprint.as_deref(), Some("fp1"));

        let latest = db
            .latest_successful_task("proj", Stage::Chunking)
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, task.id);
        assert!(db
            .latest_successful_task("proj", Stage::Embedding)
            .unwrap()
            .is_none());
    }

    #[test]
    fn chunks_list_in_document_sequence_order() {
        let db = PipelineDb::in_memory().unwrap();
        let doc = sample_doc();
        let chunks: Vec<Chunk> = (0..5).map(|i| sample_chunk(&doc, i)).collect();
        // Insert out of order
        let shuffled = vec![
            chunks[3].clone(),
            chunks[0].clone(),
            chunks[4].clone(),
            chunks[1].clone(),
            chunks[2].clone(),
        ];
        db.replace_document_chunks("proj", doc.id, &shuffled)
            .unwrap();

        let listed = db.list_chunks("proj").unwrap();
        let seqs: Vec<u32> = listed.iter().map(|c| c.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }
}
