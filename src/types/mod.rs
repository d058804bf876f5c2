//! Core data model: documents, chunks, embeddings, tasks, queries

pub mod chunk;
pub mod document;
pub mod embedding;
pub mod query;
pub mod response;
pub mod task;

pub use chunk::{chunk_id, Chunk};
pub use document::{DedupStatus, DocumentRecord, ExtractedText, ExtractionStatus, SourceFormat};
pub use embedding::EmbeddingRecord;
pub use query::{ChatTurn, QueryRequest};
pub use response::{Citation, QueryForm, QueryOutcome, QueryResponse, RetrievalAttempt};
pub use task::{PipelineTask, Stage, TaskErrorEntry, TaskProgress, TaskStatus};
