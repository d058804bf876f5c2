//! prism-rag: document knowledge-base pipeline with citation-grounded retrieval
//!
//! Ingests heterogeneous documents (paginated documents, spreadsheets, email
//! messages) into a deduplicated, chunked, embedded, and externally indexed
//! knowledge base, then answers questions against it through a query planner
//! with a bounded retry ladder. Extraction, embedding, search, and answer
//! synthesis are external collaborators behind the traits in [`providers`].

pub mod config;
pub mod error;
pub mod ingestion;
pub mod processing;
pub mod providers;
pub mod retrieval;
pub mod storage;
pub mod types;

pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use processing::Orchestrator;
pub use retrieval::QueryPlanner;
pub use storage::PipelineDb;
pub use types::{
    Chunk, DocumentRecord, EmbeddingRecord, PipelineTask, QueryRequest, QueryResponse, Stage,
    TaskStatus,
};
