//! Query responses: tagged outcomes, citations, and the attempt trace

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::chunk::Chunk;

/// Citation pointing a claim back at a chunk in this system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// Chunk the passage was grounded on
    pub chunk_id: String,
    /// Owning document
    pub document_id: Uuid,
    /// Source filename for display
    pub filename: String,
    /// Partition location label ("Page 3", "Sheet: Sales")
    pub location: String,
    /// Section title, if the chunk sits under one
    pub section_title: Option<String>,
    /// Relevance score reported by the retrieval service
    pub relevance: f32,
}

impl Citation {
    /// Build a citation from a resolved chunk and its relevance score
    pub fn from_chunk(chunk: &Chunk, filename: impl Into<String>, relevance: f32) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            document_id: chunk.document_id,
            filename: filename.into(),
            location: chunk.location.clone(),
            section_title: chunk.section_title().map(String::from),
            relevance,
        }
    }

    /// Format for inline display: "spec.pdf (Page 3), relevance 0.82"
    pub fn format_inline(&self) -> String {
        format!("{} ({}), relevance {:.2}", self.filename, self.location, self.relevance)
    }
}

/// Which form of the query an attempt used
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueryForm {
    /// The question as asked
    Literal,
    /// Acronyms and jargon modifiers stripped
    Simplified,
    /// Synonym hints appended
    Expanded,
}

/// One retrieval attempt, recorded whether or not it produced the answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalAttempt {
    /// 1-based attempt number
    pub attempt: u32,
    pub form: QueryForm,
    /// The query text actually sent
    pub query: String,
    /// Subqueries the service decomposed the query into
    pub subqueries: Vec<String>,
    /// Grounding passages returned
    pub passages_returned: usize,
}

/// Terminal state of a query
///
/// "Not found" is an answer, not an error; it is kept distinct from material
/// that states the information is absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutcome {
    /// Grounded answer produced
    Answered,
    /// The source material explicitly states the information is absent/excluded
    ExplicitlyExcluded,
    /// Nothing relevant in the corpus after the full retry ladder
    NotFound,
}

/// Full response to a query: answer, citations, and the attempt trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub outcome: QueryOutcome,
    /// Generated answer, or the standing not-found message
    pub answer: String,
    /// Citations resolved against this system's chunk store
    pub citations: Vec<Citation>,
    /// Every attempt made, in order
    pub activity: Vec<RetrievalAttempt>,
    /// Wall-clock processing time
    pub processing_time_ms: u64,
}

impl QueryResponse {
    /// Response for a query that found nothing after the full ladder
    pub fn not_found(activity: Vec<RetrievalAttempt>, processing_time_ms: u64) -> Self {
        Self {
            outcome: QueryOutcome::NotFound,
            answer: "Information not found in the available documents.".to_string(),
            citations: Vec::new(),
            activity,
            processing_time_ms,
        }
    }
}
