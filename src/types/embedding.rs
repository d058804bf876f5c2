//! Embedding records attached to chunk identifiers

use serde::{Deserialize, Serialize};

/// A vector attached to one chunk
///
/// Keyed by chunk id in the store; the embedding stage upserts so retries never
/// produce a second record for the same chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Chunk this vector belongs to
    pub chunk_id: String,
    /// The vector, fixed dimensionality per model
    pub vector: Vec<f32>,
    /// Embedding model version tag
    pub model: String,
    /// Dimensionality the vector was requested at
    pub dimensions: usize,
    /// When the record was persisted
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl EmbeddingRecord {
    /// Create a record for a freshly embedded chunk
    pub fn new(chunk_id: impl Into<String>, vector: Vec<f32>, model: impl Into<String>) -> Self {
        let dimensions = vector.len();
        Self {
            chunk_id: chunk_id.into(),
            vector,
            model: model.into(),
            dimensions,
            created_at: chrono::Utc::now(),
        }
    }
}
