//! Citation assembly
//!
//! Maps the retrieval service's raw passages back onto the chunk and document
//! records owned by this system. Passages that no longer resolve (a chunk set
//! replaced since indexing) are dropped with a warning rather than surfaced as
//! dangling references.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::error::Result;
use crate::providers::RetrievedPassage;
use crate::storage::PipelineDb;
use crate::types::Citation;

/// Resolve passages into citations, deduplicated and ordered by relevance
pub fn resolve_citations(db: &PipelineDb, passages: &[RetrievedPassage]) -> Result<Vec<Citation>> {
    let mut filenames: HashMap<Uuid, String> = HashMap::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut citations = Vec::new();

    for passage in passages {
        if !seen.insert(passage.chunk_id.clone()) {
            continue;
        }

        let Some(chunk) = db.get_chunk(&passage.chunk_id)? else {
            tracing::warn!(chunk_id = %passage.chunk_id, "passage references unknown chunk");
            continue;
        };

        let filename = match filenames.get(&chunk.document_id) {
            Some(name) => name.clone(),
            None => {
                let name = db
                    .get_document(chunk.document_id)?
                    .map(|d| d.filename)
                    .unwrap_or_else(|| "unknown".to_string());
                filenames.insert(chunk.document_id, name.clone());
                name
            }
        };

        citations.push(Citation::from_chunk(&chunk, filename, passage.relevance));
    }

    citations.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(citations)
}
