//! Chunk type with location and section tracking for citations

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Build the deterministic chunk identifier for a document hash and sequence index
///
/// The first 8 hex characters of the document content hash plus a zero-padded
/// sequence index, so reruns over unchanged input re-derive identical ids.
pub fn chunk_id(document_hash: &str, seq: usize) -> String {
    let prefix = &document_hash[..8.min(document_hash.len())];
    format!("{}_chunk_{:03}", prefix, seq)
}

/// A token-bounded passage derived from one canonical document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Deterministic chunk ID (`{hash8}_chunk_{seq:03}`)
    pub id: String,
    /// Source document ID
    pub document_id: Uuid,
    /// Content hash of the source document
    pub document_hash: String,
    /// Raw passage text
    pub content: String,
    /// Raw text prefixed with the generated context header
    pub enriched_content: String,
    /// Partition location label: "Page 3", "Sheet: Sales", "Email Body"
    pub location: String,
    /// Markdown headers (levels 1-4) active at this passage, outermost first
    pub section_hierarchy: Vec<String>,
    /// In-document sequence index, strictly increasing
    pub seq: u32,
    /// Token count of the raw content
    pub token_count: u32,
    /// Token count of the enriched content
    pub enriched_token_count: u32,
}

impl Chunk {
    /// Innermost section title, preferring mid-level headers the way readers do
    pub fn section_title(&self) -> Option<&str> {
        self.section_hierarchy
            .get(1)
            .or_else(|| self.section_hierarchy.last())
            .map(String::as_str)
    }

    /// Section path joined for display: "Chapter 1 > Scope"
    pub fn section_path(&self) -> String {
        self.section_hierarchy.join(" > ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_is_zero_padded_and_hash_prefixed() {
        let id = chunk_id("d11f08a1b2c3d4e5", 14);
        assert_eq!(id, "d11f08a1_chunk_014");
        assert_eq!(chunk_id("d11f08a1b2c3d4e5", 0), "d11f08a1_chunk_000");
    }

    #[test]
    fn chunk_id_tolerates_short_hashes() {
        assert_eq!(chunk_id("abc", 2), "abc_chunk_002");
    }
}
