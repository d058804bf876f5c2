//! Content deduplication
//!
//! Hashes normalized extraction output, groups records by hash, and keeps the
//! most recently modified record of each group as canonical. Losers are marked
//! superseded with a back-reference; nothing is deleted, so the audit trail
//! survives re-uploads.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::types::{DedupStatus, DocumentRecord};

/// Collapse whitespace runs to single spaces and trim
///
/// Two uploads that differ only in line wrapping or trailing spaces must hash
/// identically.
pub fn normalize_content(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Content hash over normalized text (sha256, hex)
pub fn hash_content(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_content(text).as_bytes());
    hex::encode(hasher.finalize())
}

/// Status update for one document produced by inventory resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryUpdate {
    pub document_id: Uuid,
    pub content_hash: String,
    pub status: DedupStatus,
    pub superseded_by: Option<Uuid>,
}

/// Result of resolving one project's documents into an inventory
#[derive(Debug, Clone, Default)]
pub struct InventoryResolution {
    /// Status updates, one per hashable document, ordered by document id
    pub updates: Vec<InventoryUpdate>,
    /// Per-document failures: (filename, message); excluded from the inventory
    pub errors: Vec<(String, String)>,
}

impl InventoryResolution {
    /// Ids of the surviving canonical documents
    pub fn canonical_ids(&self) -> Vec<Uuid> {
        self.updates
            .iter()
            .filter(|u| u.status == DedupStatus::Canonical)
            .map(|u| u.document_id)
            .collect()
    }
}

/// Resolve documents plus their extracted text into a deduplicated inventory
///
/// Pure function of its input: content hashing is content-addressed and the
/// canonical pick is deterministic (latest `modified_at`, ties broken by the
/// larger document id), so re-running over unchanged input yields an identical
/// inventory.
pub fn resolve_inventory(
    documents: &[(DocumentRecord, Option<String>)],
) -> InventoryResolution {
    let mut resolution = InventoryResolution::default();

    // hash -> (doc id, modified_at) members, BTreeMap for deterministic order
    let mut groups: BTreeMap<String, Vec<&DocumentRecord>> = BTreeMap::new();

    for (doc, text) in documents {
        let text = match text {
            Some(text) if !text.trim().is_empty() => text,
            _ => {
                resolution.errors.push((
                    doc.filename.clone(),
                    "extraction output missing or empty".to_string(),
                ));
                continue;
            }
        };
        groups.entry(hash_content(text)).or_default().push(doc);
    }

    for (hash, members) in &groups {
        let canonical = members
            .iter()
            .max_by_key(|doc| (doc.modified_at, doc.id))
            .expect("non-empty hash group");

        for doc in members {
            let (status, superseded_by) = if doc.id == canonical.id {
                (DedupStatus::Canonical, None)
            } else {
                (DedupStatus::Superseded, Some(canonical.id))
            };
            resolution.updates.push(InventoryUpdate {
                document_id: doc.id,
                content_hash: hash.clone(),
                status,
                superseded_by,
            });
        }
    }

    resolution.updates.sort_by_key(|u| u.document_id);
    resolution
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn doc(filename: &str, offset_secs: i64) -> DocumentRecord {
        DocumentRecord::new(
            "proj",
            filename,
            100,
            Utc::now() + Duration::seconds(offset_secs),
        )
    }

    #[test]
    fn normalization_collapses_whitespace() {
        assert_eq!(
            normalize_content("a  b\n\n c\t d  "),
            normalize_content("a b c d")
        );
        assert_eq!(hash_content("a  b\nc"), hash_content("a b c"));
        assert_ne!(hash_content("a b c"), hash_content("a b d"));
    }

    #[test]
    fn latest_timestamp_wins_and_loser_links_to_winner() {
        let older = doc("v1.pdf", 0);
        let newer = doc("v2.pdf", 60);
        let input = vec![
            (older.clone(), Some("same body".to_string())),
            (newer.clone(), Some("same  body".to_string())),
        ];

        let resolution = resolve_inventory(&input);
        assert_eq!(resolution.updates.len(), 2);
        assert!(resolution.errors.is_empty());

        let by_id = |id| {
            resolution
                .updates
                .iter()
                .find(|u| u.document_id == id)
                .unwrap()
        };
        assert_eq!(by_id(newer.id).status, DedupStatus::Canonical);
        assert_eq!(by_id(older.id).status, DedupStatus::Superseded);
        assert_eq!(by_id(older.id).superseded_by, Some(newer.id));
        assert_eq!(resolution.canonical_ids(), vec![newer.id]);
    }

    #[test]
    fn distinct_content_all_survives() {
        let a = doc("a.pdf", 0);
        let b = doc("b.pdf", 0);
        let input = vec![
            (a.clone(), Some("alpha".to_string())),
            (b.clone(), Some("beta".to_string())),
        ];
        let resolution = resolve_inventory(&input);
        assert_eq!(resolution.canonical_ids().len(), 2);
    }

    #[test]
    fn unreadable_documents_are_reported_not_fatal() {
        let good = doc("good.pdf", 0);
        let empty = doc("empty.pdf", 0);
        let missing = doc("missing.pdf", 0);
        let input = vec![
            (good.clone(), Some("content".to_string())),
            (empty, Some("   ".to_string())),
            (missing, None),
        ];

        let resolution = resolve_inventory(&input);
        assert_eq!(resolution.updates.len(), 1);
        assert_eq!(resolution.errors.len(), 2);
        assert_eq!(resolution.canonical_ids(), vec![good.id]);
    }

    #[test]
    fn rerun_is_idempotent() {
        let a = doc("a.pdf", 0);
        let b = doc("b.pdf", 30);
        let input = vec![
            (a, Some("shared".to_string())),
            (b, Some("shared".to_string())),
        ];
        let first = resolve_inventory(&input);
        let second = resolve_inventory(&input);
        assert_eq!(first.updates, second.updates);
    }

    #[test]
    fn timestamp_tie_breaks_on_document_id() {
        let now = Utc::now();
        let mut a = DocumentRecord::new("proj", "a.pdf", 1, now);
        let mut b = DocumentRecord::new("proj", "b.pdf", 1, now);
        // Force a known ordering of ids
        if a.id > b.id {
            std::mem::swap(&mut a.id, &mut b.id);
        }
        let input = vec![
            (a.clone(), Some("same".to_string())),
            (b.clone(), Some("same".to_string())),
        ];
        let resolution = resolve_inventory(&input);
        let canonical = resolution.canonical_ids();
        assert_eq!(canonical, vec![b.id]);
    }
}
