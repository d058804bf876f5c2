//! Ingestion: content deduplication and structure-aware chunking

pub mod chunker;
pub mod dedup;
pub mod sections;
pub mod tokens;

pub use chunker::StructureChunker;
pub use dedup::{hash_content, normalize_content, resolve_inventory, InventoryResolution, InventoryUpdate};
pub use sections::{split_partitions, Partition};
pub use tokens::TokenCounter;
