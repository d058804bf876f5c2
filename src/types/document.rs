//! Document records, source formats, and extraction output

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Source format of an uploaded document
///
/// Drives partition splitting: paginated documents break on page markers,
/// spreadsheets on sheet markers, email messages on message parts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// Page-oriented document (PDF and friends)
    Paginated,
    /// Workbook with one or more sheets
    Spreadsheet,
    /// Email message with metadata/body/attachment parts
    Email,
    /// Anything else; split on generic headings
    Plain,
}

impl SourceFormat {
    /// Detect source format from a filename extension
    pub fn from_filename(filename: &str) -> Self {
        let ext = filename
            .rsplit('.')
            .next()
            .unwrap_or_default()
            .to_lowercase();
        match ext.as_str() {
            "pdf" | "docx" | "doc" | "pptx" | "ppt" => Self::Paginated,
            "xlsx" | "xlsm" | "xls" | "csv" => Self::Spreadsheet,
            "msg" | "eml" => Self::Email,
            _ => Self::Plain,
        }
    }

    /// Label used when a document has no partition markers at all
    pub fn fallback_location(&self) -> &'static str {
        match self {
            Self::Paginated => "Page 1",
            Self::Spreadsheet => "Sheet: 1",
            Self::Email => "Email Body",
            Self::Plain => "Section 1",
        }
    }
}

/// Extraction status of a document
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Deduplication status of a document
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DedupStatus {
    /// Not yet deduplicated
    Active,
    /// Sole survivor for its content hash
    Canonical,
    /// Lost its hash group to a more recent record
    Superseded,
}

/// One uploaded file, owned by the pipeline for its lifetime
///
/// Created on registration, mutated only by the stage that currently owns it,
/// never deleted outside explicit project teardown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Stable document ID
    pub id: Uuid,
    /// Owning project
    pub project_id: String,
    /// Original filename as uploaded
    pub filename: String,
    /// Source format (detected from the filename)
    pub source_format: SourceFormat,
    /// Hash over normalized extracted text; empty until extraction completes
    pub content_hash: String,
    /// File size in bytes
    pub file_size: u64,
    /// Modification timestamp of the upload; recency key for deduplication
    pub modified_at: chrono::DateTime<chrono::Utc>,
    /// Extraction status
    pub extraction_status: ExtractionStatus,
    /// Deduplication status
    pub dedup_status: DedupStatus,
    /// Canonical record this one was superseded by, if any
    pub superseded_by: Option<Uuid>,
    /// Storage key of the extracted textual representation
    pub extracted_text_key: Option<String>,
}

impl DocumentRecord {
    /// Create a new record for an uploaded file
    pub fn new(
        project_id: impl Into<String>,
        filename: impl Into<String>,
        file_size: u64,
        modified_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        let filename = filename.into();
        Self {
            id: Uuid::new_v4(),
            project_id: project_id.into(),
            source_format: SourceFormat::from_filename(&filename),
            filename,
            content_hash: String::new(),
            file_size,
            modified_at,
            extraction_status: ExtractionStatus::Pending,
            dedup_status: DedupStatus::Active,
            superseded_by: None,
            extracted_text_key: None,
        }
    }

    /// Display name used in enrichment headers and citations
    ///
    /// Strips the extension and turns underscores into spaces.
    pub fn display_name(&self) -> String {
        let stem = match self.filename.rsplit_once('.') {
            Some((stem, _)) => stem,
            None => self.filename.as_str(),
        };
        stem.replace('_', " ")
    }
}

/// Extraction output for one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedText {
    /// Markdown with partition markers (page breaks, sheet headings, email parts)
    pub markdown: String,
    /// Partition count reported by the extraction service, if known
    pub partition_count: Option<u32>,
    /// Whether the service considered the extraction complete
    pub complete: bool,
}
