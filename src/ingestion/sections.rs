//! Partition splitting along natural document breaks
//!
//! Extraction output is markdown carrying structure markers: page-break comments
//! for paginated documents, `## Sheet: Name` headings for workbooks, `## Email
//! Metadata` / `## Email Body` headings for messages. Each partition keeps a
//! location label that later ends up in enrichment headers and citations.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::SourceFormat;

/// Page-break marker emitted by the extraction service for paginated documents
const PAGE_BREAK: &str = "<!-- PageBreak -->";

static PAGE_NUMBER_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<!-- PageNumber="(\d+)" -->"#).expect("valid regex"));

static PAGE_META_COMMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<!-- Page(?:Header|Footer|Number)="[^"]*" -->\s*"#).expect("valid regex")
});

static PAGE_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?mi)^##\s+Page\s+(\d+)\s*$").expect("valid regex"));

static SHEET_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?mi)^##\s+Sheet:\s+(.+?)\s*$").expect("valid regex"));

static EMAIL_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?mi)^##\s+(Email\s+\w+)\s*$").expect("valid regex"));

static GENERIC_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?mi)^##\s+(.+?)\s*$").expect("valid regex"));

static SEPARATOR_RULE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^---\s*|\s*---\s*$").expect("valid regex"));

/// One natural partition of a document: a page, a sheet, or a message part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// Location label: "Page 3", "Sheet: Sales", "Email Body"
    pub location: String,
    /// Partition content with structural comments stripped
    pub content: String,
}

/// Split extracted markdown into partitions along the format's natural breaks
///
/// A document without any markers becomes a single partition labelled with the
/// format's fallback location, so every chunk always has a citable location.
pub fn split_partitions(markdown: &str, format: SourceFormat) -> Vec<Partition> {
    if format == SourceFormat::Paginated && markdown.contains(PAGE_BREAK) {
        return split_page_breaks(markdown);
    }

    let pattern: &Regex = match format {
        SourceFormat::Paginated => &PAGE_HEADING,
        SourceFormat::Spreadsheet => &SHEET_HEADING,
        SourceFormat::Email => &EMAIL_HEADING,
        SourceFormat::Plain => &GENERIC_HEADING,
    };

    let markers: Vec<_> = pattern.captures_iter(markdown).collect();
    if markers.is_empty() {
        let content = markdown.trim();
        if content.is_empty() {
            return Vec::new();
        }
        return vec![Partition {
            location: format.fallback_location().to_string(),
            content: content.to_string(),
        }];
    }

    let mut partitions = Vec::new();
    for (i, caps) in markers.iter().enumerate() {
        let whole = caps.get(0).expect("capture 0 always present");
        let label = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        let location = match format {
            SourceFormat::Paginated => format!("Page {}", label),
            SourceFormat::Spreadsheet => format!("Sheet: {}", label),
            _ => label.to_string(),
        };

        let start = whole.end();
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(markdown.len());

        let content = SEPARATOR_RULE.replace_all(markdown[start..end].trim(), "");
        let content = content.trim();
        if !content.is_empty() {
            partitions.push(Partition {
                location,
                content: content.to_string(),
            });
        }
    }

    partitions
}

/// Split on extraction-service page-break comments
///
/// Page number comes from the `PageNumber` comment when present, falling back to
/// the 1-based split position. Header/footer/number comments are metadata and are
/// stripped from the content.
fn split_page_breaks(markdown: &str) -> Vec<Partition> {
    let mut partitions = Vec::new();

    for (i, page) in markdown.split(PAGE_BREAK).enumerate() {
        let page = page.trim();
        if page.is_empty() {
            continue;
        }

        let page_num = PAGE_NUMBER_COMMENT
            .captures(page)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .unwrap_or(i as u32 + 1);

        let content = PAGE_META_COMMENT.replace_all(page, "");
        let content = content.trim();
        if !content.is_empty() {
            partitions.push(Partition {
                location: format!("Page {}", page_num),
                content: content.to_string(),
            });
        }
    }

    partitions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_break_markers_win_over_headings() {
        let markdown = concat!(
            "<!-- PageHeader=\"Spec\" -->\nIntro text.\n",
            "<!-- PageBreak -->\n",
            "<!-- PageNumber=\"2\" -->\nSecond page text.\n",
            "<!-- PageBreak -->\n",
            "Third page text.",
        );
        let partitions = split_partitions(markdown, SourceFormat::Paginated);
        assert_eq!(partitions.len(), 3);
        assert_eq!(partitions[0].location, "Page 1");
        assert_eq!(partitions[1].location, "Page 2");
        assert_eq!(partitions[2].location, "Page 3");
        assert_eq!(partitions[0].content, "Intro text.");
        assert!(!partitions[1].content.contains("PageNumber"));
    }

    #[test]
    fn legacy_page_headings() {
        let markdown = "## Page 1\nfirst\n## Page 2\nsecond";
        let partitions = split_partitions(markdown, SourceFormat::Paginated);
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].location, "Page 1");
        assert_eq!(partitions[1].content, "second");
    }

    #[test]
    fn sheet_headings() {
        let markdown = "## Sheet: Sales\n| a | b |\n## Sheet: Costs\n| c | d |";
        let partitions = split_partitions(markdown, SourceFormat::Spreadsheet);
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].location, "Sheet: Sales");
        assert_eq!(partitions[1].location, "Sheet: Costs");
    }

    #[test]
    fn email_parts() {
        let markdown = "## Email Metadata\nFrom: a@b.c\n## Email Body\nHello.";
        let partitions = split_partitions(markdown, SourceFormat::Email);
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].location, "Email Metadata");
        assert_eq!(partitions[1].location, "Email Body");
    }

    #[test]
    fn no_markers_yields_single_fallback_partition() {
        let partitions = split_partitions("just some text", SourceFormat::Paginated);
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].location, "Page 1");

        let partitions = split_partitions("plain words", SourceFormat::Email);
        assert_eq!(partitions[0].location, "Email Body");
    }

    #[test]
    fn separator_rules_are_trimmed() {
        let markdown = "## Page 1\n---\ncontent here\n---";
        let partitions = split_partitions(markdown, SourceFormat::Paginated);
        assert_eq!(partitions[0].content, "content here");
    }

    #[test]
    fn empty_input_yields_no_partitions() {
        assert!(split_partitions("", SourceFormat::Plain).is_empty());
        assert!(split_partitions("  \n ", SourceFormat::Spreadsheet).is_empty());
    }
}
