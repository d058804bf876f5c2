//! Structure-aware chunking with contextual enrichment
//!
//! Each canonical document is split first along its natural partitions (pages,
//! sheets, email parts), then along markdown headers, and finally packed into
//! token-bounded windows with overlap. Every chunk is prefixed with a generated
//! context header (document name, section path, location) so its embedding
//! captures both what the passage says and where it comes from.
//!
//! The whole pass is a pure function of the document text and parameters:
//! re-running over unchanged input yields byte-identical chunk ids and content.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::ChunkingConfig;
use crate::types::{chunk_id, Chunk, DocumentRecord};

use super::sections::{split_partitions, Partition};
use super::tokens::TokenCounter;

static HEADER_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(#{1,4})\s+(.+?)\s*$").expect("valid regex"));

static EXCESS_NEWLINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Markdown header section within one partition
#[derive(Debug, Clone)]
struct Section {
    /// Active header per level (1-4); outer levels persist across inner ones
    hierarchy: [Option<String>; 4],
    content: String,
}

impl Section {
    fn hierarchy_vec(&self) -> Vec<String> {
        self.hierarchy.iter().flatten().cloned().collect()
    }
}

/// How a block glues onto the previous one inside a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Glue {
    /// Paragraph break
    Break,
    /// Direct continuation (sentence or word fragment)
    None,
}

/// Atomic packing unit: a paragraph, a sentence fragment, or a whole table
#[derive(Debug, Clone)]
struct Block {
    text: String,
    tokens: usize,
    is_table: bool,
    glue: Glue,
}

/// Structure-aware chunker
pub struct StructureChunker {
    config: ChunkingConfig,
    counter: TokenCounter,
}

impl StructureChunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self {
            config,
            counter: TokenCounter::new(),
        }
    }

    /// Chunk one canonical document's extracted markdown
    ///
    /// Deterministic and ordered: sequence indices increase in source order and
    /// chunk ids derive from the document content hash.
    pub fn chunk_document(&self, doc: &DocumentRecord, markdown: &str) -> Vec<Chunk> {
        let partitions = split_partitions(markdown, doc.source_format);
        if partitions.is_empty() {
            return Vec::new();
        }

        // A document below the minimum is one chunk, not an error
        let total_tokens: usize = partitions
            .iter()
            .map(|p| self.counter.count(&p.content))
            .sum();
        if total_tokens < self.config.min_tokens {
            let content = partitions
                .iter()
                .map(|p| p.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            let location = partitions[0].location.clone();
            return vec![self.assemble(doc, content, location, Vec::new(), 0)];
        }

        let mut chunks = Vec::new();
        let mut seq = 0usize;
        for partition in &partitions {
            for (text, hierarchy) in self.chunk_partition(partition) {
                chunks.push(self.assemble(doc, text, partition.location.clone(), hierarchy, seq));
                seq += 1;
            }
        }
        chunks
    }

    /// Chunk one partition into (content, hierarchy) pieces
    fn chunk_partition(&self, partition: &Partition) -> Vec<(String, Vec<String>)> {
        let cleaned = EXCESS_NEWLINES.replace_all(&partition.content, "\n\n");
        let sections = self.merge_small_sections(split_header_sections(&cleaned));

        let mut pieces = Vec::new();
        for section in &sections {
            let hierarchy = section.hierarchy_vec();
            for window in self.pack_section(&section.content) {
                pieces.push((window, hierarchy.clone()));
            }
        }
        pieces
    }

    /// Merge an under-minimum header section into its successor
    ///
    /// A bare heading or a two-line preamble rides with the section that
    /// follows it instead of becoming its own chunk.
    fn merge_small_sections(&self, sections: Vec<Section>) -> Vec<Section> {
        let mut merged: Vec<Section> = Vec::new();
        let mut iter = sections.into_iter();
        let Some(mut current) = iter.next() else {
            return merged;
        };
        let mut current_tokens = self.counter.count(&current.content);

        for next in iter {
            if current_tokens < self.config.min_tokens {
                current = merge_sections(current, next);
                current_tokens = self.counter.count(&current.content);
            } else {
                merged.push(current);
                current_tokens = self.counter.count(&next.content);
                current = next;
            }
        }
        merged.push(current);
        merged
    }

    /// Pack one section's text into token-bounded windows
    fn pack_section(&self, text: &str) -> Vec<String> {
        let target = self.config.target_tokens;
        let overlap = self.config.overlap_tokens;
        let min = self.config.min_tokens;

        if self.counter.count(text) <= target {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Vec::new();
            }
            return vec![trimmed.to_string()];
        }

        let blocks = self.split_blocks(text);
        let mut windows: Vec<(Vec<Block>, usize)> = Vec::new();
        let mut parts: Vec<Block> = Vec::new();
        let mut tokens = 0usize;

        for block in blocks {
            let fits = tokens + block.tokens <= target;
            // Tables are atomic: a window that reaches its budget inside one
            // extends to the table's end rather than splitting a row. A window
            // still under the floor stretches up to the overlap allowance
            // before it is allowed to close.
            let must_extend = !fits
                && (parts.is_empty()
                    || (block.is_table && tokens < min)
                    || (tokens < min && tokens + block.tokens <= target + overlap));

            if fits || must_extend {
                tokens += block.tokens;
                parts.push(block);
                continue;
            }

            // Close the current window and seed the next one with overlap
            windows.push((std::mem::take(&mut parts), tokens));
            let budget = overlap.min(target.saturating_sub(block.tokens));
            let closed = &windows.last().expect("just pushed").0;
            let (mut seed, seed_tokens) = self.overlap_tail(closed, budget);
            tokens = seed_tokens + block.tokens;
            seed.push(block);
            parts = seed;
        }
        if !parts.is_empty() {
            windows.push((parts, tokens));
        }

        // A trailing fragment below the floor merges backwards unless that
        // would blow past the target by more than the overlap allowance
        if windows.len() >= 2 {
            let last_tokens = windows[windows.len() - 1].1;
            let prev_tokens = windows[windows.len() - 2].1;
            if last_tokens < min && prev_tokens + last_tokens <= target + overlap {
                let (mut last_parts, last_tokens) = windows.pop().expect("len checked");
                if let Some(first) = last_parts.first_mut() {
                    first.glue = Glue::Break;
                }
                let prev = windows.last_mut().expect("len checked");
                prev.0.extend(last_parts);
                prev.1 += last_tokens;
            }
        }

        windows
            .into_iter()
            .map(|(parts, _)| render_window(&parts))
            .collect()
    }

    /// Sentences from the tail of a closed window, within the overlap budget
    ///
    /// Stops at a table block; carrying a whole table into the next window
    /// would double it in the index.
    fn overlap_tail(&self, parts: &[Block], budget: usize) -> (Vec<Block>, usize) {
        let mut seed: Vec<Block> = Vec::new();
        let mut tokens = 0usize;
        for block in parts.iter().rev() {
            if block.is_table || tokens + block.tokens > budget {
                break;
            }
            tokens += block.tokens;
            seed.push(block.clone());
        }
        seed.reverse();
        if let Some(first) = seed.first_mut() {
            first.glue = Glue::Break;
        }
        (seed, tokens)
    }

    /// Split section text into packing blocks: tables stay whole, paragraphs
    /// split to sentences (and words, last resort) once they exceed the target
    fn split_blocks(&self, text: &str) -> Vec<Block> {
        let mut blocks = Vec::new();
        let mut table_lines: Vec<&str> = Vec::new();
        let mut prose_lines: Vec<&str> = Vec::new();
        let mut in_html_table = false;

        for line in text.lines() {
            let trimmed = line.trim_start();
            let html_open = trimmed.starts_with("<table");
            let is_table = trimmed.starts_with('|') || html_open || in_html_table;
            if html_open {
                in_html_table = true;
            }
            if in_html_table && trimmed.contains("</table>") {
                in_html_table = false;
            }

            if is_table {
                if !prose_lines.is_empty() {
                    self.flush_prose(&prose_lines.join("\n"), &mut blocks);
                    prose_lines.clear();
                }
                table_lines.push(line);
            } else {
                self.flush_table(&mut table_lines, &mut blocks);
                prose_lines.push(line);
            }
        }
        self.flush_table(&mut table_lines, &mut blocks);
        if !prose_lines.is_empty() {
            self.flush_prose(&prose_lines.join("\n"), &mut blocks);
        }

        blocks
    }

    /// Close out a run of contiguous table lines as one atomic block
    fn flush_table(&self, lines: &mut Vec<&str>, blocks: &mut Vec<Block>) {
        if lines.is_empty() {
            return;
        }
        let text = lines.join("\n");
        blocks.push(Block {
            tokens: self.counter.count(&text),
            text,
            is_table: true,
            glue: Glue::Break,
        });
        lines.clear();
    }

    /// Turn a prose run into paragraph blocks, sub-splitting oversized ones
    fn flush_prose(&self, text: &str, blocks: &mut Vec<Block>) {
        for paragraph in text.split("\n\n") {
            let paragraph = paragraph.trim();
            if paragraph.is_empty() {
                continue;
            }
            let tokens = self.counter.count(paragraph);
            if tokens <= self.config.target_tokens {
                blocks.push(Block {
                    text: paragraph.to_string(),
                    tokens,
                    is_table: false,
                    glue: Glue::Break,
                });
                continue;
            }

            let mut glue = Glue::Break;
            for sentence in paragraph.split_sentence_bounds() {
                let sentence_tokens = self.counter.count(sentence);
                if sentence_tokens == 0 {
                    continue;
                }
                if sentence_tokens <= self.config.target_tokens {
                    blocks.push(Block {
                        text: sentence.to_string(),
                        tokens: sentence_tokens,
                        is_table: false,
                        glue,
                    });
                    glue = Glue::None;
                    continue;
                }
                // Degenerate sentence longer than a whole window
                for piece in self.split_words(sentence) {
                    let tokens = self.counter.count(&piece);
                    blocks.push(Block {
                        text: piece,
                        tokens,
                        is_table: false,
                        glue,
                    });
                    glue = Glue::None;
                }
            }
        }
    }

    /// Word-bounded split for sentences that exceed the target on their own
    fn split_words(&self, text: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        let mut current = String::new();
        let mut tokens = 0usize;
        for word in text.split_word_bounds() {
            let word_tokens = self.counter.count(word);
            if tokens + word_tokens > self.config.target_tokens && !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
                tokens = 0;
            }
            current.push_str(word);
            tokens += word_tokens;
        }
        if !current.trim().is_empty() {
            pieces.push(current);
        }
        pieces
    }

    /// Build the final chunk: id, enrichment header, token counts
    fn assemble(
        &self,
        doc: &DocumentRecord,
        content: String,
        location: String,
        hierarchy: Vec<String>,
        seq: usize,
    ) -> Chunk {
        let content = content.trim().to_string();
        let prefix = build_context_prefix(&doc.display_name(), &hierarchy, &location);
        let enriched_content = format!("{}{}", prefix, content);
        let token_count = self.counter.count(&content) as u32;
        let enriched_token_count = self.counter.count(&enriched_content) as u32;

        Chunk {
            id: chunk_id(&doc.content_hash, seq),
            document_id: doc.id,
            document_hash: doc.content_hash.clone(),
            content,
            enriched_content,
            location,
            section_hierarchy: hierarchy,
            seq: seq as u32,
            token_count,
            enriched_token_count,
        }
    }
}

/// Split partition content along markdown headers, tracking the active hierarchy
///
/// Header lines stay in the section content; a header at level n clears the
/// deeper levels while outer levels persist.
fn split_header_sections(content: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut hierarchy: [Option<String>; 4] = Default::default();
    let mut current = String::new();
    let mut current_hierarchy = hierarchy.clone();

    for line in content.lines() {
        if let Some(caps) = HEADER_LINE.captures(line) {
            if !current.trim().is_empty() {
                sections.push(Section {
                    hierarchy: current_hierarchy.clone(),
                    content: current.trim().to_string(),
                });
            }
            let level = caps[1].len();
            hierarchy[level - 1] = Some(caps[2].to_string());
            for slot in hierarchy.iter_mut().skip(level) {
                *slot = None;
            }
            current_hierarchy = hierarchy.clone();
            current = format!("{}\n", line);
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    if !current.trim().is_empty() {
        sections.push(Section {
            hierarchy: current_hierarchy,
            content: current.trim().to_string(),
        });
    }
    sections
}

/// Merge two adjacent sections, joining conflicting header titles with " / "
fn merge_sections(mut current: Section, next: Section) -> Section {
    current.content.push_str("\n\n");
    current.content.push_str(&next.content);
    for (slot, incoming) in current.hierarchy.iter_mut().zip(next.hierarchy) {
        match (slot.as_ref(), incoming) {
            (None, Some(value)) => *slot = Some(value),
            (Some(existing), Some(value)) if *existing != value => {
                *slot = Some(format!("{} / {}", existing, value));
            }
            _ => {}
        }
    }
    current
}

/// Render a window's blocks back into chunk text
fn render_window(parts: &[Block]) -> String {
    let mut out = String::new();
    for (i, block) in parts.iter().enumerate() {
        if i > 0 && block.glue == Glue::Break {
            out.push_str("\n\n");
        }
        out.push_str(&block.text);
    }
    out.trim().to_string()
}

/// Remove markdown emphasis from section titles for cleaner context headers
fn clean_section_title(title: &str) -> String {
    let cleaned = title.replace("**", "").replace('*', "");
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Build the enrichment prefix: document name, section path, location
pub(crate) fn build_context_prefix(
    display_name: &str,
    hierarchy: &[String],
    location: &str,
) -> String {
    let mut parts = vec![format!("Document: {}", display_name)];

    let section_path: Vec<String> = hierarchy
        .iter()
        .map(|title| clean_section_title(title))
        .filter(|title| !title.is_empty())
        .collect();
    if !section_path.is_empty() {
        parts.push(format!("Section: {}", section_path.join(" > ")));
    }

    if !location.is_empty() {
        parts.push(format!("Location: {}", location));
    }

    format!("{}\n\n", parts.join("\n"))
}
