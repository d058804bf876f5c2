//! Deterministic token counting
//!
//! Chunk boundaries must be reproducible across runs, platforms, and languages,
//! so counting is built on unicode-segmentation word bounds rather than a model
//! tokenizer downloaded at runtime.

use unicode_segmentation::UnicodeSegmentation;

/// Characters per extra token charged to long segments
///
/// Approximates subword splitting: "internationalization" costs more than "the".
const LONG_SEGMENT_STRIDE: usize = 8;

/// Fixed, deterministic token counter
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenCounter;

impl TokenCounter {
    pub fn new() -> Self {
        Self
    }

    /// Count tokens in a text
    ///
    /// Every non-whitespace word-bounded segment costs one token, plus one more
    /// per additional [`LONG_SEGMENT_STRIDE`] characters for long segments.
    pub fn count(&self, text: &str) -> usize {
        text.split_word_bounds()
            .filter(|segment| !segment.trim().is_empty())
            .map(|segment| 1 + segment.chars().count().saturating_sub(1) / LONG_SEGMENT_STRIDE)
            .sum()
    }
}
