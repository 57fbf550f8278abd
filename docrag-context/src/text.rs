//! Splitting extracted document text into overlapping passages sized for an
//! embedding model.
//!
//! The chunker works on Unicode scalar values, so every offset it reports is a
//! character offset into the text it was given, never a byte offset.
//!
//! - [`ChunkerConfig`]: target chunk size, overlap and boundary lookback.
//! - [`TextChunker`]: produces [`TextChunk`]s from a string.
//! - [`normalize_text`]: whitespace cleanup applied to extracted text before chunking.
//!
//! # Boundary selection
//!
//! A chunk ends at most `chunk_size` characters after it starts. When more text
//! follows, the end is pulled back to the nearest boundary inside the lookback
//! window, preferring in order:
//!
//! 1. a paragraph break (`\n\n`)
//! 2. the end of a sentence (`.`, `!`, `?` or `…` followed by whitespace)
//! 3. a line break
//! 4. any other whitespace
//!
//! If none is found the chunk is cut at exactly `chunk_size` characters. The next
//! chunk always starts `overlap` characters before the previous one ended.
//!
//! # Usage
//!
//! ```
//! use docrag_context::{ChunkerConfig, TextChunker};
//!
//! let chunker = TextChunker::new(ChunkerConfig {
//!     chunk_size: 40,
//!     overlap: 10,
//!     boundary_lookback: 20,
//! })
//! .unwrap();
//!
//! let text = "Paris is the capital of France. Berlin is the capital of Germany.";
//! let chunks = chunker.chunk(text);
//!
//! assert!(chunks.len() > 1);
//! assert_eq!(chunks[0].start, 0);
//! assert_eq!(chunks[1].overlap, 10);
//! ```
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use thiserror::Error;

/// Default target chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 800;
/// Default overlap between consecutive chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 150;
/// Default distance the chunker looks back from a hard cut for a boundary.
pub const DEFAULT_BOUNDARY_LOOKBACK: usize = 200;

static HORIZONTAL_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\S\n]+").expect("static regex"));
static EXCESS_BREAKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("static regex"));

/// Errors raised when a chunker is configured with unusable sizes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkerError {
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,

    #[error("overlap ({overlap}) must be smaller than the chunk size ({chunk_size})")]
    OverlapTooLarge { chunk_size: usize, overlap: usize },
}

/// Sizes that drive chunking. Deserializes with defaults for missing fields so it
/// can sit directly in a TOML configuration section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Target (and maximum) chunk length in characters.
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks. Must be smaller than `chunk_size`.
    pub overlap: usize,
    /// How far back from a hard cut to search for a natural boundary.
    #[serde(alias = "lookback")]
    pub boundary_lookback: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
            boundary_lookback: DEFAULT_BOUNDARY_LOOKBACK,
        }
    }
}

impl ChunkerConfig {
    pub fn validate(&self) -> Result<(), ChunkerError> {
        if self.chunk_size == 0 {
            return Err(ChunkerError::ZeroChunkSize);
        }
        if self.overlap >= self.chunk_size {
            return Err(ChunkerError::OverlapTooLarge {
                chunk_size: self.chunk_size,
                overlap: self.overlap,
            });
        }
        Ok(())
    }
}

/// A contiguous span of text produced by [`TextChunker::chunk`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextChunk {
    /// Position of this chunk within the document (0-indexed).
    pub sequence: usize,
    /// The chunk's text.
    pub text: String,
    /// Character offset of the first character (inclusive).
    pub start: usize,
    /// Character offset one past the last character (exclusive).
    pub end: usize,
    /// Characters shared with the previous chunk. Zero for the first chunk.
    pub overlap: usize,
}

impl TextChunk {
    pub fn char_len(&self) -> usize {
        self.end - self.start
    }
}

/// Splits text into overlapping chunks. Cheap to clone and share.
#[derive(Debug, Clone, Copy)]
pub struct TextChunker {
    config: ChunkerConfig,
}

impl TextChunker {
    /// Creates a chunker after checking that the overlap is smaller than the chunk size.
    ///
    /// # Errors
    /// Returns [`ChunkerError`] when `chunk_size` is zero or `overlap >= chunk_size`.
    pub fn new(config: ChunkerConfig) -> Result<Self, ChunkerError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Splits `text` into chunks.
    ///
    /// Empty or whitespace-only text yields no chunks. Text no longer than the
    /// chunk size yields a single chunk equal to the whole text. Output is fully
    /// determined by the input and the configuration.
    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let ChunkerConfig {
            chunk_size,
            overlap,
            ..
        } = self.config;

        let mut chunks = Vec::with_capacity(total / (chunk_size - overlap) + 1);
        let mut start = 0;
        loop {
            let hard_end = (start + chunk_size).min(total);
            let end = if hard_end == total {
                total
            } else {
                self.find_boundary(&chars, start, hard_end)
            };

            chunks.push(TextChunk {
                sequence: chunks.len(),
                text: chars[start..end].iter().collect(),
                start,
                end,
                overlap: if chunks.is_empty() { 0 } else { overlap },
            });

            if end == total {
                break;
            }
            // `find_boundary` never returns an end at or before `start + overlap`,
            // so this always advances.
            start = end - overlap;
        }

        chunks
    }

    /// Returns the end offset for a chunk starting at `start` whose hard cut is
    /// `hard_end` (exclusive).
    fn find_boundary(&self, chars: &[char], start: usize, hard_end: usize) -> usize {
        let lower = hard_end
            .saturating_sub(self.config.boundary_lookback)
            .max(start + self.config.overlap + 1);
        if lower >= hard_end {
            return hard_end;
        }

        let candidates = || (lower..=hard_end).rev();

        let is_paragraph = |end: usize| end >= 2 && chars[end - 1] == '\n' && chars[end - 2] == '\n';
        let is_sentence = |end: usize| {
            end >= 1
                && matches!(chars[end - 1], '.' | '!' | '?' | '…')
                && chars.get(end).is_none_or(|c| c.is_whitespace())
        };
        let is_line = |end: usize| end >= 1 && chars[end - 1] == '\n';
        let is_space = |end: usize| end >= 1 && chars[end - 1].is_whitespace();

        candidates()
            .find(|&end| is_paragraph(end))
            .or_else(|| candidates().find(|&end| is_sentence(end)))
            .or_else(|| candidates().find(|&end| is_line(end)))
            .or_else(|| candidates().find(|&end| is_space(end)))
            .unwrap_or(hard_end)
    }
}

impl Default for TextChunker {
    fn default() -> Self {
        Self {
            config: ChunkerConfig::default(),
        }
    }
}

/// Cleans up extracted text before chunking.
///
/// Line endings become `\n`, runs of other whitespace inside a line collapse to a
/// single space, lines are trimmed, and three or more consecutive line breaks
/// collapse to one blank line.
pub fn normalize_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<String> = unified
        .split('\n')
        .map(|line| HORIZONTAL_SPACE.replace_all(line.trim(), " ").into_owned())
        .collect();
    let joined = lines.join("\n");
    EXCESS_BREAKS
        .replace_all(joined.trim(), "\n\n")
        .into_owned()
}
