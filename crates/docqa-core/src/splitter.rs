//! Recursive, separator-driven text splitting with character overlap.
//!
//! Text is cut on the most structural separator it contains (paragraph
//! break first, raw character count last). Pieces that still exceed the
//! budget are cut again with the next separator. Sizes are counted in
//! chars, and every cut lands on a char boundary.
//!
//! Consecutive chunks share context: chunk `n + 1` starts with the last
//! `chunk_overlap` chars of chunk `n`. Dropping that prefix from every chunk
//! but the first and concatenating gives back the input text exactly.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{Chunk, RawDocument};

/// Separators in priority order. A hard character cut follows the last one.
pub const SEPARATORS: &[&str] = &["\n\n", "\n", ".", "!", "?", ",", " "];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitterConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self { chunk_size: 1000, chunk_overlap: 200 }
    }
}

impl SplitterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be positive".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Splitter {
    config: SplitterConfig,
}

impl Splitter {
    pub fn new(config: SplitterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> SplitterConfig { self.config }

    /// Split one document's text. Blank text yields no chunks.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let overlap = self.config.chunk_overlap;
        // Leave room for the overlap prefix so no chunk exceeds chunk_size.
        let budget = self.config.chunk_size - overlap;

        let mut segments = Vec::new();
        split_recursive(text, SEPARATORS, budget, &mut segments);

        let mut chunks: Vec<String> = Vec::with_capacity(segments.len());
        for segment in segments {
            let chunk = match chunks.last() {
                Some(prev) if overlap > 0 => {
                    let mut joined = tail_chars(prev, overlap).to_string();
                    joined.push_str(segment);
                    joined
                }
                _ => segment.to_string(),
            };
            chunks.push(chunk);
        }
        chunks
    }

    /// Split every document in order, numbering chunks with their global row.
    pub fn split_documents(&self, documents: &[RawDocument]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for doc in documents {
            let pieces = self.split_text(&doc.text);
            debug!(source = %doc.source, chunks = pieces.len(), "split document");
            for text in pieces {
                let position = chunks.len();
                chunks.push(Chunk { text, source: doc.source.clone(), position });
            }
        }
        chunks
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// The last `n` chars of `s` (all of `s` when shorter).
fn tail_chars(s: &str, n: usize) -> &str {
    let len = char_len(s);
    if len <= n {
        return s;
    }
    match s.char_indices().nth(len - n) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// Push contiguous slices of `text`, each at most `budget` chars, that
/// together cover `text` exactly.
fn split_recursive<'a>(text: &'a str, separators: &[&str], budget: usize, out: &mut Vec<&'a str>) {
    if char_len(text) <= budget {
        if !text.is_empty() {
            out.push(text);
        }
        return;
    }
    let Some(idx) = separators.iter().position(|sep| text.contains(sep)) else {
        hard_split(text, budget, out);
        return;
    };
    let separator = separators[idx];
    let finer = &separators[idx + 1..];

    // Greedily merge neighbouring pieces into runs that fit the budget.
    let mut run_start = 0;
    let mut run_len = 0;
    let mut offset = 0;
    for piece in text.split_inclusive(separator) {
        let piece_len = char_len(piece);
        if piece_len > budget {
            if run_len > 0 {
                out.push(&text[run_start..offset]);
            }
            split_recursive(piece, finer, budget, out);
            run_start = offset + piece.len();
            run_len = 0;
        } else if run_len + piece_len > budget {
            out.push(&text[run_start..offset]);
            run_start = offset;
            run_len = piece_len;
        } else {
            run_len += piece_len;
        }
        offset += piece.len();
    }
    if run_len > 0 {
        out.push(&text[run_start..offset]);
    }
}

fn hard_split<'a>(text: &'a str, budget: usize, out: &mut Vec<&'a str>) {
    let mut start = 0;
    for (count, (idx, _)) in text.char_indices().enumerate() {
        if count > 0 && count % budget == 0 {
            out.push(&text[start..idx]);
            start = idx;
        }
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
}
