//! Document chunking
//!
//! Splits normalised text into retrieval units bounded by an estimated token
//! budget. Boundaries follow the configured strategy (words, sentences or
//! paragraphs); oversized units fall back to word and then character splits.
//! Consecutive chunks may repeat trailing context from the previous chunk,
//! bounded by `chunk_overlap` tokens.

use crate::config::RagSection;
use crate::text::estimate_tokens;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Where chunk boundaries may fall
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingStrategy {
    /// Pack words up to the size limit
    #[serde(rename = "fixed", alias = "fixed_size")]
    FixedSize,
    /// Pack whole sentences
    #[default]
    Sentence,
    /// Pack whole paragraphs
    Paragraph,
}

/// A chunk of normalised document text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub content: String,
    pub token_count: usize,
    /// Byte offset of the first character in the normalised text
    pub start: usize,
    /// Byte offset one past the last character in the normalised text
    pub end: usize,
}

/// Splits text into token-bounded chunks
#[derive(Debug, Clone)]
pub struct Chunker {
    strategy: ChunkingStrategy,
    chunk_size: usize,
    chunk_overlap: usize,
}

static HORIZONTAL_WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t\x0B\x0C]+").expect("valid whitespace pattern"));
static SPACE_AROUND_NEWLINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r" ?\n ?").expect("valid newline pattern"));
static EXCESS_NEWLINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").expect("valid paragraph pattern"));

/// Collapse horizontal whitespace runs and limit blank lines to one
pub fn normalize_whitespace(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = HORIZONTAL_WHITESPACE.replace_all(&text, " ");
    let text = SPACE_AROUND_NEWLINE.replace_all(&text, "\n");
    let text = EXCESS_NEWLINES.replace_all(&text, "\n\n");
    text.trim().to_string()
}

impl Chunker {
    /// Sizes are in estimated tokens. The size is at least one token and the
    /// overlap is kept strictly below it.
    pub fn new(strategy: ChunkingStrategy, chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            strategy,
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    pub fn from_config(config: &RagSection) -> Self {
        Self::new(config.strategy, config.chunk_size, config.chunk_overlap)
    }

    pub fn strategy(&self) -> ChunkingStrategy {
        self.strategy
    }

    /// Chunk `text` after whitespace normalisation.
    ///
    /// Offsets in the returned chunks refer to `normalize_whitespace(text)`.
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        let normalized = normalize_whitespace(text);
        self.chunk_normalized(&normalized)
    }

    fn chunk_normalized(&self, text: &str) -> Vec<Chunk> {
        if text.is_empty() {
            return Vec::new();
        }

        let spans = match self.strategy {
            ChunkingStrategy::FixedSize => word_spans(text, 0, text.len()),
            ChunkingStrategy::Sentence => sentence_spans(text),
            ChunkingStrategy::Paragraph => paragraph_spans(text),
        };
        let units = self.bound_units(text, spans);
        self.pack(text, &units)
    }

    /// Replace every unit above the size limit by its words, and every word
    /// above the limit by fixed character pieces
    fn bound_units(&self, text: &str, spans: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
        let mut units = Vec::with_capacity(spans.len());
        for (start, end) in spans {
            if estimate_tokens(&text[start..end]) <= self.chunk_size {
                units.push((start, end));
                continue;
            }
            for (word_start, word_end) in word_spans(text, start, end) {
                if estimate_tokens(&text[word_start..word_end]) <= self.chunk_size {
                    units.push((word_start, word_end));
                } else {
                    units.extend(char_pieces(text, word_start, word_end, self.chunk_size * 4));
                }
            }
        }
        units
    }

    /// Greedily pack units into chunks, seeding each new chunk with trailing
    /// units of the previous one while they fit in the overlap budget
    fn pack(&self, text: &str, units: &[(usize, usize)]) -> Vec<Chunk> {
        let mut chunks: Vec<Chunk> = Vec::new();
        let mut first = 0usize;

        for current in 0..units.len() {
            if current == first {
                continue;
            }
            let (chunk_start, _) = units[first];
            let (_, unit_end) = units[current];
            if estimate_tokens(&text[chunk_start..unit_end]) <= self.chunk_size {
                continue;
            }

            let last = current - 1;
            chunks.push(make_chunk(text, chunks.len(), units[first].0, units[last].1));

            let previous_end = units[last].1;
            let mut next_first = current;
            while next_first > first + 1 && self.chunk_overlap > 0 {
                let candidate = next_first - 1;
                let (candidate_start, _) = units[candidate];
                let overlap_tokens = estimate_tokens(&text[candidate_start..previous_end]);
                let total_tokens = estimate_tokens(&text[candidate_start..unit_end]);
                if overlap_tokens > self.chunk_overlap || total_tokens > self.chunk_size {
                    break;
                }
                next_first = candidate;
            }
            first = next_first;
        }

        if let (Some(&(start, _)), Some(&(_, end))) = (units.get(first), units.last()) {
            chunks.push(make_chunk(text, chunks.len(), start, end));
        }

        chunks
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::from_config(&RagSection::default())
    }
}

fn make_chunk(text: &str, index: usize, start: usize, end: usize) -> Chunk {
    let content = text[start..end].to_string();
    Chunk {
        index,
        token_count: estimate_tokens(&content),
        content,
        start,
        end,
    }
}

/// Trim a byte range to its non-whitespace content
fn trim_span(text: &str, start: usize, end: usize) -> Option<(usize, usize)> {
    let slice = &text[start..end];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return None;
    }
    let leading = slice.len() - slice.trim_start().len();
    Some((start + leading, start + leading + trimmed.len()))
}

fn word_spans(text: &str, start: usize, end: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut word_start: Option<usize> = None;

    for (offset, c) in text[start..end].char_indices() {
        let position = start + offset;
        match (c.is_whitespace(), word_start) {
            (true, Some(begin)) => {
                spans.push((begin, position));
                word_start = None;
            }
            (false, None) => word_start = Some(position),
            _ => {}
        }
    }
    if let Some(begin) = word_start {
        spans.push((begin, end));
    }
    spans
}

/// Sentences end after `.`, `!`, `?` or `…` followed by whitespace, and at
/// every line break
fn sentence_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut sentence_start = 0usize;
    let mut chars = text.char_indices().peekable();

    while let Some((position, c)) = chars.next() {
        let boundary = match c {
            '\n' => Some(position),
            '.' | '!' | '?' | '…' => match chars.peek() {
                Some(&(_, next)) if next.is_whitespace() => Some(position + c.len_utf8()),
                _ => None,
            },
            _ => None,
        };

        if let Some(boundary) = boundary {
            spans.extend(trim_span(text, sentence_start, boundary));
            sentence_start = boundary;
        }
    }
    spans.extend(trim_span(text, sentence_start, text.len()));
    spans
}

fn paragraph_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut paragraph_start = 0usize;
    for (position, separator) in text.match_indices("\n\n") {
        spans.extend(trim_span(text, paragraph_start, position));
        paragraph_start = position + separator.len();
    }
    spans.extend(trim_span(text, paragraph_start, text.len()));
    spans
}

fn char_pieces(text: &str, start: usize, end: usize, max_chars: usize) -> Vec<(usize, usize)> {
    let mut pieces = Vec::new();
    let mut piece_start = start;
    let mut count = 0usize;

    for (offset, _) in text[start..end].char_indices() {
        if count == max_chars {
            pieces.push((piece_start, start + offset));
            piece_start = start + offset;
            count = 0;
        }
        count += 1;
    }
    if piece_start < end {
        pieces.push((piece_start, end));
    }
    pieces
}
