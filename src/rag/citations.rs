//! Numbered source context and citation resolution
//!
//! Retrieved chunks are rendered as `[n] Title (chunk i)` blocks for the
//! prompt. Answers cite them with `[n]`, `[1, 3]` or `[2][3]` markers, which
//! [`extract_citations`] resolves back to the sources.

use crate::rag::store::SearchHit;
use crate::text::{estimate_tokens, truncate_chars};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

const EXCERPT_CHARS: usize = 200;

/// A chunk included in the prompt context under number `number`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub number: usize,
    pub document_id: String,
    pub document_title: String,
    pub chunk_index: usize,
    pub content: String,
    pub score: f32,
}

/// A resolved `[n]` marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub number: usize,
    pub document_id: String,
    pub document_title: String,
    pub chunk_index: usize,
    pub excerpt: String,
}

/// Citations found in an answer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CitationReport {
    /// Distinct citations in order of first appearance
    pub citations: Vec<Citation>,
    /// Marker numbers that match no source
    pub unknown_markers: Vec<usize>,
}

/// Rendered context ready to go into a prompt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuiltContext {
    pub text: String,
    pub sources: Vec<Source>,
    pub token_count: usize,
}

/// Renders search hits as numbered sources within a token budget
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    token_budget: usize,
}

impl ContextBuilder {
    pub fn new(token_budget: usize) -> Self {
        Self {
            token_budget: token_budget.max(1),
        }
    }

    /// Render hits in rank order until the budget is spent.
    ///
    /// The first hit is truncated if it alone exceeds the budget, and
    /// dropped when not even its header fits. Rendering stops at the first
    /// hit that does not fit, so `token_count` never exceeds the budget.
    pub fn build(&self, hits: &[SearchHit]) -> BuiltContext {
        let mut context = BuiltContext::default();
        let mut blocks: Vec<String> = Vec::new();

        for hit in hits {
            let number = context.sources.len() + 1;
            let title = hit
                .document_title
                .clone()
                .unwrap_or_else(|| hit.document_id.clone());
            let header = format!("[{number}] {title} (chunk {})", hit.chunk_index);

            let mut content = hit.content.clone();
            let separator_tokens = if blocks.is_empty() { 0 } else { 1 };
            let mut block_tokens = estimate_tokens(&format!("{header}\n{content}"));

            if context.token_count + separator_tokens + block_tokens > self.token_budget {
                if !blocks.is_empty() {
                    break;
                }
                let header_chars = header.chars().count() + 1;
                let room = (self.token_budget * 4).saturating_sub(header_chars);
                content = truncate_chars(&content, room).to_string();
                block_tokens = estimate_tokens(&format!("{header}\n{content}"));
                // The header alone is over budget
                if block_tokens > self.token_budget {
                    break;
                }
            }

            blocks.push(format!("{header}\n{content}"));
            context.token_count += separator_tokens + block_tokens;
            context.sources.push(Source {
                number,
                document_id: hit.document_id.clone(),
                document_title: title,
                chunk_index: hit.chunk_index,
                content,
                score: hit.score,
            });
        }

        context.text = blocks.join("\n\n");
        context
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new(3000)
    }
}

static CITATION_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[(\d{1,3}(?:\s*,\s*\d{1,3})*)\]").expect("valid citation pattern")
});

/// Every number cited in `answer`, in order of appearance, duplicates kept
pub fn citation_markers(answer: &str) -> Vec<usize> {
    CITATION_MARKER
        .captures_iter(answer)
        .flat_map(|captures| {
            captures[1]
                .split(',')
                .filter_map(|number| number.trim().parse::<usize>().ok())
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Resolve citation markers in `answer` against `sources`
pub fn extract_citations(answer: &str, sources: &[Source]) -> CitationReport {
    let mut report = CitationReport::default();

    for number in citation_markers(answer) {
        match sources.iter().find(|source| source.number == number) {
            Some(source) => {
                if report.citations.iter().all(|c| c.number != number) {
                    report.citations.push(Citation {
                        number,
                        document_id: source.document_id.clone(),
                        document_title: source.document_title.clone(),
                        chunk_index: source.chunk_index,
                        excerpt: truncate_chars(&source.content, EXCERPT_CHARS).to_string(),
                    });
                }
            }
            None => {
                if !report.unknown_markers.contains(&number) {
                    report.unknown_markers.push(number);
                }
            }
        }
    }

    report
}
