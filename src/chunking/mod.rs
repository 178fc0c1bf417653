//! Structure-aware chunking.
//!
//! A single header-stack, token-budget algorithm handles every parsed
//! format: Markdown content keeps its header hierarchy; other formats
//! degenerate to one implicit top-level section and flow through the same
//! three-pass pipeline (split, group, overlap).

pub mod markdown;

pub use markdown::MarkdownChunker;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Token estimation is deliberately approximate: 0.25 tokens per
/// character. Counted in Unicode code points, the same basis `char_count`
/// uses, so `token_count = floor(char_count * 0.25)` holds regardless of
/// how many UTF-8 bytes those code points occupy.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() as f64 * 0.25) as usize
}

/// Budget triple a chunker is configured with. `overlap_tokens` must be
/// strictly less than `min_tokens`.
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub min_tokens: usize,
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

pub const DEFAULT_MIN_TOKENS: usize = 500;
pub const DEFAULT_MAX_TOKENS: usize = 1000;
pub const DEFAULT_OVERLAP_TOKENS: usize = 150;

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_tokens: DEFAULT_MIN_TOKENS,
            max_tokens: DEFAULT_MAX_TOKENS,
            overlap_tokens: DEFAULT_OVERLAP_TOKENS,
        }
    }
}

impl ChunkerConfig {
    pub fn new(min_tokens: usize, max_tokens: usize, overlap_tokens: usize) -> Result<Self> {
        if overlap_tokens >= min_tokens {
            return Err(Error::ChunkerConfigError {
                overlap: overlap_tokens,
                min: min_tokens,
            });
        }
        Ok(Self {
            min_tokens,
            max_tokens,
            overlap_tokens,
        })
    }
}

/// A chunk of content with its structural metadata (§3.1 Chunk entity).
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub content: String,
    pub chunk_id: String,
    pub file_path: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub headers: Vec<String>,
    pub start_line: usize,
    pub end_line: usize,
    pub token_count: usize,
    pub char_count: usize,
    pub overlap_with_previous: bool,
    pub overlap_with_next: bool,
    pub timestamp: String,
}

/// `chunk_{index}_{h}`, `h` = first 8 hex chars of SHA-256 over
/// `"{source_path}:{index}:{content[:100]}"`.
pub fn generate_chunk_id(source_path: &str, index: usize, content: &str) -> String {
    let snippet: String = content.chars().take(100).collect();
    let hash_input = format!("{source_path}:{index}:{snippet}");
    let digest = Sha256::digest(hash_input.as_bytes());
    let hex = format!("{digest:x}");
    format!("chunk_{index}_{}", &hex[..8])
}

pub(crate) fn now_iso8601() -> String {
    Utc::now().to_rfc3339()
}

/// Internal section produced by the header-split pass. Non-Markdown
/// formats produce exactly one section spanning the whole document.
#[derive(Debug, Clone)]
pub(crate) struct Section {
    pub headers: Vec<String>,
    pub content: Vec<String>,
    pub start_line: usize,
    pub end_line: usize,
}

impl Section {
    pub fn text(&self) -> String {
        self.content.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_is_quarter_of_char_length() {
        assert_eq!(estimate_tokens("a".repeat(100).as_str()), 25);
    }

    #[test]
    fn token_estimate_counts_code_points_not_bytes() {
        // 100 multi-byte code points (200 UTF-8 bytes) must still estimate
        // to 25 tokens, matching char_count's basis exactly.
        let text = "é".repeat(100);
        assert_eq!(text.len(), 200);
        assert_eq!(text.chars().count(), 100);
        assert_eq!(estimate_tokens(&text), 25);
    }

    #[test]
    fn config_rejects_overlap_at_or_above_min() {
        assert!(ChunkerConfig::new(100, 200, 100).is_err());
        assert!(ChunkerConfig::new(100, 200, 99).is_ok());
    }

    #[test]
    fn chunk_id_is_deterministic() {
        let a = generate_chunk_id("docs/a.md", 0, "hello world");
        let b = generate_chunk_id("docs/a.md", 0, "hello world");
        assert_eq!(a, b);
        assert!(a.starts_with("chunk_0_"));
    }

    #[test]
    fn chunk_id_varies_with_index_and_content() {
        let a = generate_chunk_id("docs/a.md", 0, "hello world");
        let b = generate_chunk_id("docs/a.md", 1, "hello world");
        let c = generate_chunk_id("docs/a.md", 0, "goodbye world");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
