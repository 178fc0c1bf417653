//! Format dispatch (C1): turns raw bytes into a `ParsedDocument`.
//!
//! One parser instance per supported extension, selected by a small
//! registry — mirrors the dispatch-by-extension shape the chunker
//! registry used before it was unified (`chunking::mod`).

pub mod docx;
pub mod markdown;
pub mod pdf;
pub mod text;

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;

use crate::error::{Error, Result};

/// Output of C1. `metadata` values are scalar (string/int/float/bool);
/// list-valued metadata is coerced to a comma-joined string before it
/// leaves this module.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub content: String,
    pub metadata: HashMap<String, Value>,
    pub source_path: String,
    pub format: String,
}

/// Decodes UTF-8 with a latin-1 fallback, logging when the fallback is
/// used. Every byte is representable in latin-1, so this never fails.
pub(crate) fn decode_text(bytes: &[u8], source_path: &str) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            tracing::warn!(source_path, "falling back to latin-1 decoding");
            bytes.iter().map(|&b| b as char).collect()
        }
    }
}

pub trait DocumentParser: Send + Sync {
    fn supported_extensions(&self) -> &[&str];
    fn parse_content(&self, bytes: &[u8], source_path: &str) -> Result<ParsedDocument>;

    fn parse(&self, path: &Path) -> Result<ParsedDocument> {
        let bytes = std::fs::read(path)
            .map_err(|_| Error::FileNotFound(path.display().to_string()))?;
        self.parse_content(&bytes, &path.display().to_string())
    }
}

/// Dispatches to the right parser by lowercase file extension.
pub struct ParserRegistry {
    markdown: markdown::MarkdownParser,
    text: text::TextParser,
    pdf: pdf::PdfParser,
    docx: docx::DocxParser,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self {
            markdown: markdown::MarkdownParser::default(),
            text: text::TextParser::default(),
            pdf: pdf::PdfParser::default(),
            docx: docx::DocxParser::default(),
        }
    }

    fn extension(path: &str) -> String {
        Path::new(path)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default()
    }

    pub fn supports(&self, extension: &str) -> bool {
        let ext = extension.to_lowercase();
        self.markdown.supported_extensions().contains(&ext.as_str())
            || self.text.supported_extensions().contains(&ext.as_str())
            || self.pdf.supported_extensions().contains(&ext.as_str())
            || self.docx.supported_extensions().contains(&ext.as_str())
    }

    pub fn parse(&self, path: &Path) -> Result<ParsedDocument> {
        let bytes = std::fs::read(path)
            .map_err(|_| Error::FileNotFound(path.display().to_string()))?;
        self.parse_content(&bytes, &path.display().to_string())
    }

    pub fn parse_content(&self, bytes: &[u8], source_path: &str) -> Result<ParsedDocument> {
        match Self::extension(source_path).as_str() {
            ".md" | ".markdown" | ".mdown" => self.markdown.parse_content(bytes, source_path),
            ".txt" | ".text" => self.text.parse_content(bytes, source_path),
            ".pdf" => self.pdf.parse_content(bytes, source_path),
            ".docx" => self.docx.parse_content(bytes, source_path),
            other => Err(Error::ParseError {
                source_path: source_path.to_string(),
                format: other.to_string(),
                message: "unsupported extension".to_string(),
            }),
        }
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_by_extension() {
        let registry = ParserRegistry::new();
        assert!(registry.supports(".md"));
        assert!(registry.supports(".PDF".to_lowercase().as_str()));
        assert!(!registry.supports(".exe"));
    }

    #[test]
    fn unsupported_extension_is_parse_error() {
        let registry = ParserRegistry::new();
        let err = registry.parse_content(b"data", "a.exe").unwrap_err();
        assert!(matches!(err, Error::ParseError { .. }));
    }
}
