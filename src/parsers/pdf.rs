//! PDF parser: per-page text extraction with page markers.

use std::collections::HashMap;
use std::path::Path;

use pdf_oxide::converters::ConversionOptions;
use serde_json::Value;

use super::{DocumentParser, ParsedDocument};
use crate::error::{Error, Result};

#[derive(Default)]
pub struct PdfParser;

impl DocumentParser for PdfParser {
    fn supported_extensions(&self) -> &[&str] {
        &[".pdf"]
    }

    fn parse_content(&self, bytes: &[u8], source_path: &str) -> Result<ParsedDocument> {
        // pdf_oxide reads from a path, so round-trip through a temp file.
        let temp_path = std::env::temp_dir().join(format!("thoth_pdf_{}.pdf", uuid::Uuid::new_v4()));
        std::fs::write(&temp_path, bytes).map_err(|e| Error::ParseError {
            source_path: source_path.to_string(),
            format: "pdf".to_string(),
            message: format!("failed to stage temp file: {e}"),
        })?;

        let result = extract(&temp_path, source_path);
        let _ = std::fs::remove_file(&temp_path);
        result
    }
}

fn extract(pdf_path: &Path, source_path: &str) -> Result<ParsedDocument> {
    let mut doc = pdf_oxide::PdfDocument::open(pdf_path).map_err(|e| Error::ParseError {
        source_path: source_path.to_string(),
        format: "pdf".to_string(),
        message: format!("failed to open PDF: {e}"),
    })?;

    let page_count = doc.page_count().map_err(|e| Error::ParseError {
        source_path: source_path.to_string(),
        format: "pdf".to_string(),
        message: format!("failed to read page count: {e}"),
    })?;

    let options = ConversionOptions::default();
    let mut pages = Vec::new();

    for page_idx in 0..page_count {
        let text = doc.to_markdown(page_idx, &options).unwrap_or_default();
        if text.trim().is_empty() {
            continue;
        }
        pages.push(format!("[Page {}]\n{}", page_idx + 1, text));
    }

    let content = pages.join("\n\n").trim().to_string();

    let mut metadata = HashMap::new();
    metadata.insert("page_count".to_string(), Value::from(page_count));
    for (key, value) in info_fields(&doc) {
        metadata.insert(key, Value::String(value));
    }

    Ok(ParsedDocument {
        content,
        metadata,
        source_path: source_path.to_string(),
        format: "pdf".to_string(),
    })
}

/// Non-empty values among `{title, author, subject, creator, producer}`
/// from the document's info dictionary.
fn info_fields(doc: &pdf_oxide::PdfDocument) -> Vec<(String, String)> {
    let info = doc.metadata();
    [
        ("title", info.title.as_deref()),
        ("author", info.author.as_deref()),
        ("subject", info.subject.as_deref()),
        ("creator", info.creator.as_deref()),
        ("producer", info.producer.as_deref()),
    ]
    .into_iter()
    .filter_map(|(key, value)| {
        let v = value?.trim();
        if v.is_empty() {
            None
        } else {
            Some((key.to_string(), v.to_string()))
        }
    })
    .collect()
}

#[cfg(test)]
mod tests {
    // PDF fixtures require a real PDF binary and pdf_oxide's runtime; the
    // page-marker and whitespace-skip logic is exercised indirectly via
    // the chunker, which consumes this parser's `content` output shape.
}
