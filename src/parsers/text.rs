//! Plain-text parser.

use std::collections::HashMap;

use serde_json::Value;

use super::{decode_text, DocumentParser, ParsedDocument};
use crate::error::Result;

#[derive(Default)]
pub struct TextParser;

impl DocumentParser for TextParser {
    fn supported_extensions(&self) -> &[&str] {
        &[".txt", ".text"]
    }

    fn parse_content(&self, bytes: &[u8], source_path: &str) -> Result<ParsedDocument> {
        let decoded = decode_text(bytes, source_path);
        let content = decoded.trim().to_string();

        let mut metadata = HashMap::new();
        metadata.insert("char_count".to_string(), Value::from(content.chars().count()));
        metadata.insert("line_count".to_string(), Value::from(decoded.matches('\n').count() + 1));

        Ok(ParsedDocument {
            content,
            metadata,
            source_path: source_path.to_string(),
            format: "text".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carries_char_and_line_counts() {
        let parser = TextParser;
        let doc = parser.parse_content(b"line one\nline two\nline three", "a.txt").unwrap();
        assert_eq!(doc.format, "text");
        assert_eq!(doc.metadata.get("line_count").unwrap(), &Value::from(3));
    }

    #[test]
    fn trims_whitespace() {
        let parser = TextParser;
        let doc = parser.parse_content(b"  \n  hello  \n  ", "a.txt").unwrap();
        assert_eq!(doc.content, "hello");
    }
}
