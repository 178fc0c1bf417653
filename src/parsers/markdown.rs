//! Markdown parser: strips a simple frontmatter block into metadata.

use std::collections::HashMap;

use serde_json::Value;

use super::{decode_text, DocumentParser, ParsedDocument};
use crate::error::Result;

#[derive(Default)]
pub struct MarkdownParser;

impl DocumentParser for MarkdownParser {
    fn supported_extensions(&self) -> &[&str] {
        &[".md", ".markdown", ".mdown"]
    }

    fn parse_content(&self, bytes: &[u8], source_path: &str) -> Result<ParsedDocument> {
        let decoded = decode_text(bytes, source_path);

        let (frontmatter, body) = split_frontmatter(&decoded);

        let mut metadata = HashMap::new();
        for (key, value) in frontmatter {
            metadata.insert(key, Value::String(value));
        }

        Ok(ParsedDocument {
            content: body.trim().to_string(),
            metadata,
            source_path: source_path.to_string(),
            format: "markdown".to_string(),
        })
    }
}

/// Parses a leading `---\n...\n---\n` block as flat `key: value` lines
/// (not full YAML). Returns the parsed pairs and the remaining body.
fn split_frontmatter(text: &str) -> (Vec<(String, String)>, &str) {
    let Some(rest) = text.strip_prefix("---\n") else {
        return (Vec::new(), text);
    };

    let Some(end) = rest.find("\n---\n") else {
        return (Vec::new(), text);
    };

    let block = &rest[..end];
    let body = &rest[end + 5..];

    let pairs = block
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            let key = key.trim().to_string();
            let value = strip_quotes(value.trim());
            Some((key, value))
        })
        .collect();

    (pairs, body)
}

fn strip_quotes(s: &str) -> String {
    let s = s.strip_prefix('"').and_then(|s| s.strip_suffix('"')).unwrap_or(s);
    let s = s.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')).unwrap_or(s);
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_markdown_has_no_metadata() {
        let parser = MarkdownParser;
        let doc = parser.parse_content(b"# Hello\n\nworld", "a.md").unwrap();
        assert_eq!(doc.content, "# Hello\n\nworld");
        assert!(doc.metadata.is_empty());
        assert_eq!(doc.format, "markdown");
    }

    #[test]
    fn frontmatter_is_stripped_and_parsed() {
        let parser = MarkdownParser;
        let input = "---\ntitle: \"My Doc\"\nauthor: jane\n---\n# Body\n\ncontent here";
        let doc = parser.parse_content(input.as_bytes(), "a.md").unwrap();
        assert_eq!(doc.content, "# Body\n\ncontent here");
        assert_eq!(doc.metadata.get("title").unwrap(), &Value::String("My Doc".to_string()));
        assert_eq!(doc.metadata.get("author").unwrap(), &Value::String("jane".to_string()));
    }

    #[test]
    fn latin1_fallback_on_invalid_utf8() {
        let parser = MarkdownParser;
        let bytes = vec![0xFF, 0xFE, b'a'];
        let doc = parser.parse_content(&bytes, "a.md").unwrap();
        assert!(!doc.content.is_empty());
    }
}
