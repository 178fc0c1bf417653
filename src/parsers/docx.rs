//! Word (.docx) parser: OOXML-in-zip, read directly with `zip` +
//! `quick-xml` rather than pulling in a dedicated docx crate.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::Value;

use super::{DocumentParser, ParsedDocument};
use crate::error::{Error, Result};

#[derive(Default)]
pub struct DocxParser;

impl DocumentParser for DocxParser {
    fn supported_extensions(&self) -> &[&str] {
        &[".docx"]
    }

    fn parse_content(&self, bytes: &[u8], source_path: &str) -> Result<ParsedDocument> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| Error::ParseError {
            source_path: source_path.to_string(),
            format: "docx".to_string(),
            message: format!("not a valid zip/docx container: {e}"),
        })?;

        let document_xml = read_entry(&mut archive, "word/document.xml").ok_or_else(|| Error::ParseError {
            source_path: source_path.to_string(),
            format: "docx".to_string(),
            message: "missing word/document.xml".to_string(),
        })?;

        let (content, paragraph_count) = extract_body_text(&document_xml);

        let mut metadata = HashMap::new();
        metadata.insert("paragraph_count".to_string(), Value::from(paragraph_count));

        if let Some(core_xml) = read_entry(&mut archive, "docProps/core.xml") {
            for (key, value) in core_properties(&core_xml) {
                metadata.insert(key, Value::String(value));
            }
        }

        Ok(ParsedDocument {
            content: content.trim().to_string(),
            metadata,
            source_path: source_path.to_string(),
            format: "docx".to_string(),
        })
    }
}

fn read_entry<R: Read + std::io::Seek>(archive: &mut zip::ZipArchive<R>, name: &str) -> Option<String> {
    let mut file = archive.by_name(name).ok()?;
    let mut buf = String::new();
    file.read_to_string(&mut buf).ok()?;
    Some(buf)
}

/// Walks `word/document.xml`, joining run text (`w:t`) within each
/// paragraph (`w:p`) and flattening table rows (`w:tr`) into cells
/// joined by `" | "`. Returns the assembled content and paragraph count.
fn extract_body_text(xml: &str) -> (String, usize) {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(false);

    let mut blocks: Vec<String> = Vec::new();
    let mut paragraph_count = 0usize;

    let mut current_paragraph = String::new();
    let mut in_paragraph = false;

    let mut current_row: Vec<String> = Vec::new();
    let mut current_cell = String::new();
    let mut in_table = false;
    let mut in_cell = false;

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match local_name(e.name().as_ref()) {
                "p" if !in_table => {
                    in_paragraph = true;
                    current_paragraph.clear();
                }
                "tbl" => in_table = true,
                "tr" => current_row.clear(),
                "tc" => {
                    in_cell = true;
                    current_cell.clear();
                }
                _ => {}
            },
            Ok(Event::End(e)) => match local_name(e.name().as_ref()) {
                "p" if !in_table => {
                    if in_paragraph {
                        blocks.push(std::mem::take(&mut current_paragraph));
                        paragraph_count += 1;
                    }
                    in_paragraph = false;
                }
                "tc" => {
                    in_cell = false;
                    current_row.push(std::mem::take(&mut current_cell));
                }
                "tr" => {
                    if !current_row.is_empty() {
                        blocks.push(current_row.join(" | "));
                    }
                }
                "tbl" => in_table = false,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                let text = e.unescape().unwrap_or_default().into_owned();
                if in_cell {
                    current_cell.push_str(&text);
                } else if in_paragraph {
                    current_paragraph.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    (blocks.join("\n\n"), paragraph_count)
}

/// Non-empty values among `{title, author, subject, keywords}` from
/// `docProps/core.xml` (Dublin Core + `cp` namespace properties).
fn core_properties(xml: &str) -> Vec<(String, String)> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut current: Option<&'static str> = None;
    let mut found: HashMap<&'static str, String> = HashMap::new();

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                current = match local_name(e.name().as_ref()) {
                    "title" => Some("title"),
                    "creator" => Some("author"),
                    "subject" => Some("subject"),
                    "keywords" => Some("keywords"),
                    _ => None,
                };
            }
            Ok(Event::Text(e)) => {
                if let Some(key) = current {
                    let text = e.unescape().unwrap_or_default().into_owned();
                    found.entry(key).or_default().push_str(&text);
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    found
        .into_iter()
        .filter(|(_, v)| !v.trim().is_empty())
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn local_name(qname: &[u8]) -> &str {
    let s = std::str::from_utf8(qname).unwrap_or("");
    s.rsplit(':').next().unwrap_or(s)
}
