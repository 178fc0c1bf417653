//! Header-stack, token-budget chunking shared by every parsed format.
//!
//! Markdown content keeps its header hierarchy; any other format is handed
//! in as a single implicit section (`headers` empty, spanning the whole
//! document) and flows through the same three passes.

use regex::Regex;
use std::sync::OnceLock;

use super::{estimate_tokens, generate_chunk_id, now_iso8601, Chunk, ChunkerConfig, Section};

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(#{1,6})\s+(.+)$").unwrap())
}

pub struct MarkdownChunker {
    config: ChunkerConfig,
}

impl MarkdownChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Chunk already-decoded text. `source_path` is recorded on every
    /// chunk and feeds `chunk_id` generation.
    pub fn chunk(&self, text: &str, source_path: &str) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let sections = split_by_headers(text);
        let groups = self.group_into_chunks(sections);
        let chunks = self.materialize(groups, source_path);
        self.add_overlaps(chunks)
    }

    /// Pass 2: group sections into token-budgeted chunks.
    fn group_into_chunks(&self, sections: Vec<Section>) -> Vec<Vec<Section>> {
        let mut groups: Vec<Vec<Section>> = Vec::new();
        let mut current: Vec<Section> = Vec::new();
        let mut current_tokens = 0usize;

        for section in sections {
            let section_tokens = estimate_tokens(&section.text());

            if section_tokens > self.config.max_tokens {
                if !current.is_empty() {
                    groups.push(std::mem::take(&mut current));
                    current_tokens = 0;
                }
                for split in split_large_section(&section, self.config.max_tokens) {
                    groups.push(vec![split]);
                }
                continue;
            }

            if current_tokens + section_tokens > self.config.max_tokens {
                if current_tokens >= self.config.min_tokens || current.is_empty() {
                    if !current.is_empty() {
                        groups.push(std::mem::take(&mut current));
                    }
                    current.push(section);
                    current_tokens = section_tokens;
                } else {
                    current_tokens += section_tokens;
                    current.push(section);
                }
            } else {
                current_tokens += section_tokens;
                current.push(section);
            }
        }

        if !current.is_empty() {
            groups.push(current);
        }

        groups
    }

    /// Pass 3a: concatenate each group's sections into one chunk, record
    /// line range, headers, and generate `chunk_id`. No overlap yet.
    fn materialize(&self, groups: Vec<Vec<Section>>, source_path: &str) -> Vec<Chunk> {
        let total_chunks = groups.len();
        let timestamp = now_iso8601();

        groups
            .into_iter()
            .enumerate()
            .map(|(idx, group)| {
                let mut content_lines: Vec<String> = Vec::new();
                let mut headers: Vec<String> = Vec::new();
                let mut start_line = usize::MAX;
                let mut end_line = 0usize;

                for section in &group {
                    content_lines.extend(section.content.iter().cloned());
                    if headers.is_empty() && !section.headers.is_empty() {
                        headers = section.headers.clone();
                    }
                    start_line = start_line.min(section.start_line);
                    end_line = end_line.max(section.end_line);
                }

                let content = content_lines.join("\n");
                let token_count = estimate_tokens(&content);
                let char_count = content.chars().count();
                let chunk_id = generate_chunk_id(source_path, idx, &content);

                Chunk {
                    content,
                    chunk_id,
                    file_path: source_path.to_string(),
                    chunk_index: idx,
                    total_chunks,
                    headers,
                    start_line: if start_line == usize::MAX { 0 } else { start_line },
                    end_line,
                    token_count,
                    char_count,
                    overlap_with_previous: false,
                    overlap_with_next: false,
                    timestamp: timestamp.clone(),
                }
            })
            .collect()
    }

    /// Pass 3b: prepend each chunk (after the first) with the trailing
    /// overlap-budgeted suffix of its predecessor.
    fn add_overlaps(&self, mut chunks: Vec<Chunk>) -> Vec<Chunk> {
        if chunks.len() <= 1 {
            return chunks;
        }

        let originals: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();

        for i in 0..chunks.len() {
            if i > 0 {
                let overlap = trailing_overlap(&originals[i - 1], self.config.overlap_tokens);
                if !overlap.is_empty() {
                    chunks[i].content = format!("{overlap}\n\n{}", chunks[i].content);
                    chunks[i].overlap_with_previous = true;
                }
            }
            if i < chunks.len() - 1 {
                chunks[i].overlap_with_next = true;
            }
            chunks[i].token_count = estimate_tokens(&chunks[i].content);
            chunks[i].char_count = chunks[i].content.chars().count();
        }

        chunks
    }
}

/// Pass 1: walk lines, maintaining a header-level stack; start a new
/// section on every header line.
pub(crate) fn split_by_headers(text: &str) -> Vec<Section> {
    let lines: Vec<&str> = text.lines().collect();
    let mut sections = Vec::new();
    let mut header_stack: Vec<(usize, String)> = Vec::new();
    let mut current = Section {
        headers: Vec::new(),
        content: Vec::new(),
        start_line: 1,
        end_line: 0,
    };

    for (i, line) in lines.iter().enumerate() {
        let line_num = i + 1;

        if let Some(caps) = header_re().captures(line) {
            if !current.content.is_empty() {
                current.end_line = line_num - 1;
                sections.push(current);
            }

            let level = caps[1].len();
            let header_text = caps[2].trim().to_string();

            while header_stack.last().is_some_and(|(l, _)| *l >= level) {
                header_stack.pop();
            }
            header_stack.push((level, header_text));

            current = Section {
                headers: header_stack.iter().map(|(_, t)| t.clone()).collect(),
                content: vec![line.to_string()],
                start_line: line_num,
                end_line: 0,
            };
        } else {
            current.content.push(line.to_string());
        }
    }

    if !current.content.is_empty() {
        current.end_line = lines.len();
        sections.push(current);
    }

    sections
}

/// Splits a section whose own token count exceeds `max_tokens`, packing
/// lines into subsections that each stay under budget. Header metadata is
/// preserved on every resulting subsection.
fn split_large_section(section: &Section, max_tokens: usize) -> Vec<Section> {
    let mut out = Vec::new();
    let mut current_lines: Vec<String> = Vec::new();
    let mut current_tokens = 0usize;
    let mut start_line = section.start_line;
    let mut line_cursor = section.start_line;

    for line in &section.content {
        let line_tokens = estimate_tokens(line);

        if current_tokens + line_tokens > max_tokens && !current_lines.is_empty() {
            let end_line = line_cursor - 1;
            out.push(Section {
                headers: section.headers.clone(),
                content: std::mem::take(&mut current_lines),
                start_line,
                end_line,
            });
            start_line = line_cursor;
            current_tokens = 0;
        }

        current_lines.push(line.clone());
        current_tokens += line_tokens;
        line_cursor += 1;
    }

    if !current_lines.is_empty() {
        out.push(Section {
            headers: section.headers.clone(),
            content: current_lines,
            start_line,
            end_line: line_cursor - 1,
        });
    }

    out
}

/// Reverse-accumulates lines from the end of `text` until the next line
/// would push the running estimate past `budget_tokens`.
fn trailing_overlap(text: &str, budget_tokens: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut collected: Vec<&str> = Vec::new();
    let mut tokens = 0usize;

    for line in lines.iter().rev() {
        let line_tokens = estimate_tokens(line);
        if tokens + line_tokens > budget_tokens && !collected.is_empty() {
            break;
        }
        collected.push(line);
        tokens += line_tokens;
    }

    collected.reverse();
    collected.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(min: usize, max: usize, overlap: usize) -> MarkdownChunker {
        MarkdownChunker::new(ChunkerConfig::new(min, max, overlap).unwrap())
    }

    #[test]
    fn empty_content_yields_no_chunks() {
        let c = chunker(10, 100, 5);
        assert!(c.chunk("   \n  ", "a.md").is_empty());
    }

    #[test]
    fn single_small_section_is_one_chunk() {
        let c = chunker(1, 1000, 0);
        let chunks = c.chunk("# Title\n\nHello world.", "a.md");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].total_chunks, 1);
        assert_eq!(chunks[0].headers, vec!["Title".to_string()]);
        assert!(!chunks[0].overlap_with_previous);
        assert!(!chunks[0].overlap_with_next);
    }

    #[test]
    fn header_stack_tracks_nesting_and_pops_on_sibling() {
        let text = "# A\n\nintro\n\n## B\n\nb text\n\n### C\n\nc text\n\n## D\n\nd text";
        let sections = split_by_headers(text);
        let leaf_headers: Vec<Vec<String>> = sections.iter().map(|s| s.headers.clone()).collect();
        assert!(leaf_headers.contains(&vec!["A".to_string(), "B".to_string(), "C".to_string()]));
        // D is a sibling of B; C must have been popped off the stack.
        assert!(leaf_headers.contains(&vec!["A".to_string(), "D".to_string()]));
    }

    #[test]
    fn oversized_section_is_split_line_by_line_and_each_piece_bounded() {
        let big_line = "word ".repeat(50);
        let mut text = String::from("# Big\n\n");
        for _ in 0..30 {
            text.push_str(&big_line);
            text.push('\n');
        }
        let c = chunker(10, 40, 5);
        let chunks = c.chunk(&text, "big.md");
        assert!(chunks.len() > 1);
    }

    #[test]
    fn chunk_ids_are_stable_across_runs() {
        let text = "# T\n\nbody one\n\n## S\n\nbody two, longer content here to force a split maybe";
        let c = chunker(1, 1000, 0);
        let first = c.chunk(text, "a.md");
        let second = c.chunk(text, "a.md");
        let ids_a: Vec<&str> = first.iter().map(|c| c.chunk_id.as_str()).collect();
        let ids_b: Vec<&str> = second.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn overlap_prefixes_trailing_text_of_previous_chunk() {
        let c = chunker(2, 8, 2);
        let text = "# T\n\nalpha beta gamma delta\n\n## S\n\nepsilon zeta eta theta";
        let chunks = c.chunk(text, "a.md");
        if chunks.len() > 1 {
            assert!(chunks[1].overlap_with_previous);
            assert!(chunks[0].overlap_with_next);
        }
    }

    #[test]
    fn non_markdown_text_degenerates_to_one_implicit_section() {
        let text = "plain paragraph one.\n\nplain paragraph two, with more words to pad it out.";
        let sections = split_by_headers(text);
        assert_eq!(sections.len(), 1);
        assert!(sections[0].headers.is_empty());
    }
}
