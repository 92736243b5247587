//! Document chunking for the retrieval index.
//!
//! Prose is split into overlapping word windows. Example code is split into
//! overlapping line windows capped by character length.

use crate::state::{Document, SourceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Words per prose chunk
    pub chunk_size: usize,
    /// Words shared by consecutive prose chunks
    pub chunk_overlap: usize,
    /// Lines per code chunk
    pub code_lines: usize,
    pub code_overlap: usize,
    pub code_max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 50,
            code_lines: 40,
            code_overlap: 10,
            code_max_chars: 1200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub source_url: String,
    pub source_kind: SourceKind,
}

/// Split a document according to its source kind
pub fn chunk_document(document: &Document, config: &ChunkingConfig) -> Vec<Chunk> {
    let pieces = match document.source_kind {
        SourceKind::GithubExample => chunk_code(&document.content, config),
        SourceKind::OfficialDoc | SourceKind::Changelog => chunk_prose(&document.content, config),
    };
    pieces
        .into_iter()
        .map(|text| Chunk {
            text,
            source_url: document.source_url.clone(),
            source_kind: document.source_kind,
        })
        .collect()
}

/// Overlapping word windows
pub fn chunk_prose(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    windows(words.len(), config.chunk_size, config.chunk_overlap)
        .map(|(start, end)| words[start..end].join(" "))
        .collect()
}

/// Overlapping line windows; oversized windows are cut at the character cap
pub fn chunk_code(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();
    windows(lines.len(), config.code_lines, config.code_overlap)
        .map(|(start, end)| lines[start..end].join("\n"))
        .map(|chunk| truncate_chars(&chunk, config.code_max_chars))
        .filter(|chunk| !chunk.trim().is_empty())
        .collect()
}

fn windows(len: usize, size: usize, overlap: usize) -> impl Iterator<Item = (usize, usize)> {
    let size = size.max(1);
    let step = size.saturating_sub(overlap).max(1);
    let mut start = 0;
    let mut done = len == 0;
    std::iter::from_fn(move || {
        if done {
            return None;
        }
        let end = (start + size).min(len);
        let window = (start, end);
        if end >= len {
            done = true;
        } else {
            start += step;
        }
        Some(window)
    })
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: 4,
            chunk_overlap: 1,
            code_lines: 3,
            code_overlap: 1,
            code_max_chars: 12,
        }
    }

    #[test]
    fn test_prose_windows_overlap() {
        let chunks = chunk_prose("a b c d e f g", &small());
        assert_eq!(chunks, vec!["a b c d", "d e f g"]);
    }

    #[test]
    fn test_prose_empty() {
        assert!(chunk_prose("   ", &small()).is_empty());
    }

    #[test]
    fn test_code_windows_and_cap() {
        let code = "l1\nl2\nl3\nl4\nvery_long_line_here";
        let chunks = chunk_code(code, &small());
        assert_eq!(chunks[0], "l1\nl2\nl3");
        assert_eq!(chunks[1], "l3\nl4\nvery_l");
        assert!(chunks.iter().all(|c| c.chars().count() <= 12));
    }

    #[test]
    fn test_chunk_document_by_kind() {
        let doc = Document {
            source_url: "https://github.com/a/b".into(),
            content: "import x\nx.run()".into(),
            source_kind: SourceKind::GithubExample,
        };
        let chunks = chunk_document(&doc, &ChunkingConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "import x\nx.run()");
        assert_eq!(chunks[0].source_kind, SourceKind::GithubExample);
    }

    #[test]
    fn test_overlap_larger_than_size_still_terminates() {
        let config = ChunkingConfig {
            chunk_size: 2,
            chunk_overlap: 5,
            ..small()
        };
        assert_eq!(chunk_prose("a b c", &config), vec!["a b", "b c"]);
    }
}
