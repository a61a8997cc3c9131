use std::collections::VecDeque;
use std::path::Path;

use tracing::{debug, warn};
use walkdir::WalkDir;

use ragloop_core::error::{RagError, Result};

/// A chunk of a source document, ready to be indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChunk {
    /// File name of the document the chunk came from.
    pub source: String,
    /// Nearest heading above the chunk.
    pub title: Option<String>,
    pub content: String,
}

/// Load every document under `dir` whose extension is in `extensions` and
/// split it into chunks. Heading lines are not indexed; they become the
/// title of the chunks below them. Unreadable files are skipped.
pub fn load_folder(
    dir: &Path,
    extensions: &[String],
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<DocumentChunk>> {
    if !dir.is_dir() {
        return Err(RagError::Config(format!(
            "documents folder not found: {}",
            dir.display()
        )));
    }

    let mut paths: Vec<_> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    let mut chunks = Vec::new();
    for path in paths {
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable document");
                continue;
            }
        };
        let source = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let before = chunks.len();
        chunks.extend(chunk_document(&source, &text, chunk_size, overlap));
        debug!(source = %source, chunks = chunks.len() - before, "Chunked document");
    }
    Ok(chunks)
}

/// Split one markdown document into titled chunks.
fn chunk_document(source: &str, text: &str, chunk_size: usize, overlap: usize) -> Vec<DocumentChunk> {
    let mut out = Vec::new();
    let mut title: Option<String> = None;
    let mut section: Vec<&str> = Vec::new();

    let mut flush = |title: &Option<String>, section: &mut Vec<&str>| {
        for content in split_into_chunks(section, chunk_size, overlap) {
            out.push(DocumentChunk {
                source: source.to_string(),
                title: title.clone(),
                content,
            });
        }
        section.clear();
    };

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('#') {
            flush(&title, &mut section);
            let heading = line.trim_start_matches('#').trim();
            title = (!heading.is_empty()).then(|| heading.to_string());
            continue;
        }
        section.push(line);
    }
    flush(&title, &mut section);
    out
}

/// Merge lines into chunks of at most `chunk_size` characters (a single
/// longer line forms its own chunk). Consecutive chunks share trailing
/// lines totalling at most `overlap` characters.
pub fn split_into_chunks(lines: &[&str], chunk_size: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: VecDeque<(&str, usize)> = VecDeque::new();
    let mut total = 0usize;

    let joined_len = |total: usize, n: usize| total + n.saturating_sub(1);

    for &line in lines {
        let len = line.chars().count();
        if !window.is_empty() && joined_len(total, window.len()) + 1 + len > chunk_size {
            chunks.push(join(&window));
            while let Some(&(_, front_len)) = window.front() {
                let current = joined_len(total, window.len());
                if current > overlap || current + 1 + len > chunk_size {
                    window.pop_front();
                    total -= front_len;
                } else {
                    break;
                }
            }
        }
        window.push_back((line, len));
        total += len;
    }
    if !window.is_empty() {
        chunks.push(join(&window));
    }
    chunks
}

fn join(window: &VecDeque<(&str, usize)>) -> String {
    window
        .iter()
        .map(|(line, _)| *line)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_merges_short_lines() {
        let chunks = split_into_chunks(&["aaa", "bbb", "ccc"], 20, 0);
        assert_eq!(chunks, vec!["aaa\nbbb\nccc".to_string()]);
    }

    #[test]
    fn test_split_respects_size_and_overlap() {
        let chunks = split_into_chunks(&["aaaa", "bbbb", "cccc"], 9, 4);
        assert_eq!(chunks, vec!["aaaa\nbbbb".to_string(), "bbbb\ncccc".to_string()]);
    }

    #[test]
    fn test_split_long_line_is_own_chunk() {
        let long = "x".repeat(30);
        let chunks = split_into_chunks(&["a", &long, "b"], 10, 0);
        assert_eq!(chunks, vec!["a".to_string(), long.clone(), "b".to_string()]);
    }

    #[test]
    fn test_chunk_document_drops_headings_and_titles_chunks() {
        let text = "# Python\nPython is an interpreted language.\n\n## Rust\nRust is compiled.\n";
        let chunks = chunk_document("lang.md", text, 512, 50);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].source, "lang.md");
        assert_eq!(chunks[0].title.as_deref(), Some("Python"));
        assert_eq!(chunks[0].content, "Python is an interpreted language.");
        assert_eq!(chunks[1].title.as_deref(), Some("Rust"));
        assert!(chunks.iter().all(|c| !c.content.starts_with('#')));
    }

    #[test]
    fn test_load_folder_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# A\nalpha line\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), "beta line\n").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("c.MD"), "gamma line\n").unwrap();

        let chunks = load_folder(dir.path(), &["md".to_string()], 512, 50).unwrap();
        let sources: Vec<_> = chunks.iter().map(|c| c.source.as_str()).collect();
        assert_eq!(sources, vec!["a.md", "c.MD"]);
    }

    #[test]
    fn test_load_folder_missing_dir() {
        let err = load_folder(Path::new("/definitely/not/here"), &[], 10, 0).unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
    }
}
