//! Line-window chunking.
//!
//! Files are cut into fixed windows of `chunk_size` lines advancing by
//! `chunk_size - overlap`, so consecutive windows share `overlap` lines.
//! The final window is truncated at end-of-file. Structural hints come from
//! the [`DetectorRegistry`] and never move boundaries.

use std::path::PathBuf;

use codesage_config::ChunkingSettings;
use thiserror::Error;
use tracing::debug;

use crate::model::ChunkId;
use crate::scanner::FileRecord;
use crate::structure::{DetectorRegistry, StructureKind};

#[derive(Debug, Error)]
pub enum ChunkerError {
    #[error("chunk_size must be greater than 0")]
    ZeroChunkSize,

    #[error("overlap ({overlap}) must be smaller than chunk_size ({chunk_size})")]
    OverlapTooLarge { chunk_size: usize, overlap: usize },

    #[error("invalid structure pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl ChunkOptions {
    pub fn validate(&self) -> Result<(), ChunkerError> {
        if self.chunk_size == 0 {
            return Err(ChunkerError::ZeroChunkSize);
        }
        if self.overlap >= self.chunk_size {
            return Err(ChunkerError::OverlapTooLarge {
                chunk_size: self.chunk_size,
                overlap: self.overlap,
            });
        }
        Ok(())
    }
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self::from(&ChunkingSettings::default())
    }
}

impl From<&ChunkingSettings> for ChunkOptions {
    fn from(settings: &ChunkingSettings) -> Self {
        Self {
            chunk_size: settings.chunk_size,
            overlap: settings.overlap,
        }
    }
}

/// A window of lines from one file.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeChunk {
    pub file_path: PathBuf,
    pub relative_path: String,
    pub language: String,
    /// Zero-based, inclusive
    pub start_line: usize,
    /// Zero-based, inclusive
    pub end_line: usize,
    pub text: String,
    pub is_function: bool,
    pub is_class: bool,
    /// Name of the winning structural match, if any
    pub symbol: Option<String>,
}

impl CodeChunk {
    pub fn id(&self) -> ChunkId {
        ChunkId::new(&self.relative_path, self.start_line, self.end_line)
    }

    pub fn line_count(&self) -> usize {
        self.end_line - self.start_line + 1
    }
}

/// Inclusive `(start, end)` line ranges covering `total_lines`.
pub fn line_windows(total_lines: usize, chunk_size: usize, overlap: usize) -> Vec<(usize, usize)> {
    if total_lines == 0 || chunk_size == 0 || overlap >= chunk_size {
        return Vec::new();
    }

    let stride = chunk_size - overlap;
    let mut windows = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + chunk_size).min(total_lines) - 1;
        windows.push((start, end));
        if end + 1 >= total_lines {
            break;
        }
        start += stride;
    }
    windows
}

pub struct CodeChunker {
    options: ChunkOptions,
    detectors: DetectorRegistry,
}

impl CodeChunker {
    pub fn new(options: ChunkOptions) -> Result<Self, ChunkerError> {
        options.validate()?;
        Ok(Self {
            options,
            detectors: DetectorRegistry::with_defaults()?,
        })
    }

    pub fn with_detectors(options: ChunkOptions, detectors: DetectorRegistry) -> Result<Self, ChunkerError> {
        options.validate()?;
        Ok(Self { options, detectors })
    }

    pub fn options(&self) -> ChunkOptions {
        self.options
    }

    /// Chunk a scanned file, loading its content on demand.
    pub fn chunk_file(&self, file: &mut FileRecord) -> Result<Vec<CodeChunk>, ChunkerError> {
        let path = file.path.clone();
        let relative = file.relative_path.clone();
        let language = file.language.clone();
        let text = file
            .load_content()
            .map_err(|source| ChunkerError::Read { path: path.clone(), source })?;
        Ok(self.chunk_text(text, path, &relative, &language))
    }

    pub fn chunk_text(
        &self,
        text: &str,
        file_path: PathBuf,
        relative_path: &str,
        language: &str,
    ) -> Vec<CodeChunk> {
        let lines: Vec<&str> = text.lines().collect();
        let windows = line_windows(lines.len(), self.options.chunk_size, self.options.overlap);

        let chunks: Vec<CodeChunk> = windows
            .into_iter()
            .map(|(start, end)| {
                let body = lines[start..=end].join("\n");
                let structure = self.detectors.detect_first(language, &body);
                CodeChunk {
                    file_path: file_path.clone(),
                    relative_path: relative_path.to_string(),
                    language: language.to_string(),
                    start_line: start,
                    end_line: end,
                    is_function: structure
                        .as_ref()
                        .map_or(false, |s| s.kind == StructureKind::Function),
                    is_class: structure
                        .as_ref()
                        .map_or(false, |s| s.kind == StructureKind::Class),
                    symbol: structure.map(|s| s.name),
                    text: body,
                }
            })
            .collect();

        debug!("Chunked {} into {} chunks", relative_path, chunks.len());
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_lines(n: usize) -> String {
        (0..n).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n")
    }

    #[test]
    fn test_windows_with_overlap() {
        assert_eq!(
            line_windows(240, 100, 20),
            vec![(0, 99), (80, 179), (160, 239)]
        );
    }

    #[test]
    fn test_windows_short_file() {
        assert_eq!(line_windows(7, 100, 20), vec![(0, 6)]);
        assert_eq!(line_windows(100, 100, 20), vec![(0, 99)]);
        assert!(line_windows(0, 100, 20).is_empty());
    }

    #[test]
    fn test_windows_cover_every_line() {
        for total in [1, 50, 81, 99, 101, 180, 181, 1000] {
            let windows = line_windows(total, 100, 20);
            assert_eq!(windows[0].0, 0);
            assert_eq!(windows.last().unwrap().1, total - 1);
            for pair in windows.windows(2) {
                assert_eq!(pair[1].0, pair[0].0 + 80);
                assert!(pair[1].0 <= pair[0].1);
            }
        }
    }

    #[test]
    fn test_invalid_options_rejected() {
        assert!(matches!(
            CodeChunker::new(ChunkOptions { chunk_size: 0, overlap: 0 }),
            Err(ChunkerError::ZeroChunkSize)
        ));
        assert!(matches!(
            CodeChunker::new(ChunkOptions { chunk_size: 10, overlap: 10 }),
            Err(ChunkerError::OverlapTooLarge { .. })
        ));
    }

    #[test]
    fn test_chunk_text_boundaries_and_ids() {
        let chunker = CodeChunker::new(ChunkOptions::default()).unwrap();
        let chunks = chunker.chunk_text(&numbered_lines(240), PathBuf::from("/r/a.txt"), "a.txt", "unknown");

        let starts: Vec<usize> = chunks.iter().map(|c| c.start_line).collect();
        assert_eq!(starts, vec![0, 80, 160]);
        assert_eq!(chunks[2].end_line, 239);
        assert_eq!(chunks[2].line_count(), 80);
        assert!(chunks[0].text.starts_with("line 0\n"));
        assert!(chunks[0].text.ends_with("line 99"));
        assert_eq!(chunks[1].id(), ChunkId::new("a.txt", 80, 179));
    }

    #[test]
    fn test_chunk_tags_structure() {
        let chunker = CodeChunker::new(ChunkOptions { chunk_size: 3, overlap: 1 }).unwrap();
        let source = "class Store {\n}\nconst x = 1;\nfunction go() {}\n";
        let chunks = chunker.chunk_text(source, PathBuf::from("/r/s.js"), "s.js", "javascript");

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].is_class);
        assert_eq!(chunks[0].symbol.as_deref(), Some("Store"));
        assert!(chunks[1].is_function);
        assert!(!chunks[1].is_class);
    }

    #[test]
    fn test_empty_file_has_no_chunks() {
        let chunker = CodeChunker::new(ChunkOptions::default()).unwrap();
        assert!(chunker
            .chunk_text("", PathBuf::from("/r/e.rs"), "e.rs", "rust")
            .is_empty());
    }
}
