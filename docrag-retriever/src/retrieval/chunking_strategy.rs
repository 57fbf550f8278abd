use crate::extract::FormatTag;
use docrag_context::{ChunkerConfig, ChunkerError, TextChunk, TextChunker, normalize_text};
use std::path::{Component, Path};

/// Which files are documents, and how their extracted text is split.
#[derive(Debug, Clone, Copy)]
pub struct ChunkingStrategy {
    chunker: TextChunker,
}

impl ChunkingStrategy {
    pub fn new(config: ChunkerConfig) -> Result<Self, ChunkerError> {
        Ok(Self {
            chunker: TextChunker::new(config)?,
        })
    }

    /// Normalizes and chunks the text extracted from `file_path`.
    pub fn chunk_content(&self, file_path: &Path, content: &str) -> Vec<TextChunk> {
        let chunks = self.chunker.chunk(&normalize_text(content));

        tracing::debug!(
            "Chunked {} into {} chunks (chunk size: {})",
            file_path.display(),
            chunks.len(),
            self.chunker.config().chunk_size
        );

        chunks
    }
}

/// Whether any component of `relative` is a dotfile or dot-directory.
pub fn is_hidden(relative: &Path) -> bool {
    relative.components().any(|component| match component {
        Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

/// Whether a path (relative to the watched root) is a candidate document:
/// nothing along it is hidden, and it either has a supported extension or
/// no extension at all, in which case the content decides.
pub fn should_index_file(relative: &Path) -> bool {
    if is_hidden(relative) {
        return false;
    }

    match relative.extension() {
        Some(_) => FormatTag::from_path(relative).is_some(),
        None => relative.file_name().is_some(),
    }
}
