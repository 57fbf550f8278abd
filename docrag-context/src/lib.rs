pub mod text;

// Re-export the chunker for external use
pub use text::{ChunkerConfig, ChunkerError, TextChunk, TextChunker, normalize_text};
