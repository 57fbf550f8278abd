//! Error types shared by the indexing and retrieval pipeline.
//!
//! Every failure that can end a document's indexing attempt is an
//! [`IndexingError`]; its [`ErrorKind`] is what gets persisted on the document
//! record so that status queries can report why a document failed.

use docrag_embed::EmbedError;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to turn a file into text.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("unsupported format: {0}")]
    Unsupported(String),

    #[error("corrupt {format} document: {message}")]
    Corrupt { format: &'static str, message: String },

    #[error("file is {size} bytes, above the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("extraction task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ExtractionError {
    pub fn corrupt(format: &'static str, message: impl ToString) -> Self {
        Self::Corrupt {
            format,
            message: message.to_string(),
        }
    }
}

/// Failure of the OCR capability. Never fatal for a document: callers log it and
/// continue with empty text.
#[derive(Error, Debug)]
pub enum OcrError {
    #[error("OCR engine unavailable: {0}")]
    Unavailable(String),

    #[error("OCR engine failed: {0}")]
    Failed(String),

    #[error("OCR I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure reading from or writing to the SQLite index.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid stored value: {0}")]
    InvalidData(String),

    #[error("{chunks} chunks but {embeddings} embeddings")]
    EmbeddingCountMismatch { chunks: usize, embeddings: usize },
}

/// Why a query could not be answered. An empty result is not an error.
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("index unavailable: {0}")]
    IndexUnavailable(#[from] IndexError),

    #[error("embedder unavailable: {0}")]
    Embedding(#[from] EmbedError),
}

/// Failure while indexing a single document.
#[derive(Error, Debug)]
pub enum IndexingError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedError),

    #[error("index write failed: {0}")]
    IndexWrite(#[from] IndexError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl IndexingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IndexingError::Extraction(_) => ErrorKind::Extraction,
            IndexingError::Embedding(_) => ErrorKind::Embedding,
            IndexingError::IndexWrite(_) => ErrorKind::IndexWrite,
            IndexingError::Io { .. } => ErrorKind::Io,
        }
    }
}

/// Persisted classification of a document failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Extraction,
    Embedding,
    IndexWrite,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Extraction => "extraction",
            ErrorKind::Embedding => "embedding",
            ErrorKind::IndexWrite => "index_write",
            ErrorKind::Io => "io",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extraction" => Ok(ErrorKind::Extraction),
            "embedding" => Ok(ErrorKind::Embedding),
            "index_write" => Ok(ErrorKind::IndexWrite),
            "io" => Ok(ErrorKind::Io),
            other => Err(format!("unknown error kind: {other}")),
        }
    }
}

/// Invalid or unreadable configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid chunking config: {0}")]
    Chunking(#[from] docrag_context::ChunkerError),

    #[error("invalid embedding config: {0}")]
    Embedding(#[from] EmbedError),

    #[error("invalid config: {0}")]
    Invalid(String),
}
