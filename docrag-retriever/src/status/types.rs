use crate::error::ErrorKind;
use crate::extract::{DocumentCategory, FormatTag};
use crate::retrieval::document_state::DocumentState;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub use crate::retrieval::enhanced_index::CacheStats;

/// Index status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    /// Documents with a record, in any state
    pub total_documents: usize,
    pub indexed_documents: usize,
    /// Documents waiting for, or in the middle of, an indexing attempt
    pub pending_documents: usize,
    pub failed_documents: usize,
    pub total_chunks: usize,
    /// Paths waiting in the indexing queue
    pub queue_size: usize,
    /// Most recent successful index of any document
    pub last_updated: Option<DateTime<Utc>>,
    /// Identifier of the model the stored embeddings belong to
    pub embedding_model: Option<String>,
    pub failures: Vec<FailedDocument>,
}

/// A document whose last indexing attempt failed
#[derive(Debug, Clone, Serialize)]
pub struct FailedDocument {
    pub path: String,
    pub format: FormatTag,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
}

/// One document in a listing
#[derive(Debug, Clone, Serialize)]
pub struct DocumentListing {
    pub path: String,
    pub format: FormatTag,
    pub size_bytes: u64,
    /// `size_bytes` rendered with [`format_file_size`]
    pub size: String,
    pub state: DocumentState,
    pub chunk_count: usize,
    pub indexed_at: Option<DateTime<Utc>>,
}

/// Documents of one category, sorted by path
#[derive(Debug, Clone, Serialize)]
pub struct CategoryGroup {
    pub category: DocumentCategory,
    pub documents: Vec<DocumentListing>,
}

/// SQLite details of the index database
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseInfo {
    pub database_type: String,
    pub database_path: String,
    pub file_size_bytes: Option<u64>,
    pub sqlite_version: Option<String>,
    pub journal_mode: Option<String>,
    pub page_size: Option<i64>,
}

/// Human-readable size: `B`, `KB`, `MB`, `GB` or `TB` with one decimal
/// (bytes are shown whole).
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}
