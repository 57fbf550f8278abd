use std::collections::BTreeMap;
use std::path::Path;

use crate::error::IndexError;
use crate::extract::DocumentCategory;
use crate::retrieval::{enhanced_index::EnhancedFileIndex, indexing_engine::IndexingEngine};

use super::types::*;

/// Main status API implementation
pub struct StatusApi;

impl StatusApi {
    /// Document counts, chunk total, queue size and failures
    pub async fn get_index_status(engine: &IndexingEngine) -> Result<IndexStatus, IndexError> {
        engine.get_status().await
    }

    /// Indexed documents grouped by category. Categories come in a fixed
    /// order and empty ones are left out; documents within a category are
    /// sorted by path.
    pub async fn list_documents(
        index: &EnhancedFileIndex,
    ) -> Result<Vec<CategoryGroup>, IndexError> {
        let mut groups: BTreeMap<DocumentCategory, Vec<DocumentListing>> = BTreeMap::new();
        for doc in index.list_documents().await? {
            if !doc.state.is_current() {
                continue;
            }
            groups
                .entry(doc.format.category())
                .or_default()
                .push(DocumentListing {
                    size: format_file_size(doc.size),
                    path: doc.relative_path,
                    format: doc.format,
                    size_bytes: doc.size,
                    state: doc.state,
                    chunk_count: doc.chunk_count,
                    indexed_at: doc.indexed_at,
                });
        }

        Ok(groups
            .into_iter()
            .map(|(category, mut documents)| {
                documents.sort_by(|a, b| a.path.cmp(&b.path));
                CategoryGroup {
                    category,
                    documents,
                }
            })
            .collect())
    }

    pub async fn cache_stats(index: &EnhancedFileIndex) -> Result<CacheStats, IndexError> {
        index.cache_stats().await
    }

    /// Get database information and statistics
    pub async fn get_database_info(
        index: &EnhancedFileIndex,
        database_path: &Path,
    ) -> Result<DatabaseInfo, IndexError> {
        let sqlite_version: Option<String> = sqlx::query_scalar("SELECT sqlite_version()")
            .fetch_optional(index.pool())
            .await?;
        let journal_mode: Option<String> = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_optional(index.pool())
            .await?;
        let page_size: Option<i64> = sqlx::query_scalar("PRAGMA page_size")
            .fetch_optional(index.pool())
            .await?;

        let file_size_bytes = tokio::fs::metadata(database_path)
            .await
            .ok()
            .map(|meta| meta.len());

        Ok(DatabaseInfo {
            database_type: "SQLite".to_string(),
            database_path: database_path.display().to_string(),
            file_size_bytes,
            sqlite_version,
            journal_mode,
            page_size,
        })
    }
}
