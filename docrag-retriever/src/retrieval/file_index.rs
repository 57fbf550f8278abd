//! Document records in SQLite.
//!
//! The `documents` table holds one row per watched file, keyed by its path
//! relative to the watched root:
//!
//! ```sql
//! CREATE TABLE documents (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     relative_path TEXT UNIQUE NOT NULL,  -- '/'-separated, relative to the root
//!     format TEXT NOT NULL,                -- FormatTag
//!     content_hash TEXT,                   -- blake3 hex of the last indexed revision
//!     size INTEGER NOT NULL,
//!     modified_at INTEGER NOT NULL,        -- mtime, unix milliseconds
//!     state TEXT NOT NULL,                 -- pending | indexing | indexed | failed
//!     error_kind TEXT,
//!     error_message TEXT,
//!     chunk_count INTEGER NOT NULL DEFAULT 0,
//!     indexed_at INTEGER,                  -- unix seconds of the last success
//!     updated_at INTEGER NOT NULL
//! );
//! ```
//!
//! Chunks and metadata live in [`EnhancedFileIndex`](super::enhanced_index::EnhancedFileIndex),
//! which wraps this type and shares its pool.

use super::document_state::DocumentState;
use crate::error::{ErrorKind, IndexError};
use crate::extract::FormatTag;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::{Component, Path};

pub type Result<T> = std::result::Result<T, IndexError>;

/// Key of the document at `path` under `root`: its relative path with `/`
/// separators. `None` for paths outside the root or not valid UTF-8.
pub fn document_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            _ => return None,
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}

pub(crate) fn now_seconds() -> i64 {
    Utc::now().timestamp()
}

/// A document row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentRecord {
    pub id: i64,
    pub relative_path: String,
    pub format: FormatTag,
    /// Hash of the revision the stored chunks were built from.
    pub content_hash: Option<String>,
    pub size: u64,
    pub modified_ms: i64,
    pub state: DocumentState,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub chunk_count: usize,
    pub indexed_at: Option<DateTime<Utc>>,
}

impl DocumentRecord {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        let format: String = row.get("format");
        let state: String = row.get("state");
        let error_kind: Option<String> = row.get("error_kind");
        let indexed_at: Option<i64> = row.get("indexed_at");
        Ok(Self {
            id: row.get("id"),
            relative_path: row.get("relative_path"),
            format: format.parse().map_err(IndexError::InvalidData)?,
            content_hash: row.get("content_hash"),
            size: row.get::<i64, _>("size") as u64,
            modified_ms: row.get("modified_at"),
            state: state.parse().map_err(IndexError::InvalidData)?,
            error_kind: error_kind
                .map(|kind| kind.parse())
                .transpose()
                .map_err(IndexError::InvalidData)?,
            error_message: row.get("error_message"),
            chunk_count: row.get::<i64, _>("chunk_count") as usize,
            indexed_at: indexed_at.and_then(|secs| DateTime::from_timestamp(secs, 0)),
        })
    }
}

/// Size and modification time observed on disk for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub size: u64,
    pub modified_ms: i64,
}

/// Number of documents per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub pending: usize,
    pub indexing: usize,
    pub indexed: usize,
    pub failed: usize,
}

impl StateCounts {
    pub fn total(&self) -> usize {
        self.pending + self.indexing + self.indexed + self.failed
    }
}

const DOCUMENT_COLUMNS: &str = "id, relative_path, format, content_hash, size, modified_at, state, \
     error_kind, error_message, chunk_count, indexed_at";

/// SQLite store of document records.
#[derive(Clone, Debug)]
pub struct FileIndex {
    pool: SqlitePool,
}

impl FileIndex {
    /// Opens (creating if needed) the index database at `db_path`.
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
                .create_if_missing(true)
                .auto_vacuum(sqlx::sqlite::SqliteAutoVacuum::Full)
                .page_size(1 << 16)
                .optimize_on_close(true, 1 << 10),
        )
        .await?;
        Self::new_with_pool(pool).await
    }

    /// In-memory database for tests. A single connection, since every
    /// connection to `:memory:` would otherwise see its own empty database.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(
                SqliteConnectOptions::new()
                    .in_memory(true)
                    .foreign_keys(true),
            )
            .await?;
        Self::new_with_pool(pool).await
    }

    async fn new_with_pool(pool: SqlitePool) -> Result<Self> {
        Self::create_tables(&pool).await?;
        Ok(Self { pool })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                relative_path TEXT UNIQUE NOT NULL,
                format TEXT NOT NULL,
                content_hash TEXT,
                size INTEGER NOT NULL,
                modified_at INTEGER NOT NULL,
                state TEXT NOT NULL DEFAULT 'pending',
                error_kind TEXT,
                error_message TEXT,
                chunk_count INTEGER NOT NULL DEFAULT 0,
                indexed_at INTEGER,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_state ON documents(state)")
            .execute(pool)
            .await?;

        Ok(())
    }

    pub async fn get_document(&self, relative_path: &str) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE relative_path = ?1"
        ))
        .bind(relative_path)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(DocumentRecord::from_row).transpose()
    }

    /// Records that a worker started on `relative_path`, creating the record
    /// if needed. The stored hash and chunks are left alone until the new
    /// revision commits. Returns the document id.
    pub async fn begin_indexing(
        &self,
        relative_path: &str,
        format: FormatTag,
        stamp: FileStamp,
    ) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO documents (relative_path, format, size, modified_at, state, updated_at)
            VALUES (?1, ?2, ?3, ?4, 'indexing', ?5)
            ON CONFLICT(relative_path) DO UPDATE SET
                format = excluded.format,
                size = excluded.size,
                modified_at = excluded.modified_at,
                state = 'indexing',
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(relative_path)
        .bind(format.as_str())
        .bind(stamp.size as i64)
        .bind(stamp.modified_ms)
        .bind(now_seconds())
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Updates size and mtime of an indexed document whose bytes did not change.
    pub async fn touch_unchanged(&self, relative_path: &str, stamp: FileStamp) -> Result<()> {
        sqlx::query(
            "UPDATE documents SET size = ?1, modified_at = ?2, updated_at = ?3 WHERE relative_path = ?4",
        )
        .bind(stamp.size as i64)
        .bind(stamp.modified_ms)
        .bind(now_seconds())
        .bind(relative_path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_pending(&self, relative_path: &str) -> Result<()> {
        self.set_state(relative_path, DocumentState::Pending).await
    }

    async fn set_state(&self, relative_path: &str, state: DocumentState) -> Result<()> {
        sqlx::query("UPDATE documents SET state = ?1, updated_at = ?2 WHERE relative_path = ?3")
            .bind(state.as_str())
            .bind(now_seconds())
            .bind(relative_path)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Records a failed attempt. Chunks of the previous revision stay in place.
    pub async fn mark_failed(
        &self,
        relative_path: &str,
        kind: ErrorKind,
        message: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE documents
            SET state = 'failed', error_kind = ?1, error_message = ?2, updated_at = ?3
            WHERE relative_path = ?4
            "#,
        )
        .bind(kind.as_str())
        .bind(message)
        .bind(now_seconds())
        .bind(relative_path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Records a failure for a file that never got a record, such as one
    /// rejected for its size before being read.
    pub async fn record_failure(
        &self,
        relative_path: &str,
        format: FormatTag,
        stamp: FileStamp,
        kind: ErrorKind,
        message: &str,
    ) -> Result<()> {
        self.begin_indexing(relative_path, format, stamp).await?;
        self.mark_failed(relative_path, kind, message).await
    }

    /// Every document back to `pending` with no recorded revision, so the
    /// next pass re-indexes everything.
    /// Takes any executor so it can run inside a caller's transaction.
    pub async fn reset_all_pending<'e, E>(executor: E) -> Result<u64>
    where
        E: sqlx::SqliteExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE documents SET state = 'pending', content_hash = NULL, chunk_count = 0, updated_at = ?1",
        )
        .bind(now_seconds())
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// All documents ordered by path.
    pub async fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY relative_path"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(DocumentRecord::from_row).collect()
    }

    pub async fn failed_documents(&self) -> Result<Vec<DocumentRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE state = 'failed' ORDER BY relative_path"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(DocumentRecord::from_row).collect()
    }

    pub async fn state_counts(&self) -> Result<StateCounts> {
        let rows = sqlx::query("SELECT state, COUNT(*) AS n FROM documents GROUP BY state")
            .fetch_all(&self.pool)
            .await?;
        let mut counts = StateCounts::default();
        for row in rows {
            let state: String = row.get("state");
            let n = row.get::<i64, _>("n") as usize;
            match state.parse().map_err(IndexError::InvalidData)? {
                DocumentState::Pending => counts.pending = n,
                DocumentState::Indexing => counts.indexing = n,
                DocumentState::Indexed => counts.indexed = n,
                DocumentState::Failed => counts.failed = n,
            }
        }
        Ok(counts)
    }

    /// Time of the most recent successful index of any document.
    pub async fn last_indexed_at(&self) -> Result<Option<DateTime<Utc>>> {
        let secs: Option<i64> = sqlx::query_scalar("SELECT MAX(indexed_at) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(secs.and_then(|secs| DateTime::from_timestamp(secs, 0)))
    }

    /// Get the underlying SQLite connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
