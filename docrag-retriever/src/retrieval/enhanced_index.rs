use super::file_index::{FileIndex, Result, now_seconds};
use crate::error::IndexError;
use docrag_context::TextChunk;
use docrag_embed::cosine_similarity;
use half::f16;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::info;

/// Key in `index_metadata` holding the identifier of the model that produced
/// the stored embeddings.
pub const EMBEDDING_MODEL_KEY: &str = "embedding_model";

/// One chunk with its embedding, ready to be written.
#[derive(Debug, Clone)]
pub struct ChunkEntry {
    pub sequence: usize,
    pub start: usize,
    pub end: usize,
    pub overlap: usize,
    pub content: String,
    pub embedding: Vec<f16>,
}

impl ChunkEntry {
    /// Pairs chunks with their embeddings, in order.
    pub fn zip(chunks: Vec<TextChunk>, embeddings: Vec<Vec<f16>>) -> Result<Vec<Self>> {
        if chunks.len() != embeddings.len() {
            return Err(IndexError::EmbeddingCountMismatch {
                chunks: chunks.len(),
                embeddings: embeddings.len(),
            });
        }
        Ok(chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| Self {
                sequence: chunk.sequence,
                start: chunk.start,
                end: chunk.end,
                overlap: chunk.overlap,
                content: chunk.text,
                embedding,
            })
            .collect())
    }
}

/// The revision of a document a set of chunks was built from.
#[derive(Debug, Clone)]
pub struct DocumentRevision {
    pub content_hash: String,
    pub size: u64,
    pub modified_ms: i64,
}

/// A stored chunk, without its embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredChunk {
    pub id: i64,
    pub sequence: usize,
    pub start: usize,
    pub end: usize,
    pub overlap: usize,
    pub content: String,
    pub document_hash: String,
    pub model_id: String,
}

/// A chunk matched by a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexMatch {
    pub chunk_id: i64,
    pub relative_path: String,
    pub sequence: usize,
    pub start: usize,
    pub end: usize,
    pub content: String,
    pub document_hash: String,
    pub score: f32,
}

/// Totals over the whole index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total_documents: usize,
    pub total_chunks: usize,
    pub total_size_bytes: u64,
}

/// Document records plus their chunks, embeddings and index metadata.
///
/// A document's chunks are only ever written by [`replace_document`], which
/// swaps the whole set and the document's bookkeeping in one transaction, so
/// readers see either the old revision or the new one.
///
/// [`replace_document`]: EnhancedFileIndex::replace_document
#[derive(Clone, Debug)]
pub struct EnhancedFileIndex {
    file_index: FileIndex,
    pool: SqlitePool,
}

impl EnhancedFileIndex {
    pub async fn open(db_path: &Path) -> Result<Self> {
        Self::from_file_index(FileIndex::open(db_path).await?).await
    }

    pub async fn open_memory() -> Result<Self> {
        Self::from_file_index(FileIndex::open_memory().await?).await
    }

    async fn from_file_index(file_index: FileIndex) -> Result<Self> {
        let pool = file_index.pool().clone();
        let index = Self { file_index, pool };
        index.create_metadata_tables().await?;
        Ok(index)
    }

    async fn create_metadata_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS index_metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                sequence INTEGER NOT NULL,
                start_offset INTEGER NOT NULL,
                end_offset INTEGER NOT NULL,
                overlap INTEGER NOT NULL,
                content TEXT NOT NULL,
                document_hash TEXT NOT NULL,
                embedding BLOB NOT NULL,
                model_id TEXT NOT NULL,
                UNIQUE(document_id, sequence)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_model ON chunks(model_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Get the underlying file index
    pub fn file_index(&self) -> &FileIndex {
        &self.file_index
    }

    pub async fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar("SELECT value FROM index_metadata WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    pub async fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO index_metadata (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Makes `model_id` the active model. When a different model was active,
    /// every stored chunk is dropped and every document goes back to
    /// `pending` with no recorded revision. Returns whether that happened.
    pub async fn ensure_model(&self, model_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let current: Option<String> =
            sqlx::query_scalar("SELECT value FROM index_metadata WHERE key = ?1")
                .bind(EMBEDDING_MODEL_KEY)
                .fetch_optional(&mut *tx)
                .await?;

        if current.as_deref() == Some(model_id) {
            return Ok(false);
        }

        let dropped = sqlx::query("DELETE FROM chunks")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        FileIndex::reset_all_pending(&mut *tx).await?;
        sqlx::query(
            "INSERT INTO index_metadata (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(EMBEDDING_MODEL_KEY)
        .bind(model_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        match &current {
            Some(previous) => info!(
                "Embedding model changed from {} to {}, dropped {} chunks",
                previous, model_id, dropped
            ),
            None => info!("Index initialised for embedding model {}", model_id),
        }
        Ok(current.is_some())
    }

    /// Replaces every chunk of document `document_id` with `entries` and
    /// marks the document indexed at `revision`, all in one transaction.
    pub async fn replace_document(
        &self,
        document_id: i64,
        revision: &DocumentRevision,
        entries: &[ChunkEntry],
        model_id: &str,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?1")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for entry in entries {
            let blob: &[u8] = bytemuck::cast_slice(&entry.embedding);
            sqlx::query(
                r#"
                INSERT INTO chunks
                    (document_id, sequence, start_offset, end_offset, overlap, content,
                     document_hash, embedding, model_id)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(document_id)
            .bind(entry.sequence as i64)
            .bind(entry.start as i64)
            .bind(entry.end as i64)
            .bind(entry.overlap as i64)
            .bind(&entry.content)
            .bind(&revision.content_hash)
            .bind(blob)
            .bind(model_id)
            .execute(&mut *tx)
            .await?;
        }

        let now = now_seconds();
        sqlx::query(
            r#"
            UPDATE documents
            SET state = 'indexed', content_hash = ?1, size = ?2, modified_at = ?3,
                error_kind = NULL, error_message = NULL, chunk_count = ?4,
                indexed_at = ?5, updated_at = ?5
            WHERE id = ?6
            "#,
        )
        .bind(&revision.content_hash)
        .bind(revision.size as i64)
        .bind(revision.modified_ms)
        .bind(entries.len() as i64)
        .bind(now)
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Drops the record for `relative_path` together with all its chunks.
    /// Returns whether a record existed.
    pub async fn delete_by_document(&self, relative_path: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE relative_path = ?1")
            .bind(relative_path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// The `top_k` chunks of the active model most similar to `vector`,
    /// ranked by score, then sequence, then chunk id.
    pub async fn query(&self, vector: &[f16], top_k: usize) -> Result<Vec<IndexMatch>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT c.id, d.relative_path, c.sequence, c.start_offset, c.end_offset,
                   c.content, c.document_hash, c.embedding
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE c.model_id = (SELECT value FROM index_metadata WHERE key = ?1)
            "#,
        )
        .bind(EMBEDDING_MODEL_KEY)
        .fetch_all(&self.pool)
        .await?;

        let mut matches = Vec::with_capacity(rows.len());
        for row in rows {
            let blob: Vec<u8> = row.get("embedding");
            if blob.len() % std::mem::size_of::<f16>() != 0 {
                return Err(IndexError::InvalidData(format!(
                    "embedding blob of {} bytes",
                    blob.len()
                )));
            }
            let embedding: Vec<f16> = bytemuck::pod_collect_to_vec(&blob);
            matches.push(IndexMatch {
                chunk_id: row.get("id"),
                relative_path: row.get("relative_path"),
                sequence: row.get::<i64, _>("sequence") as usize,
                start: row.get::<i64, _>("start_offset") as usize,
                end: row.get::<i64, _>("end_offset") as usize,
                content: row.get("content"),
                document_hash: row.get("document_hash"),
                score: cosine_similarity(vector, &embedding),
            });
        }

        matches.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.sequence.cmp(&b.sequence))
                .then(a.chunk_id.cmp(&b.chunk_id))
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    /// Number of stored chunks.
    pub async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    pub async fn get_chunks(&self, document_id: i64) -> Result<Vec<StoredChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, sequence, start_offset, end_offset, overlap, content, document_hash, model_id
            FROM chunks WHERE document_id = ?1 ORDER BY sequence
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| StoredChunk {
                id: row.get("id"),
                sequence: row.get::<i64, _>("sequence") as usize,
                start: row.get::<i64, _>("start_offset") as usize,
                end: row.get::<i64, _>("end_offset") as usize,
                overlap: row.get::<i64, _>("overlap") as usize,
                content: row.get("content"),
                document_hash: row.get("document_hash"),
                model_id: row.get("model_id"),
            })
            .collect())
    }

    pub async fn cache_stats(&self) -> Result<CacheStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM documents) AS documents,
                (SELECT COUNT(*) FROM chunks) AS chunks,
                (SELECT COALESCE(SUM(size), 0) FROM documents) AS size
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(CacheStats {
            total_documents: row.get::<i64, _>("documents") as usize,
            total_chunks: row.get::<i64, _>("chunks") as usize,
            total_size_bytes: row.get::<i64, _>("size") as u64,
        })
    }

    /// Closes the pool, checkpointing the WAL.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// Implement Deref to allow transparent access to FileIndex methods
impl std::ops::Deref for EnhancedFileIndex {
    type Target = FileIndex;

    fn deref(&self) -> &Self::Target {
        &self.file_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::FormatTag;
    use crate::retrieval::document_state::DocumentState;
    use crate::retrieval::file_index::FileStamp;
    use anyhow::Result;
    use docrag_embed::normalize_to_f16;

    const MODEL: &str = "hashing:test-16";
    const STAMP: FileStamp = FileStamp {
        size: 10,
        modified_ms: 1,
    };

    fn entry(sequence: usize, content: &str, direction: &[f32]) -> ChunkEntry {
        ChunkEntry {
            sequence,
            start: sequence * 10,
            end: sequence * 10 + content.chars().count(),
            overlap: 0,
            content: content.to_string(),
            embedding: normalize_to_f16(direction.to_vec()),
        }
    }

    fn revision(hash: &str) -> DocumentRevision {
        DocumentRevision {
            content_hash: hash.to_string(),
            size: 10,
            modified_ms: 1,
        }
    }

    async fn index_with_model() -> Result<EnhancedFileIndex> {
        let index = EnhancedFileIndex::open_memory().await?;
        index.ensure_model(MODEL).await?;
        Ok(index)
    }

    #[tokio::test]
    async fn test_replace_document_swaps_chunks() -> Result<()> {
        let index = index_with_model().await?;
        let id = index.begin_indexing("a.txt", FormatTag::Text, STAMP).await?;

        index
            .replace_document(
                id,
                &revision("h1"),
                &[entry(0, "first", &[1.0, 0.0]), entry(1, "second", &[0.0, 1.0])],
                MODEL,
            )
            .await?;
        assert_eq!(index.count().await?, 2);

        index
            .replace_document(id, &revision("h2"), &[entry(0, "replaced", &[1.0, 0.0])], MODEL)
            .await?;
        let chunks = index.get_chunks(id).await?;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "replaced");
        assert_eq!(chunks[0].document_hash, "h2");

        let doc = index.get_document("a.txt").await?.unwrap();
        assert_eq!(doc.state, DocumentState::Indexed);
        assert_eq!(doc.content_hash.as_deref(), Some("h2"));
        assert_eq!(doc.chunk_count, 1);
        assert!(doc.indexed_at.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_query_ranking() -> Result<()> {
        let index = index_with_model().await?;
        let a = index.begin_indexing("a.txt", FormatTag::Text, STAMP).await?;
        let b = index.begin_indexing("b.txt", FormatTag::Text, STAMP).await?;
        index
            .replace_document(
                a,
                &revision("ha"),
                &[entry(0, "far", &[0.0, 1.0]), entry(1, "tie late", &[1.0, 0.0])],
                MODEL,
            )
            .await?;
        index
            .replace_document(b, &revision("hb"), &[entry(0, "tie early", &[1.0, 0.0])], MODEL)
            .await?;

        let query = normalize_to_f16(vec![1.0, 0.0]);
        let matches = index.query(&query, 10).await?;
        let contents: Vec<&str> = matches.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["tie early", "tie late", "far"]);
        assert!(matches.windows(2).all(|w| w[0].score >= w[1].score));

        assert_eq!(index.query(&query, 1).await?.len(), 1);
        assert!(index.query(&query, 0).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_cascades_to_chunks() -> Result<()> {
        let index = index_with_model().await?;
        let id = index.begin_indexing("gone.txt", FormatTag::Text, STAMP).await?;
        index
            .replace_document(id, &revision("h"), &[entry(0, "bye", &[1.0])], MODEL)
            .await?;

        assert!(index.delete_by_document("gone.txt").await?);
        assert!(!index.delete_by_document("gone.txt").await?);
        assert_eq!(index.count().await?, 0);
        assert!(index.query(&normalize_to_f16(vec![1.0]), 5).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_model_change_resets_documents() -> Result<()> {
        let index = EnhancedFileIndex::open_memory().await?;
        assert!(!index.ensure_model(MODEL).await?);
        assert!(!index.ensure_model(MODEL).await?);

        let id = index.begin_indexing("a.txt", FormatTag::Text, STAMP).await?;
        index
            .replace_document(id, &revision("h"), &[entry(0, "text", &[1.0])], MODEL)
            .await?;

        assert!(index.ensure_model("hashing:other").await?);
        assert_eq!(index.count().await?, 0);
        let doc = index.get_document("a.txt").await?.unwrap();
        assert_eq!(doc.state, DocumentState::Pending);
        assert_eq!(doc.content_hash, None);
        assert_eq!(
            index.get_metadata(EMBEDDING_MODEL_KEY).await?.as_deref(),
            Some("hashing:other")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_cache_stats_and_count_mismatch() -> Result<()> {
        let index = index_with_model().await?;
        let id = index.begin_indexing("a.txt", FormatTag::Text, STAMP).await?;
        index
            .replace_document(id, &revision("h"), &[entry(0, "text", &[1.0])], MODEL)
            .await?;
        let stats = index.cache_stats().await?;
        assert_eq!(
            stats,
            CacheStats {
                total_documents: 1,
                total_chunks: 1,
                total_size_bytes: 10
            }
        );

        let err = ChunkEntry::zip(Vec::new(), vec![normalize_to_f16(vec![1.0])]).unwrap_err();
        assert!(matches!(
            err,
            IndexError::EmbeddingCountMismatch {
                chunks: 0,
                embeddings: 1
            }
        ));
        Ok(())
    }
}
