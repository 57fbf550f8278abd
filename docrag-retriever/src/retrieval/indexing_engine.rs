//! Incremental indexing pipeline.
//!
//! The engine turns change events into queued tasks and works the queue in
//! bounded batches:
//!
//! ```text
//! ChangeDetector → TaskQueue → ExtractorRegistry → ChunkingStrategy → Embedder
//!                                                                       ↓
//!                                           EnhancedFileIndex::replace_document
//! ```
//!
//! Every attempt on a document runs under that document's lock, so two events
//! for one file never commit twice while different files proceed in parallel.
//! A document whose bytes match its last indexed revision is not re-extracted
//! unless the task is forced. Just before committing, the file is hashed again;
//! if it changed meanwhile the work is discarded and the document re-queued.

use super::chunking_strategy::ChunkingStrategy;
use super::directory_watcher::{
    ChangeDetector, ChangeEvent, ChangeKind, Fingerprint, content_hash, file_stamp,
};
use super::document_locks::DocumentLocks;
use super::document_state::DocumentState;
use super::enhanced_index::{ChunkEntry, DocumentRevision, EMBEDDING_MODEL_KEY, EnhancedFileIndex};
use super::file_index::{FileStamp, document_key};
use super::task_queue::{IndexingTask, TaskQueue, TaskType};
use crate::config::IndexingConfig;
use crate::error::{ErrorKind, ExtractionError, IndexError, IndexingError};
use crate::extract::FormatTag;
use crate::extract::registry::ExtractorRegistry;
use crate::status::types::{FailedDocument, IndexStatus};
use docrag_embed::EmbedderHandle;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::{RwLock, mpsc, watch};
use tracing::{debug, error, info, warn};

const SNIFF_BYTES: usize = 8 * 1024;

/// Session counters, reset when the process starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexingStats {
    pub documents_indexed: usize,
    pub documents_unchanged: usize,
    pub documents_failed: usize,
    pub documents_removed: usize,
    pub chunks_written: usize,
    pub stale_discarded: usize,
}

/// What an indexing task did to its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    Indexed { chunks: usize },
    /// Bytes match the indexed revision
    Unchanged,
    /// Not a document (unsupported content, or not a regular file)
    Skipped,
    Removed,
    Failed(ErrorKind),
    /// The file changed while it was being indexed
    Requeued,
}

/// What is known about a file partway through an attempt, so a failure can
/// still be recorded.
#[derive(Debug, Default)]
struct Attempt {
    stamp: Option<FileStamp>,
    format: Option<FormatTag>,
    hash: Option<String>,
}

/// Orchestrates change detection, extraction, chunking, embedding and storage.
pub struct IndexingEngine {
    index: EnhancedFileIndex,
    registry: ExtractorRegistry,
    chunking: ChunkingStrategy,
    embedder: EmbedderHandle,
    model_id: String,
    detector: Arc<ChangeDetector>,
    queue: TaskQueue,
    locks: DocumentLocks,
    config: IndexingConfig,
    stats: RwLock<IndexingStats>,
}

impl IndexingEngine {
    pub fn new(
        index: EnhancedFileIndex,
        registry: ExtractorRegistry,
        chunking: ChunkingStrategy,
        embedder: EmbedderHandle,
        detector: Arc<ChangeDetector>,
        config: IndexingConfig,
    ) -> Self {
        let model_id = embedder.model_id();
        Self {
            index,
            registry,
            chunking,
            embedder,
            model_id,
            detector,
            queue: TaskQueue::new(),
            locks: DocumentLocks::new(),
            config,
            stats: RwLock::new(IndexingStats::default()),
        }
    }

    pub fn index(&self) -> &EnhancedFileIndex {
        &self.index
    }

    pub fn detector(&self) -> &Arc<ChangeDetector> {
        &self.detector
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Activates the embedder's model in the index and seeds the change
    /// detector from the stored records. Documents that are not `indexed`
    /// get a fingerprint that never matches, so the next reconcile retries
    /// them (or reports them deleted). Returns whether the model changed.
    pub async fn initialize(&self) -> Result<bool, IndexError> {
        let model_changed = self.index.ensure_model(&self.model_id).await?;

        let documents = self.index.list_documents().await?;
        let seeded = documents.into_iter().map(|doc| {
            let fingerprint = match (&doc.state, doc.content_hash) {
                (DocumentState::Indexed, Some(hash)) => Fingerprint {
                    stamp: FileStamp {
                        size: doc.size,
                        modified_ms: doc.modified_ms,
                    },
                    hash,
                },
                _ => Fingerprint {
                    stamp: FileStamp {
                        size: u64::MAX,
                        modified_ms: i64::MIN,
                    },
                    hash: String::new(),
                },
            };
            (doc.relative_path, fingerprint)
        });
        self.detector.seed(seeded).await;

        info!(
            "Indexing engine ready for {} with model {}",
            self.detector.root().display(),
            self.model_id
        );
        Ok(model_changed)
    }

    /// Queues the task matching a change event.
    pub async fn schedule(&self, event: ChangeEvent) {
        self.queue.submit(task_for(event, false)).await;
    }

    /// Incremental pass: queues every difference between the tree and the
    /// last-known state. Returns the number of queued tasks.
    pub async fn reconcile(&self) -> Result<usize, IndexingError> {
        let events = self
            .detector
            .reconcile()
            .await
            .map_err(|source| IndexingError::Io {
                path: self.detector.root().to_path_buf(),
                source,
            })?;
        let count = events.len();
        self.queue
            .submit_all(events.into_iter().map(|event| task_for(event, true)))
            .await;
        Ok(count)
    }

    /// Queues a forced re-index of every candidate file and the removal of
    /// every record whose file is gone. Returns the number of queued tasks.
    pub async fn trigger_full_reindex(&self) -> Result<usize, IndexingError> {
        let listing = self
            .detector
            .scan_directory()
            .await
            .map_err(|source| IndexingError::Io {
                path: self.detector.root().to_path_buf(),
                source,
            })?;

        let present: HashSet<&str> = listing.iter().map(|(_, rel, _)| rel.as_str()).collect();
        let mut vanished: Vec<String> = self
            .index
            .list_documents()
            .await?
            .into_iter()
            .map(|doc| doc.relative_path)
            .filter(|rel| !present.contains(rel.as_str()))
            .collect();
        vanished.extend(
            self.detector
                .known_paths()
                .await
                .into_iter()
                .filter(|rel| !present.contains(rel.as_str())),
        );
        vanished.sort();
        vanished.dedup();

        let tasks: Vec<IndexingTask> = listing
            .iter()
            .map(|(path, _, _)| IndexingTask::force_index(path.clone()))
            .chain(
                vanished
                    .iter()
                    .map(|rel| IndexingTask::remove_file(self.detector.absolute(rel))),
            )
            .collect();
        let count = tasks.len();
        info!(
            "Full reindex queued {} documents and {} removals",
            listing.len(),
            vanished.len()
        );
        self.queue.submit_all(tasks).await;
        Ok(count)
    }

    /// Processes one batch from the queue. Returns how many tasks it took.
    pub async fn process_pending_tasks(&self) -> usize {
        let batch = self.queue.pop_batch(self.config.batch_size).await;
        let taken = batch.len();
        if taken == 0 {
            return 0;
        }
        debug!("Processing batch of {} tasks", taken);

        stream::iter(batch)
            .for_each_concurrent(self.config.max_workers, |task| async move {
                self.process_task(task).await;
            })
            .await;
        taken
    }

    /// Processes batches until the queue is empty.
    pub async fn drain(&self) -> usize {
        let mut total = 0;
        loop {
            let taken = self.process_pending_tasks().await;
            if taken == 0 {
                return total;
            }
            total += taken;
        }
    }

    async fn process_task(&self, task: IndexingTask) {
        debug!("{}", task.description());
        let result = match task.task_type {
            TaskType::IndexFile { path, force } => {
                self.index_document(&path, force).await.map(|_| ())
            }
            // A document recreated after its removal was queued is indexed instead.
            TaskType::RemoveFile { path } if self.detector.is_candidate(&path).await => {
                self.index_document(&path, false).await.map(|_| ())
            }
            TaskType::RemoveFile { path } => self.remove_document(&path).await.map(|_| ()),
        };
        if let Err(e) = result {
            error!("Index bookkeeping failed: {}", e);
        }
    }

    /// Brings the index up to date with the file at `path`.
    ///
    /// Per-document failures are recorded on the document and reported as
    /// [`IndexOutcome::Failed`]; an `Err` means the failure itself could not
    /// be recorded.
    pub async fn index_document(&self, path: &Path, force: bool) -> Result<IndexOutcome, IndexError> {
        let Some(relative) = document_key(self.detector.root(), path) else {
            warn!("Ignoring {} outside {}", path.display(), self.detector.root().display());
            return Ok(IndexOutcome::Skipped);
        };
        let _guard = self.locks.lock(&relative).await;

        let mut attempt = Attempt::default();
        match self.try_index(path, &relative, force, &mut attempt).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => self.record_failure(&relative, attempt, error).await,
        }
    }

    async fn try_index(
        &self,
        path: &Path,
        relative: &str,
        force: bool,
        attempt: &mut Attempt,
    ) -> Result<IndexOutcome, IndexingError> {
        let io_error = |source| IndexingError::Io {
            path: path.to_path_buf(),
            source,
        };

        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(self.remove_locked(relative).await?);
            }
            Err(e) => return Err(io_error(e)),
        };
        if !meta.is_file() {
            return Ok(IndexOutcome::Skipped);
        }

        let stamp = file_stamp(&meta);
        attempt.stamp = Some(stamp);
        attempt.format = FormatTag::from_path(path);
        let limit = self.registry.max_file_bytes();
        if stamp.size > limit {
            if attempt.format.is_none() {
                attempt.format = Some(sniff_head(path).await);
            }
            return Err(ExtractionError::TooLarge {
                size: stamp.size,
                limit,
            }
            .into());
        }

        let bytes = tokio::fs::read(path).await.map_err(io_error)?;
        let (bytes, hash) = hash_owned(bytes).await?;
        attempt.hash = Some(hash.clone());

        let Some(format) = FormatTag::detect(path, &bytes) else {
            debug!("{} is not a supported document", relative);
            if self.index.delete_by_document(relative).await? {
                info!("{} is no longer a supported document, removed", relative);
            }
            self.detector
                .record(relative, Fingerprint { stamp, hash })
                .await;
            return Ok(IndexOutcome::Skipped);
        };
        attempt.format = Some(format);

        let existing = self.index.get_document(relative).await?;
        if !force {
            if let Some(doc) = &existing {
                if doc.state.is_current() && doc.content_hash.as_deref() == Some(hash.as_str()) {
                    debug!("{} unchanged, skipping", relative);
                    self.index.touch_unchanged(relative, stamp).await?;
                    self.detector
                        .record(relative, Fingerprint { stamp, hash })
                        .await;
                    self.stats.write().await.documents_unchanged += 1;
                    return Ok(IndexOutcome::Unchanged);
                }
            }
        }

        let document_id = self.index.begin_indexing(relative, format, stamp).await?;
        debug!("Indexing {} as {}", relative, format);

        let text = self
            .registry
            .extract(path.to_path_buf(), bytes, format)
            .await?;
        let chunks = self.chunking.chunk_content(path, &text);
        let embeddings = if chunks.is_empty() {
            Vec::new()
        } else {
            let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
            self.embedder.embed_texts(&texts).await?.embeddings
        };
        let entries = ChunkEntry::zip(chunks, embeddings)?;

        // Discard the work if the file moved on while we were busy.
        let current = match tokio::fs::read(path).await {
            Ok(current) => Some(hash_owned(current).await?.1),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(io_error(e)),
        };
        if current.as_deref() != Some(hash.as_str()) {
            info!("{} changed during indexing, re-queued", relative);
            self.index.mark_pending(relative).await?;
            let task = if force {
                IndexingTask::force_index(path.to_path_buf())
            } else {
                IndexingTask::index_file(path.to_path_buf())
            };
            self.queue.submit(task).await;
            self.stats.write().await.stale_discarded += 1;
            return Ok(IndexOutcome::Requeued);
        }

        let revision = DocumentRevision {
            content_hash: hash.clone(),
            size: stamp.size,
            modified_ms: stamp.modified_ms,
        };
        self.index
            .replace_document(document_id, &revision, &entries, &self.model_id)
            .await?;
        self.detector
            .record(relative, Fingerprint { stamp, hash })
            .await;

        let chunks = entries.len();
        {
            let mut stats = self.stats.write().await;
            stats.documents_indexed += 1;
            stats.chunks_written += chunks;
        }
        info!("Indexed {} ({} chunks)", relative, chunks);
        Ok(IndexOutcome::Indexed { chunks })
    }

    async fn record_failure(
        &self,
        relative: &str,
        attempt: Attempt,
        error: IndexingError,
    ) -> Result<IndexOutcome, IndexError> {
        let kind = error.kind();
        let message = error.to_string();
        warn!("Failed to index {} [{}]: {}", relative, kind, message);

        if self.index.get_document(relative).await?.is_some() {
            self.index.mark_failed(relative, kind, &message).await?;
        } else if let (Some(format), Some(stamp)) = (attempt.format, attempt.stamp) {
            self.index
                .record_failure(relative, format, stamp, kind, &message)
                .await?;
        }

        // Remember the failing revision so the periodic reconcile leaves it
        // alone until the file changes again.
        if let Some(stamp) = attempt.stamp {
            let hash = attempt.hash.unwrap_or_default();
            self.detector
                .record(relative, Fingerprint { stamp, hash })
                .await;
        }

        self.stats.write().await.documents_failed += 1;
        Ok(IndexOutcome::Failed(kind))
    }

    /// Drops the document at `path` and all its chunks.
    pub async fn remove_document(&self, path: &Path) -> Result<IndexOutcome, IndexError> {
        let Some(relative) = document_key(self.detector.root(), path) else {
            return Ok(IndexOutcome::Skipped);
        };
        let _guard = self.locks.lock(&relative).await;
        self.remove_locked(&relative).await
    }

    async fn remove_locked(&self, relative: &str) -> Result<IndexOutcome, IndexError> {
        let existed = self.index.delete_by_document(relative).await?;
        self.detector.forget(relative).await;
        if existed {
            info!("Removed {} from the index", relative);
            self.stats.write().await.documents_removed += 1;
        }
        Ok(IndexOutcome::Removed)
    }

    pub async fn get_status(&self) -> Result<IndexStatus, IndexError> {
        let counts = self.index.state_counts().await?;
        let failures = self
            .index
            .failed_documents()
            .await?
            .into_iter()
            .map(|doc| FailedDocument {
                path: doc.relative_path,
                format: doc.format,
                error_kind: doc.error_kind,
                error_message: doc.error_message,
            })
            .collect();

        Ok(IndexStatus {
            total_documents: counts.total(),
            indexed_documents: counts.indexed,
            pending_documents: counts.pending + counts.indexing,
            failed_documents: counts.failed,
            total_chunks: self.index.count().await?,
            queue_size: self.queue.len().await,
            last_updated: self.index.last_indexed_at().await?,
            embedding_model: self.index.get_metadata(EMBEDDING_MODEL_KEY).await?,
            failures,
        })
    }

    pub async fn stats(&self) -> IndexingStats {
        self.stats.read().await.clone()
    }

    /// Background loop: schedules incoming change events and works the queue
    /// until `shutdown` turns true (or its sender goes away).
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<ChangeEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Indexing loop started");
        let mut events_open = true;
        'outer: loop {
            while self.process_pending_tasks().await > 0 {
                if *shutdown.borrow() {
                    break 'outer;
                }
                while let Ok(event) = events.try_recv() {
                    self.schedule(event).await;
                }
            }
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = events.recv(), if events_open => match event {
                    Some(event) => self.schedule(event).await,
                    None => {
                        debug!("Change event channel closed");
                        events_open = false;
                    }
                },
                _ = self.queue.notified() => {}
            }
        }
        info!("Indexing loop stopped");
    }
}

/// Index task for a change event. Reconcile-discovered work runs at
/// background priority.
fn task_for(event: ChangeEvent, from_reconcile: bool) -> IndexingTask {
    match event.kind {
        ChangeKind::Deleted => IndexingTask::remove_file(event.path),
        ChangeKind::Created | ChangeKind::Modified if from_reconcile => {
            IndexingTask::index_file_background(event.path)
        }
        ChangeKind::Created | ChangeKind::Modified => IndexingTask::index_file(event.path),
    }
}

/// Format of a file too large to read whole, judged from its first bytes.
/// Falls back to text so the failure can still be recorded.
async fn sniff_head(path: &Path) -> FormatTag {
    let mut head = Vec::with_capacity(SNIFF_BYTES);
    if let Ok(file) = tokio::fs::File::open(path).await {
        if let Err(e) = file.take(SNIFF_BYTES as u64).read_to_end(&mut head).await {
            debug!("Cannot read the head of {}: {}", path.display(), e);
        }
    }
    FormatTag::sniff(&head).unwrap_or(FormatTag::Text)
}

async fn hash_owned(bytes: Vec<u8>) -> Result<(Vec<u8>, String), ExtractionError> {
    tokio::task::spawn_blocking(move || {
        let hash = content_hash(&bytes);
        (bytes, hash)
    })
    .await
    .map_err(ExtractionError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractionConfig;
    use crate::extract::Extractor;
    use crate::extract::pdf::tests::minimal_pdf_with_phrase;
    use anyhow::Result;
    use docrag_context::ChunkerConfig;
    use docrag_embed::HashingProvider;
    use std::path::PathBuf;
    use tempfile::{TempDir, tempdir};
    use tracing_test::traced_test;

    async fn engine_with(
        dir: &TempDir,
        config: IndexingConfig,
        extra: Option<Arc<dyn Extractor>>,
    ) -> Result<Arc<IndexingEngine>> {
        let index = EnhancedFileIndex::open_memory().await?;
        let mut registry =
            ExtractorRegistry::with_defaults(&ExtractionConfig::default(), config.max_file_bytes);
        if let Some(extractor) = extra {
            registry.register(extractor);
        }
        let engine = IndexingEngine::new(
            index,
            registry,
            ChunkingStrategy::new(ChunkerConfig::default())?,
            Arc::new(HashingProvider::new(64)),
            Arc::new(ChangeDetector::new(dir.path())?),
            config,
        );
        engine.initialize().await?;
        Ok(Arc::new(engine))
    }

    async fn engine_in(dir: &TempDir) -> Result<Arc<IndexingEngine>> {
        engine_with(dir, IndexingConfig::default(), None).await
    }

    /// Saves a newer revision over any markdown file that asks for it,
    /// as an editor would while the older one is being indexed.
    struct SavesOver;

    impl Extractor for SavesOver {
        fn name(&self) -> &'static str {
            "saves-over"
        }

        fn can_handle(&self, format: FormatTag) -> bool {
            format == FormatTag::Markdown
        }

        fn extract(&self, path: &Path, bytes: &[u8]) -> Result<String, ExtractionError> {
            let text = String::from_utf8_lossy(bytes).into_owned();
            if text.contains("[draft]") {
                std::fs::write(path, "# Final\n\nBergen is on the west coast.").map_err(
                    |source| ExtractionError::Io {
                        path: path.to_path_buf(),
                        source,
                    },
                )?;
            }
            Ok(text)
        }
    }

    fn path_in(engine: &IndexingEngine, name: &str) -> PathBuf {
        engine.detector().root().join(name)
    }

    #[tokio::test]
    async fn test_index_then_unchanged_then_forced() -> Result<()> {
        let dir = tempdir()?;
        let engine = engine_in(&dir).await?;
        let file = path_in(&engine, "a.txt");
        std::fs::write(&file, "Paris is the capital of France.")?;

        assert_eq!(
            engine.index_document(&file, false).await?,
            IndexOutcome::Indexed { chunks: 1 }
        );
        let doc = engine.index().get_document("a.txt").await?.unwrap();
        let first = engine.index().get_chunks(doc.id).await?;

        assert_eq!(engine.index_document(&file, false).await?, IndexOutcome::Unchanged);
        assert_eq!(engine.index().get_chunks(doc.id).await?, first);

        assert_eq!(
            engine.index_document(&file, true).await?,
            IndexOutcome::Indexed { chunks: 1 }
        );
        let stats = engine.stats().await;
        assert_eq!(stats.documents_indexed, 2);
        assert_eq!(stats.documents_unchanged, 1);
        assert_eq!(stats.chunks_written, 2);
        Ok(())
    }

    #[traced_test]
    #[tokio::test]
    async fn test_failure_is_recorded_and_isolated() -> Result<()> {
        let dir = tempdir()?;
        let engine = engine_in(&dir).await?;
        std::fs::write(path_in(&engine, "broken.pdf"), b"%PDF-1.4 not really")?;
        std::fs::write(
            path_in(&engine, "good.pdf"),
            minimal_pdf_with_phrase("Berlin is in Germany"),
        )?;

        assert_eq!(engine.reconcile().await?, 2);
        assert_eq!(engine.drain().await, 2);

        let status = engine.get_status().await?;
        assert_eq!(status.indexed_documents, 1);
        assert_eq!(status.failed_documents, 1);
        assert_eq!(status.failures[0].path, "broken.pdf");
        assert_eq!(status.failures[0].error_kind, Some(ErrorKind::Extraction));
        assert!(logs_contain("Failed to index broken.pdf [extraction]"));

        // The failing revision is not retried by an incremental pass.
        assert_eq!(engine.reconcile().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_deletion_removes_document() -> Result<()> {
        let dir = tempdir()?;
        let engine = engine_in(&dir).await?;
        let file = path_in(&engine, "gone.md");
        std::fs::write(&file, "# Notes\n\nSomething to forget.")?;
        engine.index_document(&file, false).await?;
        assert_eq!(engine.index().count().await?, 1);

        std::fs::remove_file(&file)?;
        assert_eq!(engine.reconcile().await?, 1);
        engine.drain().await;

        assert!(engine.index().get_document("gone.md").await?.is_none());
        assert_eq!(engine.index().count().await?, 0);
        assert_eq!(engine.stats().await.documents_removed, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_unsupported_content_is_skipped() -> Result<()> {
        let dir = tempdir()?;
        let engine = engine_in(&dir).await?;
        let file = path_in(&engine, "BLOB");
        std::fs::write(&file, [0u8, 159, 146, 150, 0, 1])?;

        assert_eq!(engine.index_document(&file, false).await?, IndexOutcome::Skipped);
        assert!(engine.index().get_document("BLOB").await?.is_none());
        assert_eq!(engine.reconcile().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_full_reindex_forces_and_prunes() -> Result<()> {
        let dir = tempdir()?;
        let engine = engine_in(&dir).await?;
        std::fs::write(path_in(&engine, "keep.txt"), "Madrid is in Spain.")?;
        std::fs::write(path_in(&engine, "drop.txt"), "Rome is in Italy.")?;
        engine.reconcile().await?;
        engine.drain().await;

        std::fs::remove_file(path_in(&engine, "drop.txt"))?;
        assert_eq!(engine.trigger_full_reindex().await?, 2);
        engine.drain().await;

        let docs = engine.index().list_documents().await?;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].relative_path, "keep.txt");
        assert_eq!(engine.stats().await.documents_indexed, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_same_document_events_serialise() -> Result<()> {
        let dir = tempdir()?;
        let engine = engine_in(&dir).await?;
        let file = path_in(&engine, "a.txt");
        std::fs::write(&file, "Lisbon is the capital of Portugal.")?;

        let (first, second) = tokio::join!(
            engine.index_document(&file, false),
            engine.index_document(&file, false)
        );
        let mut outcomes = vec![first?, second?];
        outcomes.sort_by_key(|outcome| matches!(outcome, IndexOutcome::Unchanged));
        assert_eq!(
            outcomes,
            vec![IndexOutcome::Indexed { chunks: 1 }, IndexOutcome::Unchanged]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_run_loop_processes_events_until_shutdown() -> Result<()> {
        let dir = tempdir()?;
        let engine = engine_in(&dir).await?;
        let file = path_in(&engine, "live.txt");
        std::fs::write(&file, "Vienna is the capital of Austria.")?;

        let (events_tx, events_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(engine.clone().run(events_rx, shutdown_rx));

        events_tx
            .send(ChangeEvent {
                kind: ChangeKind::Created,
                path: file.clone(),
                relative: "live.txt".into(),
            })
            .await?;

        let indexed = async {
            loop {
                if engine.index().count().await.unwrap_or(0) == 1 {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
        };
        tokio::time::timeout(std::time::Duration::from_secs(5), indexed).await?;

        shutdown_tx.send(true)?;
        tokio::time::timeout(std::time::Duration::from_secs(5), handle).await??;
        Ok(())
    }

    #[tokio::test]
    async fn test_ignored_document_is_removed_not_reindexed() -> Result<()> {
        let dir = tempdir()?;
        let engine = engine_in(&dir).await?;
        let file = path_in(&engine, "notes.txt");
        std::fs::write(&file, "Helsinki is the capital of Finland.")?;
        engine.index_document(&file, false).await?;

        std::fs::write(path_in(&engine, ".ignore"), "notes.txt\n")?;
        assert_eq!(engine.reconcile().await?, 1);
        engine.drain().await;

        assert!(engine.index().get_document("notes.txt").await?.is_none());
        let stats = engine.stats().await;
        assert_eq!(stats.documents_indexed, 1);
        assert_eq!(stats.documents_removed, 1);
        assert_eq!(engine.reconcile().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_change_during_indexing_requeues() -> Result<()> {
        let dir = tempdir()?;
        let engine = engine_with(&dir, IndexingConfig::default(), Some(Arc::new(SavesOver))).await?;
        let file = path_in(&engine, "plan.md");
        std::fs::write(&file, "# Plan\n\nOslo is the capital of Norway.")?;
        assert_eq!(
            engine.index_document(&file, false).await?,
            IndexOutcome::Indexed { chunks: 1 }
        );
        let doc = engine.index().get_document("plan.md").await?.unwrap();
        let committed = engine.index().get_chunks(doc.id).await?;

        std::fs::write(&file, "# Plan [draft]\n\nTrondheim is further north.")?;
        assert_eq!(engine.index_document(&file, false).await?, IndexOutcome::Requeued);

        // Nothing from the draft reached the index.
        assert_eq!(engine.index().get_chunks(doc.id).await?, committed);
        let doc = engine.index().get_document("plan.md").await?.unwrap();
        assert_eq!(doc.state, DocumentState::Pending);
        assert_eq!(engine.queue().len().await, 1);
        assert_eq!(engine.stats().await.stale_discarded, 1);

        engine.drain().await;
        let chunks = engine.index().get_chunks(doc.id).await?;
        assert!(chunks.iter().any(|chunk| chunk.content.contains("Bergen")));
        assert!(chunks.iter().all(|chunk| !chunk.content.contains("Trondheim")));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_reindex_keeps_previous_chunks() -> Result<()> {
        let dir = tempdir()?;
        let engine = engine_in(&dir).await?;
        let file = path_in(&engine, "report.pdf");
        std::fs::write(&file, minimal_pdf_with_phrase("Berlin is in Germany"))?;
        assert!(matches!(
            engine.index_document(&file, false).await?,
            IndexOutcome::Indexed { .. }
        ));

        std::fs::write(&file, b"%PDF-1.4 truncated beyond repair")?;
        assert_eq!(
            engine.index_document(&file, false).await?,
            IndexOutcome::Failed(ErrorKind::Extraction)
        );
        let doc = engine.index().get_document("report.pdf").await?.unwrap();
        assert_eq!(doc.state, DocumentState::Failed);
        assert_eq!(doc.error_kind, Some(ErrorKind::Extraction));

        let question = engine
            .embedder
            .embed_texts(&["Berlin is in Germany".to_string()])
            .await?;
        let matches = engine.index().query(&question.embeddings[0], 5).await?;
        assert!(
            matches
                .first()
                .is_some_and(|m| m.relative_path == "report.pdf" && m.content.contains("Berlin"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_oversized_file_without_extension_is_recorded() -> Result<()> {
        let dir = tempdir()?;
        let config = IndexingConfig {
            max_file_bytes: 64,
            ..IndexingConfig::default()
        };
        let engine = engine_with(&dir, config, None).await?;
        let file = path_in(&engine, "README");
        std::fs::write(&file, "All work and no play. ".repeat(10))?;

        assert_eq!(
            engine.index_document(&file, false).await?,
            IndexOutcome::Failed(ErrorKind::Extraction)
        );
        let doc = engine.index().get_document("README").await?.unwrap();
        assert_eq!(doc.format, FormatTag::Text);
        assert_eq!(doc.state, DocumentState::Failed);
        assert_eq!(engine.get_status().await?.failed_documents, 1);
        Ok(())
    }
}
