//! Change detection for the watched root.
//!
//! Two sources feed the indexer: live filesystem notifications, debounced by
//! `notify-debouncer-mini`, and reconciles that diff a full directory walk
//! against the last-known fingerprint of every document. Both suppress events
//! for files whose bytes did not change.

use super::chunking_strategy::should_index_file;
use super::file_index::{FileStamp, document_key};
use futures::stream::StreamExt;
use notify::Watcher as _;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    /// Absolute path under the canonical root.
    pub path: PathBuf,
    /// Document key, see [`document_key`].
    pub relative: String,
}

/// Last-known state of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub stamp: FileStamp,
    pub hash: String,
}

/// blake3 of `bytes`, hex encoded.
pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

pub fn file_stamp(meta: &std::fs::Metadata) -> FileStamp {
    let modified_ms = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    FileStamp {
        size: meta.len(),
        modified_ms,
    }
}

async fn hash_file(path: &Path) -> std::io::Result<String> {
    let bytes = tokio::fs::read(path).await?;
    tokio::task::spawn_blocking(move || content_hash(&bytes))
        .await
        .map_err(std::io::Error::other)
}

/// Running watcher. Dropping it stops notifications; [`stop`](Self::stop)
/// also waits for queued notifications to be classified.
pub struct WatchHandle {
    debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    listener: tokio::task::JoinHandle<()>,
}

impl WatchHandle {
    pub async fn stop(self) {
        // Dropping the debouncer drops the raw sender, which ends the listener.
        drop(self.debouncer);
        let mut listener = self.listener;
        match tokio::time::timeout(Duration::from_secs(5), &mut listener).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Watch listener ended abnormally: {}", e),
            Err(_) => {
                warn!("Watch listener did not stop, aborting it");
                listener.abort();
            }
        }
    }
}

/// Tracks the documents under one root and turns filesystem observations
/// into [`ChangeEvent`]s.
#[derive(Debug)]
pub struct ChangeDetector {
    root: PathBuf,
    known: Mutex<HashMap<String, Fingerprint>>,
}

impl ChangeDetector {
    pub fn new(root: &Path) -> std::io::Result<Self> {
        Ok(Self {
            root: root.canonicalize()?,
            known: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn absolute(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Replaces the last-known state.
    pub async fn seed(&self, fingerprints: impl IntoIterator<Item = (String, Fingerprint)>) {
        let mut known = self.known.lock().await;
        known.clear();
        known.extend(fingerprints);
        debug!("Change detector seeded with {} documents", known.len());
    }

    pub async fn record(&self, relative: &str, fingerprint: Fingerprint) {
        self.known
            .lock()
            .await
            .insert(relative.to_string(), fingerprint);
    }

    pub async fn forget(&self, relative: &str) {
        self.known.lock().await.remove(relative);
    }

    pub async fn known_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.known.lock().await.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Every candidate document currently under the root, with its key and
    /// stamp, sorted by key.
    pub async fn scan_directory(&self) -> std::io::Result<Vec<(PathBuf, String, FileStamp)>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || scan_tree(&root, &root))
            .await
            .map_err(std::io::Error::other)
    }

    /// Diffs the current listing against the last-known state. Created and
    /// modified files are left for the indexer to record; deleted ones are
    /// forgotten here.
    pub async fn reconcile(&self) -> std::io::Result<Vec<ChangeEvent>> {
        let listing = self.scan_directory().await?;
        let mut events = Vec::new();
        let mut seen = std::collections::HashSet::with_capacity(listing.len());

        for (path, relative, stamp) in listing {
            seen.insert(relative.clone());
            if let Some(kind) = self.classify_existing(&path, &relative, stamp).await {
                events.push(ChangeEvent {
                    kind,
                    path,
                    relative,
                });
            }
        }

        let mut known = self.known.lock().await;
        let vanished: Vec<String> = known
            .keys()
            .filter(|relative| !seen.contains(*relative))
            .cloned()
            .collect();
        for relative in vanished {
            known.remove(&relative);
            events.push(ChangeEvent {
                kind: ChangeKind::Deleted,
                path: self.root.join(&relative),
                relative,
            });
        }
        drop(known);

        info!("Reconcile found {} changes", events.len());
        Ok(events)
    }

    /// Classifies a path reported by the watcher. A path is judged by the
    /// same rules as a full scan, so ignored files and symlinks are never
    /// reported.
    pub async fn observe(&self, path: &Path) -> Vec<ChangeEvent> {
        let Some(relative) = document_key(&self.root, path) else {
            return Vec::new();
        };

        let meta = match tokio::fs::symlink_metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return self.vanished(&relative).await;
            }
            Err(e) => {
                debug!("Cannot stat {}: {}", path.display(), e);
                return Vec::new();
            }
        };

        let listing = self.scan_path(path).await;
        if meta.is_dir() {
            // A directory moved into the tree reports only itself.
            let known = self.known.lock().await;
            return listing
                .into_iter()
                .filter(|(_, relative, _)| !known.contains_key(relative))
                .map(|(path, relative, _)| ChangeEvent {
                    kind: ChangeKind::Created,
                    path,
                    relative,
                })
                .collect();
        }

        match listing.into_iter().find(|(found, _, _)| found == path) {
            Some((path, relative, stamp)) => self
                .classify_existing(&path, &relative, stamp)
                .await
                .map(|kind| ChangeEvent {
                    kind,
                    path,
                    relative,
                })
                .into_iter()
                .collect(),
            // Replaced by a symlink or newly ignored.
            None => self.vanished(&relative).await,
        }
    }

    /// Whether `path` is a document a full scan would list.
    pub async fn is_candidate(&self, path: &Path) -> bool {
        self.scan_path(path)
            .await
            .iter()
            .any(|(found, _, _)| found == path)
    }

    async fn scan_path(&self, path: &Path) -> Vec<(PathBuf, String, FileStamp)> {
        let root = self.root.clone();
        let within = path.to_path_buf();
        match tokio::task::spawn_blocking(move || scan_tree(&root, &within)).await {
            Ok(listing) => listing,
            Err(e) => {
                warn!("Failed to scan {}: {}", path.display(), e);
                Vec::new()
            }
        }
    }

    /// Forgets `relative` and everything below it.
    async fn vanished(&self, relative: &str) -> Vec<ChangeEvent> {
        let prefix = format!("{relative}/");
        let mut known = self.known.lock().await;
        let removed: Vec<String> = known
            .keys()
            .filter(|key| *key == relative || key.starts_with(&prefix))
            .cloned()
            .collect();
        removed
            .into_iter()
            .map(|relative| {
                known.remove(&relative);
                ChangeEvent {
                    kind: ChangeKind::Deleted,
                    path: self.root.join(&relative),
                    relative,
                }
            })
            .collect()
    }

    /// `None` when the file matches its last-known fingerprint. A changed stamp
    /// over unchanged bytes only refreshes the fingerprint.
    async fn classify_existing(
        &self,
        path: &Path,
        relative: &str,
        stamp: FileStamp,
    ) -> Option<ChangeKind> {
        let known_hash = {
            let known = self.known.lock().await;
            match known.get(relative) {
                None => return Some(ChangeKind::Created),
                Some(fp) if fp.stamp == stamp => return None,
                Some(fp) => fp.hash.clone(),
            }
        };

        match hash_file(path).await {
            Ok(hash) if hash == known_hash => {
                debug!("{} touched without content change", relative);
                self.record(relative, Fingerprint { stamp, hash }).await;
                None
            }
            Ok(_) => Some(ChangeKind::Modified),
            Err(e) => {
                debug!("Cannot hash {}: {}", path.display(), e);
                Some(ChangeKind::Modified)
            }
        }
    }

    /// Starts watching the root. Classified events go to `events_tx`.
    pub fn watch(
        self: &Arc<Self>,
        debounce: Duration,
        events_tx: mpsc::Sender<ChangeEvent>,
        capacity: usize,
    ) -> Result<WatchHandle, notify::Error> {
        let (raw_tx, raw_rx) = mpsc::channel(capacity);

        let listener = tokio::spawn(Arc::clone(self).listen(raw_rx, events_tx));

        let mut debouncer = notify_debouncer_mini::new_debouncer(
            debounce,
            move |res: notify_debouncer_mini::DebounceEventResult| match res {
                Ok(events) => {
                    for ev in events {
                        // Runs on the debouncer's own thread, so blocking is fine.
                        // A closed channel means the service is shutting down.
                        if raw_tx.blocking_send(ev.path).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => tracing::error!("File watcher error: {}", e),
            },
        )?;

        debouncer
            .watcher()
            .watch(&self.root, notify::RecursiveMode::Recursive)?;
        info!("Watching {}", self.root.display());

        Ok(WatchHandle {
            debouncer,
            listener,
        })
    }

    async fn listen(
        self: Arc<Self>,
        raw_rx: mpsc::Receiver<PathBuf>,
        events_tx: mpsc::Sender<ChangeEvent>,
    ) {
        let detector = &self;
        let events_tx = &events_tx;
        tokio_stream::wrappers::ReceiverStream::new(raw_rx)
            .for_each_concurrent(16, |path| async move {
                for event in detector.observe(&path).await {
                    debug!("{:?} {}", event.kind, event.relative);
                    if events_tx.send(event).await.is_err() {
                        debug!("Indexer gone, dropping change for {}", path.display());
                        return;
                    }
                }
            })
            .await;
    }
}

/// Candidate documents at or below `within`, keyed relative to `root`.
///
/// The walk always starts at `root` and only descends towards `within`, so
/// every ignore file between the two applies. Links are not followed.
fn scan_tree(root: &Path, within: &Path) -> Vec<(PathBuf, String, FileStamp)> {
    let target = within.to_path_buf();
    let mut builder = ignore::WalkBuilder::new(root);
    builder
        .hidden(true)
        .filter_entry(move |entry| {
            target.starts_with(entry.path()) || entry.path().starts_with(&target)
        });

    let mut found = Vec::new();
    for entry in builder.build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let Some(relative) = document_key(root, entry.path()) else {
            continue;
        };
        if !should_index_file(Path::new(&relative)) {
            continue;
        }
        match entry.metadata() {
            Ok(meta) => found.push((entry.into_path(), relative, file_stamp(&meta))),
            Err(e) => warn!("Skipping {}: {}", relative, e),
        }
    }
    found.sort_by(|a, b| a.1.cmp(&b.1));
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::task_queue::{IndexingTask, TaskQueue};
    use anyhow::Result;
    use tempfile::tempdir;
    use tracing_test::traced_test;

    async fn fingerprint_of(path: &Path) -> Result<Fingerprint> {
        let meta = tokio::fs::metadata(path).await?;
        Ok(Fingerprint {
            stamp: file_stamp(&meta),
            hash: hash_file(path).await?,
        })
    }

    fn kinds(events: &[ChangeEvent]) -> Vec<(ChangeKind, &str)> {
        events
            .iter()
            .map(|e| (e.kind, e.relative.as_str()))
            .collect()
    }

    #[tokio::test]
    async fn test_reconcile_lists_candidates() -> Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("a.txt"), "alpha")?;
        std::fs::create_dir(dir.path().join("sub"))?;
        std::fs::write(dir.path().join("sub").join("b.md"), "beta")?;
        std::fs::write(dir.path().join(".hidden.txt"), "nope")?;
        std::fs::write(dir.path().join("photo.jpg"), "nope")?;

        let detector = ChangeDetector::new(dir.path())?;
        let events = detector.reconcile().await?;
        assert_eq!(
            kinds(&events),
            vec![(ChangeKind::Created, "a.txt"), (ChangeKind::Created, "sub/b.md")]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_reconcile_diffs_known_state() -> Result<()> {
        let dir = tempdir()?;
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, "alpha")?;
        std::fs::write(&b, "beta")?;

        let detector = ChangeDetector::new(dir.path())?;
        detector
            .seed([
                ("a.txt".to_string(), fingerprint_of(&a).await?),
                ("b.txt".to_string(), fingerprint_of(&b).await?),
                (
                    "c.txt".to_string(),
                    Fingerprint {
                        stamp: FileStamp {
                            size: 1,
                            modified_ms: 1,
                        },
                        hash: content_hash(b"c"),
                    },
                ),
            ])
            .await;
        assert_eq!(
            kinds(&detector.reconcile().await?),
            vec![(ChangeKind::Deleted, "c.txt")]
        );

        // c.txt was reported deleted and forgotten; nothing else changed.
        assert!(detector.reconcile().await?.is_empty());

        // Same bytes with a different stamp is not a change.
        let mut stale = fingerprint_of(&a).await?;
        stale.stamp.modified_ms -= 10_000;
        detector.record("a.txt", stale).await;
        assert!(detector.reconcile().await?.is_empty());

        std::fs::write(&b, "beta, rewritten")?;
        let events = detector.reconcile().await?;
        assert_eq!(kinds(&events), vec![(ChangeKind::Modified, "b.txt")]);
        Ok(())
    }

    #[tokio::test]
    async fn test_observe_classifies_paths() -> Result<()> {
        let dir = tempdir()?;
        let detector = ChangeDetector::new(dir.path())?;
        let root = detector.root().to_path_buf();

        let notes = root.join("notes");
        std::fs::create_dir(&notes)?;
        let file = notes.join("n.txt");
        std::fs::write(&file, "first")?;

        assert_eq!(
            kinds(&detector.observe(&file).await),
            vec![(ChangeKind::Created, "notes/n.txt")]
        );
        assert_eq!(
            kinds(&detector.observe(&notes).await),
            vec![(ChangeKind::Created, "notes/n.txt")]
        );
        detector.record("notes/n.txt", fingerprint_of(&file).await?).await;
        assert!(detector.observe(&file).await.is_empty());
        assert!(detector.observe(&root.join("x.jpg")).await.is_empty());

        std::fs::remove_dir_all(&notes)?;
        assert_eq!(
            kinds(&detector.observe(&notes).await),
            vec![(ChangeKind::Deleted, "notes/n.txt")]
        );
        assert!(detector.known_paths().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_ignored_and_linked_files_are_not_candidates() -> Result<()> {
        let dir = tempdir()?;
        let detector = ChangeDetector::new(dir.path())?;
        let root = detector.root().to_path_buf();
        std::fs::write(root.join(".ignore"), "ignored.txt\nbuild/\n")?;
        std::fs::write(root.join("kept.txt"), "kept")?;
        std::fs::write(root.join("ignored.txt"), "ignored")?;
        std::fs::create_dir(root.join("build"))?;
        std::fs::write(root.join("build").join("out.txt"), "built")?;

        assert!(detector.observe(&root.join("ignored.txt")).await.is_empty());
        assert!(detector.observe(&root.join("build")).await.is_empty());
        assert!(
            detector
                .observe(&root.join("build").join("out.txt"))
                .await
                .is_empty()
        );
        assert!(!detector.is_candidate(&root.join("ignored.txt")).await);
        assert!(detector.is_candidate(&root.join("kept.txt")).await);

        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(root.join("kept.txt"), root.join("link.txt"))?;
            assert!(detector.observe(&root.join("link.txt")).await.is_empty());
            assert!(!detector.is_candidate(&root.join("link.txt")).await);
        }

        assert_eq!(
            kinds(&detector.reconcile().await?),
            vec![(ChangeKind::Created, "kept.txt")]
        );
        detector
            .record("kept.txt", fingerprint_of(&root.join("kept.txt")).await?)
            .await;
        assert!(detector.reconcile().await?.is_empty());

        // A known file that becomes ignored is gone as far as the index goes.
        detector
            .record("ignored.txt", fingerprint_of(&root.join("ignored.txt")).await?)
            .await;
        assert_eq!(
            kinds(&detector.observe(&root.join("ignored.txt")).await),
            vec![(ChangeKind::Deleted, "ignored.txt")]
        );
        assert_eq!(detector.known_paths().await, vec!["kept.txt".to_string()]);
        Ok(())
    }

    #[traced_test]
    #[tokio::test]
    async fn test_watch_reports_new_file() -> Result<()> {
        let dir = tempdir()?;
        let detector = Arc::new(ChangeDetector::new(dir.path())?);
        let (tx, mut rx) = mpsc::channel(16);
        let handle = detector.watch(Duration::from_millis(100), tx, 16)?;

        std::fs::write(detector.root().join("fresh.txt"), "hello")?;
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await?
            .expect("watcher channel closed");
        assert_eq!(event.kind, ChangeKind::Created);
        assert_eq!(event.relative, "fresh.txt");

        handle.stop().await;
        assert!(logs_contain("Watching"));
        Ok(())
    }

    #[traced_test]
    #[tokio::test]
    async fn test_burst_of_writes_is_one_task() -> Result<()> {
        let dir = tempdir()?;
        let detector = Arc::new(ChangeDetector::new(dir.path())?);
        let (tx, mut rx) = mpsc::channel(16);
        let handle = detector.watch(Duration::from_millis(500), tx, 16)?;

        let file = detector.root().join("busy.txt");
        for i in 0..5 {
            std::fs::write(&file, format!("revision {i}"))?;
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let first = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await?
            .expect("watcher channel closed");
        assert_eq!(kinds(&[first.clone()]), vec![(ChangeKind::Created, "busy.txt")]);

        // Nothing else arrives once the burst has settled.
        let mut events = vec![first];
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(1500), rx.recv()).await
        {
            events.push(event);
        }
        assert_eq!(events.len(), 1, "burst produced {:?}", kinds(&events));

        let queue = TaskQueue::new();
        queue
            .submit_all(events.into_iter().map(|e| IndexingTask::index_file(e.path)))
            .await;
        assert_eq!(queue.len().await, 1);

        handle.stop().await;
        Ok(())
    }
}
