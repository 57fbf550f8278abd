use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, Notify};
use tracing::debug;

/// Priority levels for indexing tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum TaskPriority {
    /// Reconcile-discovered work
    Background = 0,
    /// Watcher events
    #[default]
    Normal = 1,
    /// Removals and forced reindexing
    High = 2,
}

/// Types of indexing tasks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskType {
    /// Index a single file; `force` bypasses the unchanged-hash short-circuit
    IndexFile { path: PathBuf, force: bool },
    /// Remove a file from the index (when deleted)
    RemoveFile { path: PathBuf },
}

/// A task in the indexing queue
#[derive(Debug, Clone)]
pub struct IndexingTask {
    pub task_type: TaskType,
    pub priority: TaskPriority,
    pub created_at: DateTime<Utc>,
}

impl IndexingTask {
    pub fn new(task_type: TaskType, priority: TaskPriority) -> Self {
        Self {
            task_type,
            priority,
            created_at: Utc::now(),
        }
    }

    /// Create a normal-priority task for indexing a single file
    pub fn index_file(path: PathBuf) -> Self {
        Self::new(TaskType::IndexFile { path, force: false }, TaskPriority::Normal)
    }

    /// Create a background task for indexing a single file
    pub fn index_file_background(path: PathBuf) -> Self {
        Self::new(
            TaskType::IndexFile { path, force: false },
            TaskPriority::Background,
        )
    }

    /// Create a task that re-indexes a file even if its bytes are unchanged
    pub fn force_index(path: PathBuf) -> Self {
        Self::new(TaskType::IndexFile { path, force: true }, TaskPriority::High)
    }

    /// Create a task for removing a file from the index
    pub fn remove_file(path: PathBuf) -> Self {
        Self::new(TaskType::RemoveFile { path }, TaskPriority::High)
    }

    pub fn path(&self) -> &Path {
        match &self.task_type {
            TaskType::IndexFile { path, .. } | TaskType::RemoveFile { path } => path,
        }
    }

    pub fn is_forced(&self) -> bool {
        matches!(self.task_type, TaskType::IndexFile { force: true, .. })
    }

    /// Get a description of the task for logging
    pub fn description(&self) -> String {
        match &self.task_type {
            TaskType::IndexFile { path, force: false } => format!("Index file: {}", path.display()),
            TaskType::IndexFile { path, force: true } => {
                format!("Force index file: {}", path.display())
            }
            TaskType::RemoveFile { path } => format!("Remove file: {}", path.display()),
        }
    }
}

/// Heap entry. Higher priority first, then first submitted.
#[derive(Debug)]
struct PriorityTask {
    task: IndexingTask,
    seq: u64,
}

impl PartialEq for PriorityTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PriorityTask {}

impl PartialOrd for PriorityTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PriorityTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.task
            .priority
            .cmp(&other.task.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Clone, Copy)]
struct Queued {
    seq: u64,
    priority: TaskPriority,
    forced: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    heap: BinaryHeap<PriorityTask>,
    /// The live task per path. Heap entries with another seq are stale.
    live: HashMap<PathBuf, Queued>,
    next_seq: u64,
}

/// Pending indexing work, at most one task per path.
///
/// A task submitted for a path that is already queued replaces the queued one.
/// A forced index task stays forced when replaced by an unforced one, and the
/// replacement keeps the higher of the two priorities.
#[derive(Debug, Default)]
pub struct TaskQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn submit(&self, task: IndexingTask) {
        let mut state = self.state.lock().await;
        Self::push(&mut state, task);
        drop(state);
        self.notify.notify_one();
    }

    pub async fn submit_all(&self, tasks: impl IntoIterator<Item = IndexingTask>) {
        let mut state = self.state.lock().await;
        let mut submitted = 0usize;
        for task in tasks {
            Self::push(&mut state, task);
            submitted += 1;
        }
        drop(state);
        if submitted > 0 {
            debug!("Queued {} indexing tasks", submitted);
            self.notify.notify_one();
        }
    }

    fn push(state: &mut QueueState, mut task: IndexingTask) {
        let seq = state.next_seq;
        state.next_seq += 1;

        if let Some(previous) = state.live.get(task.path()) {
            if previous.forced {
                if let TaskType::IndexFile { force, .. } = &mut task.task_type {
                    *force = true;
                }
            }
            task.priority = task.priority.max(previous.priority);
        }

        state.live.insert(
            task.path().to_path_buf(),
            Queued {
                seq,
                priority: task.priority,
                forced: task.is_forced(),
            },
        );
        state.heap.push(PriorityTask { task, seq });
    }

    /// Takes up to `max` live tasks, highest priority first.
    pub async fn pop_batch(&self, max: usize) -> Vec<IndexingTask> {
        let mut state = self.state.lock().await;
        let mut batch = Vec::new();
        while batch.len() < max {
            let Some(entry) = state.heap.pop() else {
                break;
            };
            let is_live = state
                .live
                .get(entry.task.path())
                .is_some_and(|queued| queued.seq == entry.seq);
            if is_live {
                state.live.remove(entry.task.path());
                batch.push(entry.task);
            }
        }
        if state.live.is_empty() {
            state.heap.clear();
        }
        batch
    }

    /// Number of distinct paths waiting.
    pub async fn len(&self) -> usize {
        self.state.lock().await.live.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.heap.clear();
        state.live.clear();
    }

    /// Resolves after the next submission (or immediately if one happened
    /// since the last wait).
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}
