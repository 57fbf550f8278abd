pub mod chunking_strategy;
pub mod directory_watcher;
pub mod document_locks;
pub mod document_state;
pub mod enhanced_index;
pub mod file_index;
pub mod indexing_engine;
pub mod retrieval_engine;
pub mod task_queue;
