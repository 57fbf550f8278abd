//! Wires configuration into a running indexer and retriever.

use crate::config::DocragConfig;
use crate::extract::registry::ExtractorRegistry;
use crate::retrieval::chunking_strategy::ChunkingStrategy;
use crate::retrieval::directory_watcher::{ChangeDetector, WatchHandle};
use crate::retrieval::enhanced_index::{EMBEDDING_MODEL_KEY, EnhancedFileIndex};
use crate::retrieval::indexing_engine::{IndexingEngine, IndexingStats};
use crate::retrieval::retrieval_engine::{RetrievalEngine, RetrievalResult};
use crate::status::{CacheStats, CategoryGroup, DatabaseInfo, IndexStatus, StatusApi};
use anyhow::{Context, Result};
use docrag_embed::EmbedderHandle;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Background pieces owned by a started service.
struct Background {
    watcher: WatchHandle,
    indexer: JoinHandle<()>,
    reconciler: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

/// The index over one directory tree, plus the engines that read and write it.
pub struct DocragService {
    config: DocragConfig,
    index: EnhancedFileIndex,
    embedder: EmbedderHandle,
    engine: Arc<IndexingEngine>,
    retrieval: RetrievalEngine,
    background: Option<Background>,
}

impl DocragService {
    /// Opens the index and builds the engines without touching stored data
    /// or starting anything in the background.
    pub async fn open(config: DocragConfig) -> Result<Self> {
        config.validate()?;
        let root = &config.index.root;
        let detector = Arc::new(
            ChangeDetector::new(root)
                .with_context(|| format!("Cannot access index root {}", root.display()))?,
        );

        let database = config.database_path();
        let index = EnhancedFileIndex::open(&database)
            .await
            .with_context(|| format!("Cannot open index database {}", database.display()))?;

        let embedder = docrag_embed::build_provider(&config.embedding)?;
        let registry =
            ExtractorRegistry::with_defaults(&config.extraction, config.indexing.max_file_bytes);
        let chunking = ChunkingStrategy::new(config.chunking)?;

        let engine = Arc::new(IndexingEngine::new(
            index.clone(),
            registry,
            chunking,
            embedder.clone(),
            detector,
            config.indexing.clone(),
        ));
        let retrieval = RetrievalEngine::new(
            index.clone(),
            embedder.clone(),
            config.retrieval.excerpt_chars,
        );

        Ok(Self {
            config,
            index,
            embedder,
            engine,
            retrieval,
            background: None,
        })
    }

    /// Opens the service, catches up with changes made while it was not
    /// running, and keeps the index current until [`shutdown`](Self::shutdown).
    pub async fn start(config: DocragConfig) -> Result<Self> {
        let mut service = Self::open(config).await?;
        if service.engine.initialize().await? {
            info!("Embedding model changed, every document will be re-indexed");
        }

        let (events_tx, events_rx) = mpsc::channel(service.config.watcher.channel_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let watcher = service.engine.detector().watch(
            service.config.watcher.debounce(),
            events_tx,
            service.config.watcher.channel_capacity,
        )?;

        let queued = service.engine.reconcile().await?;
        info!("Startup reconcile queued {} documents", queued);

        let indexer = tokio::spawn(service.engine.clone().run(events_rx, shutdown_rx.clone()));
        let reconciler = service
            .config
            .watcher
            .reconcile_interval()
            .map(|period| tokio::spawn(periodic_reconcile(service.engine.clone(), period, shutdown_rx)));

        service.background = Some(Background {
            watcher,
            indexer,
            reconciler,
            shutdown_tx,
        });
        Ok(service)
    }

    /// One-shot indexing: an incremental reconcile (or a forced full
    /// reindex), then works the queue until it is empty.
    pub async fn index_once(&self, full: bool) -> Result<IndexingStats> {
        if self.engine.initialize().await? {
            info!("Embedding model changed, every document will be re-indexed");
        }
        let queued = if full {
            self.engine.trigger_full_reindex().await?
        } else {
            self.engine.reconcile().await?
        };
        info!("Queued {} documents", queued);
        self.engine.drain().await;
        Ok(self.engine.stats().await)
    }

    pub fn config(&self) -> &DocragConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<IndexingEngine> {
        &self.engine
    }

    /// Passages relevant to `question`. `top_k` and `min_score` default to
    /// the `[retrieval]` configuration.
    pub async fn retrieve(
        &self,
        question: &str,
        top_k: Option<usize>,
        min_score: Option<f32>,
    ) -> Result<RetrievalResult> {
        let active = self.index.get_metadata(EMBEDDING_MODEL_KEY).await?;
        let model = self.embedder.model_id();
        if active.as_deref().is_some_and(|active| active != model) {
            warn!(
                "Index was built with {} but queries use {}; results will be poor until it is re-indexed",
                active.as_deref().unwrap_or_default(),
                model
            );
        }

        Ok(self
            .retrieval
            .retrieve(
                question,
                top_k.unwrap_or(self.config.retrieval.top_k),
                min_score.unwrap_or(self.config.retrieval.min_score),
            )
            .await?)
    }

    pub async fn status(&self) -> Result<IndexStatus> {
        Ok(StatusApi::get_index_status(&self.engine).await?)
    }

    pub async fn list_documents(&self) -> Result<Vec<CategoryGroup>> {
        Ok(StatusApi::list_documents(&self.index).await?)
    }

    pub async fn cache_stats(&self) -> Result<CacheStats> {
        Ok(StatusApi::cache_stats(&self.index).await?)
    }

    pub async fn database_info(&self) -> Result<DatabaseInfo> {
        Ok(StatusApi::get_database_info(&self.index, &self.config.database_path()).await?)
    }

    pub async fn trigger_full_reindex(&self) -> Result<usize> {
        Ok(self.engine.trigger_full_reindex().await?)
    }

    pub async fn reconcile(&self) -> Result<usize> {
        Ok(self.engine.reconcile().await?)
    }

    /// Stops the watcher and background tasks, releases the model and closes
    /// the database.
    pub async fn shutdown(mut self) {
        if let Some(background) = self.background.take() {
            background.watcher.stop().await;
            // Receivers may already be gone; the loops stop either way.
            let _ = background.shutdown_tx.send(true);
            if let Err(e) = background.indexer.await {
                error!("Indexing loop ended abnormally: {}", e);
            }
            if let Some(reconciler) = background.reconciler {
                if let Err(e) = reconciler.await {
                    error!("Reconcile task ended abnormally: {}", e);
                }
            }
        }
        self.embedder.release().await;
        self.index.close().await;
        info!("Service stopped");
    }
}

async fn periodic_reconcile(
    engine: Arc<IndexingEngine>,
    period: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately; the startup reconcile covers it.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = engine.reconcile().await {
                    error!("Periodic reconcile failed: {}", e);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
