//! Embedding provider implementations

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fastembed::{InitOptions, TextEmbedding};
use half::f16;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Result of embedding generation
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text
    pub embeddings: Vec<Vec<f16>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a new embedding result from a vector of f16 embeddings.
    ///
    /// The dimension is inferred from the first embedding vector, or 0 when empty.
    pub fn new(embeddings: Vec<Vec<f16>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Trait for embedding providers that can generate embeddings from text.
///
/// Document chunks and queries go through the same methods so that both sides
/// of a similarity comparison live in the same vector space.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate the embedding of a single text
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>>;

    /// Generate embeddings for multiple texts, in input order
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Get the dimension of embeddings produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;

    /// Identifier of the model producing the vectors, stored with every vector
    fn model_id(&self) -> String;

    /// Drop any loaded model. Later calls may load it again.
    async fn release(&self) {}
}

/// Shared handle to the single embedding model instance of a process.
pub type EmbedderHandle = Arc<dyn EmbeddingProvider>;

type SharedModel = Arc<Mutex<TextEmbedding>>;

/// FastEmbed-based embedding provider running a local ONNX model.
///
/// The model is loaded on first use, on the blocking thread pool, and then kept
/// until [`EmbeddingProvider::release`]. Inference calls are serialized through a
/// mutex so one instance can be shared by the indexer and query callers.
pub struct FastEmbedProvider {
    config: EmbedConfig,
    dimension: usize,
    model: tokio::sync::Mutex<Option<SharedModel>>,
    /// Set once a load completes, cleared on release.
    loaded: AtomicBool,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("config", &self.config)
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastEmbedProvider {
    /// Creates a provider without loading the model.
    ///
    /// # Errors
    /// Returns [`EmbedError::InvalidConfig`] when the configured model is unknown.
    pub fn new(config: EmbedConfig) -> Result<Self> {
        config.validate()?;
        let dimension = config.resolve_model()?.dimension;
        Ok(Self {
            config,
            dimension,
            model: tokio::sync::Mutex::new(None),
            loaded: AtomicBool::new(false),
        })
    }

    /// Creates a provider and loads the model right away.
    pub async fn create(config: EmbedConfig) -> Result<Self> {
        let provider = Self::new(config)?;
        provider.model().await?;
        Ok(provider)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Returns the loaded model, loading it first if needed. Concurrent callers
    /// wait on the slot lock so the model is loaded only once.
    async fn model(&self) -> Result<SharedModel> {
        let mut slot = self.model.lock().await;
        if let Some(model) = slot.as_ref() {
            return Ok(Arc::clone(model));
        }

        if let Some(dir) = &self.config.cache_dir {
            tokio::fs::create_dir_all(dir).await?;
        }

        let spec = self.config.resolve_model()?;
        let config = self.config.clone();
        tracing::info!("Loading embedding model: {}", config.model_name());
        let model = tokio::task::spawn_blocking(move || -> Result<TextEmbedding> {
            let mut options = InitOptions::new(spec.model)
                .with_show_download_progress(config.show_download_progress);
            if let Some(dir) = config.cache_dir {
                options = options.with_cache_dir(dir);
            }
            TextEmbedding::try_new(options).map_err(EmbedError::model_init)
        })
        .await??;
        tracing::info!(
            "Model loaded successfully: {} (dimension {})",
            self.config.model_name(),
            self.dimension
        );

        let model = Arc::new(Mutex::new(model));
        *slot = Some(Arc::clone(&model));
        self.loaded.store(true, Ordering::Release);
        Ok(model)
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>> {
        let texts = vec![text.to_string()];
        let result = self.embed_texts(&texts).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::embedding_gen("no embedding generated for text"))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        let model = self.model().await?;
        tracing::debug!("Generating embeddings for {} texts", texts.len());

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.config.batch_size) {
            let chunk = chunk.to_vec();
            let expected = chunk.len();
            let model = Arc::clone(&model);

            let batch_embeddings = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                let mut model_guard = model.lock().map_err(|_| EmbedError::LockPoisoned)?;
                model_guard
                    .embed(chunk, None)
                    .map_err(EmbedError::embedding_gen)
            })
            .await??;

            if batch_embeddings.len() != expected {
                return Err(EmbedError::embedding_gen(format!(
                    "model returned {} embeddings for {} texts",
                    batch_embeddings.len(),
                    expected
                )));
            }
            all_embeddings.extend(batch_embeddings.into_iter().map(normalize_to_f16));
        }

        tracing::debug!("Generated {} embeddings", all_embeddings.len());
        Ok(EmbeddingResult::new(all_embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }

    fn model_id(&self) -> String {
        self.config.model_id()
    }

    async fn release(&self) {
        let mut slot = self.model.lock().await;
        self.loaded.store(false, Ordering::Release);
        if slot.take().is_some() {
            tracing::info!("Released embedding model: {}", self.config.model_name());
        }
    }
}

/// L2-normalizes an f32 vector and converts it to f16.
pub fn normalize_to_f16(embedding: Vec<f32>) -> Vec<f16> {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    embedding
        .into_iter()
        .map(|value| {
            if norm > 0.0 {
                f16::from_f32(value / norm)
            } else {
                f16::from_f32(value)
            }
        })
        .collect()
}

/// Cosine similarity of two f16 vectors. Returns 0.0 for mismatched lengths or
/// zero vectors.
pub fn cosine_similarity(a: &[f16], b: &[f16]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (x.to_f32(), y.to_f32());
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
