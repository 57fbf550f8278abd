//! # docrag-embed
//!
//! Text embeddings for document retrieval. One model instance is created per
//! process and shared through an [`EmbedderHandle`]; document chunks and user
//! questions are embedded by the same provider so they can be compared.
//!
//! ## Providers
//!
//! - [`FastEmbedProvider`]: local ONNX models through fastembed. The default model,
//!   `multilingual-e5-small`, handles mixed-language document sets. The model is
//!   loaded lazily on first use and can be released on shutdown.
//! - [`HashingProvider`]: deterministic feature hashing with no download, for
//!   offline use and tests.
//!
//! ## Quick Start
//!
//! ```no_run
//! use docrag_embed::{EmbedConfig, build_provider};
//!
//! # async fn example() -> docrag_embed::Result<()> {
//! let provider = build_provider(&EmbedConfig::default())?;
//!
//! let texts = vec!["Hello world".to_string(), "Bonjour le monde".to_string()];
//! let result = provider.embed_texts(&texts).await?;
//!
//! println!("Generated {} embeddings of dimension {}", result.len(), result.dimension);
//! # Ok(())
//! # }
//! ```
//!
//! ## Memory Usage
//!
//! Vectors are L2-normalized and returned as half-precision (f16) to halve the
//! size of the persisted index.

pub mod config;
pub mod error;
pub mod hashing;
pub mod provider;

use std::sync::Arc;

// Re-export main types for easy access
pub use config::{EmbedConfig, ModelSpec, ProviderKind};
pub use error::{EmbedError, Result};
pub use hashing::HashingProvider;
pub use provider::{
    EmbedderHandle, EmbeddingProvider, EmbeddingResult, FastEmbedProvider, cosine_similarity,
    normalize_to_f16,
};

/// Builds the provider selected by `config` without loading any model yet.
///
/// # Errors
/// Returns [`EmbedError::InvalidConfig`] when the configuration does not validate.
pub fn build_provider(config: &EmbedConfig) -> Result<EmbedderHandle> {
    config.validate()?;
    let provider: EmbedderHandle = match config.provider {
        ProviderKind::FastEmbed => Arc::new(FastEmbedProvider::new(config.clone())?),
        ProviderKind::Hashing => Arc::new(HashingProvider::new(config.dimension)),
    };
    tracing::debug!(
        "Built {} embedding provider ({})",
        provider.provider_name(),
        provider.model_id()
    );
    Ok(provider)
}
