//! Configuration for embedding providers

use crate::error::{EmbedError, Result};
use fastembed::EmbeddingModel;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which embedding backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Local ONNX model run through fastembed.
    #[default]
    FastEmbed,
    /// Deterministic feature hashing. No model download, useful offline and in tests.
    Hashing,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::FastEmbed => "fastembed",
            ProviderKind::Hashing => "hashing",
        }
    }
}

/// A fastembed model this crate knows how to load, with its output dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    pub model: EmbeddingModel,
    pub dimension: usize,
}

/// Embedding configuration, usually read from the `[embedding]` section of the
/// service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    pub provider: ProviderKind,
    /// Short model name, e.g. `multilingual-e5-small`. Ignored by the hashing provider.
    #[serde(alias = "model")]
    pub model_name: String,
    /// Where fastembed keeps downloaded model files. fastembed's default when unset.
    pub cache_dir: Option<PathBuf>,
    /// Texts sent to the model per call.
    pub batch_size: usize,
    pub show_download_progress: bool,
    /// Vector size of the hashing provider.
    pub dimension: usize,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::FastEmbed,
            model_name: "multilingual-e5-small".to_string(),
            cache_dir: None,
            batch_size: 32,
            show_download_progress: true,
            dimension: 384,
        }
    }
}

impl EmbedConfig {
    /// Configuration for the deterministic hashing provider.
    pub fn hashing(dimension: usize) -> Self {
        Self {
            provider: ProviderKind::Hashing,
            model_name: "feature-hash".to_string(),
            dimension,
            ..Self::default()
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Identifier stored alongside every vector. Changing it invalidates the index.
    pub fn model_id(&self) -> String {
        match self.provider {
            ProviderKind::FastEmbed => format!("fastembed:{}", self.model_name),
            ProviderKind::Hashing => format!("hashing:{}", self.dimension),
        }
    }

    /// Maps the configured model name onto a fastembed model.
    ///
    /// # Errors
    /// Returns [`EmbedError::InvalidConfig`] for names outside the supported set.
    pub fn resolve_model(&self) -> Result<ModelSpec> {
        let (model, dimension) = match self.model_name.to_ascii_lowercase().as_str() {
            "multilingual-e5-small" => (EmbeddingModel::MultilingualE5Small, 384),
            "multilingual-e5-base" => (EmbeddingModel::MultilingualE5Base, 768),
            "multilingual-e5-large" => (EmbeddingModel::MultilingualE5Large, 1024),
            "paraphrase-multilingual-minilm-l12-v2" => {
                (EmbeddingModel::ParaphraseMLMiniLML12V2, 384)
            }
            "bge-small-en-v1.5" => (EmbeddingModel::BGESmallENV15, 384),
            "bge-base-en-v1.5" => (EmbeddingModel::BGEBaseENV15, 768),
            "all-minilm-l6-v2" => (EmbeddingModel::AllMiniLML6V2, 384),
            other => {
                return Err(EmbedError::invalid_config(format!(
                    "unknown embedding model '{other}'"
                )));
            }
        };
        Ok(ModelSpec { model, dimension })
    }

    /// Checks the configuration without loading anything.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EmbedError::invalid_config("batch_size must be at least 1"));
        }
        match self.provider {
            ProviderKind::FastEmbed => self.resolve_model().map(|_| ()),
            ProviderKind::Hashing if self.dimension == 0 => Err(EmbedError::invalid_config(
                "hashing dimension must be at least 1",
            )),
            ProviderKind::Hashing => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EmbedConfig::default();
        assert_eq!(config.provider, ProviderKind::FastEmbed);
        assert_eq!(config.model_name(), "multilingual-e5-small");
        assert_eq!(config.model_id(), "fastembed:multilingual-e5-small");
        assert_eq!(config.resolve_model().unwrap().dimension, 384);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_model_is_rejected() {
        let config = EmbedConfig {
            model_name: "not-a-model".to_string(),
            ..EmbedConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EmbedError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_hashing_config() {
        let config = EmbedConfig::hashing(128);
        assert_eq!(config.model_id(), "hashing:128");
        assert!(config.validate().is_ok());
        assert!(EmbedConfig::hashing(0).validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: EmbedConfig =
            serde_json::from_str(r#"{"provider": "hashing", "dimension": 64}"#).unwrap();
        assert_eq!(config.provider, ProviderKind::Hashing);
        assert_eq!(config.dimension, 64);
        assert_eq!(config.batch_size, 32);
    }
}
