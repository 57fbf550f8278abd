//! Deterministic feature-hashing embeddings.
//!
//! Each lowercase alphanumeric token is hashed with FNV into one of `dimension`
//! buckets, with the sign taken from a separate hash bit. The resulting bag of
//! words vector is L2-normalized. Texts sharing vocabulary score high under
//! cosine similarity, which is enough for offline runs and tests without a model.

use crate::error::Result;
use crate::provider::{EmbeddingProvider, EmbeddingResult, normalize_to_f16};
use async_trait::async_trait;
use fnv::FnvHasher;
use half::f16;
use std::hash::Hasher;

#[derive(Debug, Clone)]
pub struct HashingProvider {
    dimension: usize,
}

impl HashingProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn embed_sync(&self, text: &str) -> Vec<f16> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokens(text) {
            let mut hasher = FnvHasher::default();
            hasher.write(token.as_bytes());
            let hash = hasher.finish();
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        normalize_to_f16(vector)
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>> {
        Ok(self.embed_sync(text))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        Ok(EmbeddingResult::new(
            texts.iter().map(|text| self.embed_sync(text)).collect(),
        ))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "hashing"
    }

    fn model_id(&self) -> String {
        format!("hashing:{}", self.dimension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::cosine_similarity;

    #[tokio::test]
    async fn test_shared_vocabulary_scores_higher() -> Result<()> {
        let provider = HashingProvider::new(384);
        let doc = provider.embed_text("Paris is the capital of France.").await?;
        let query = provider.embed_text("What is the capital of France?").await?;
        let other = provider.embed_text("Quarterly revenue grew by ten percent").await?;

        let related = cosine_similarity(&doc, &query);
        assert!(related > 0.5, "related score {related}");
        assert!(related > cosine_similarity(&doc, &other));
        Ok(())
    }

    #[tokio::test]
    async fn test_batch_matches_single_and_is_deterministic() -> Result<()> {
        let provider = HashingProvider::new(64);
        let texts = vec!["alpha beta".to_string(), "gamma".to_string()];
        let batch = provider.embed_texts(&texts).await?;

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.dimension, 64);
        assert_eq!(batch.embeddings[0], provider.embed_text("alpha beta").await?);
        assert_eq!(batch.embeddings[1], provider.embed_text("gamma").await?);
        assert_eq!(provider.model_id(), "hashing:64");
        Ok(())
    }

    #[test]
    fn test_case_and_punctuation_are_ignored() {
        let provider = HashingProvider::new(32);
        assert_eq!(
            provider.embed_sync("Hello, World!"),
            provider.embed_sync("hello world")
        );
        assert!(provider.embed_sync("").iter().all(|v| v.to_f32() == 0.0));
    }
}
