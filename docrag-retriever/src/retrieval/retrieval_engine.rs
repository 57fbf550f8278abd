use super::enhanced_index::EnhancedFileIndex;
use crate::error::RetrievalError;
use docrag_embed::EmbedderHandle;
use serde::Serialize;
use tracing::debug;

/// Rendered context when nothing relevant was found.
pub const NO_CONTEXT_MESSAGE: &str = "No relevant documents found in the knowledge base.";

/// A ranked passage with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedPassage {
    pub chunk_id: i64,
    pub score: f32,
    pub source_path: String,
    pub sequence: usize,
    /// Character offsets of the chunk in the extracted text
    pub start: usize,
    pub end: usize,
    /// Hash of the document revision the chunk came from
    pub content_hash: String,
    pub excerpt: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub question: String,
    /// Descending score, ties by ascending chunk sequence
    pub passages: Vec<RetrievedPassage>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    /// Passages as `[Source: <path>]` blocks, ready to hand to a generator.
    pub fn context(&self) -> String {
        if self.passages.is_empty() {
            return NO_CONTEXT_MESSAGE.to_string();
        }
        self.passages
            .iter()
            .map(|p| format!("[Source: {}]\n{}", p.source_path, p.excerpt))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Answers questions from the index. Runs on the caller's task and never
/// waits for the indexing loop.
#[derive(Clone)]
pub struct RetrievalEngine {
    index: EnhancedFileIndex,
    embedder: EmbedderHandle,
    excerpt_chars: usize,
}

impl RetrievalEngine {
    pub fn new(index: EnhancedFileIndex, embedder: EmbedderHandle, excerpt_chars: usize) -> Self {
        Self {
            index,
            embedder,
            excerpt_chars,
        }
    }

    /// The `top_k` passages most similar to `question` scoring at least
    /// `min_score`. An empty result is not an error.
    pub async fn retrieve(
        &self,
        question: &str,
        top_k: usize,
        min_score: f32,
    ) -> Result<RetrievalResult, RetrievalError> {
        let question = question.trim();
        if question.is_empty() {
            return Ok(RetrievalResult::default());
        }

        let vector = self.embedder.embed_text(question).await?;
        let matches = self.index.query(&vector, top_k).await?;
        let considered = matches.len();

        let passages: Vec<RetrievedPassage> = matches
            .into_iter()
            .filter(|m| m.score >= min_score)
            .map(|m| RetrievedPassage {
                chunk_id: m.chunk_id,
                score: m.score,
                excerpt: excerpt(&m.content, self.excerpt_chars),
                source_path: m.relative_path,
                sequence: m.sequence,
                start: m.start,
                end: m.end,
                content_hash: m.document_hash,
            })
            .collect();

        debug!(
            "Retrieved {} of {} candidates above {:.2} for {:?}",
            passages.len(),
            considered,
            min_score,
            question
        );
        Ok(RetrievalResult {
            question: question.to_string(),
            passages,
        })
    }
}

/// At most `max_chars` characters of `text`, cut back to a word boundary and
/// marked with `…` when shortened.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let cut = text
        .char_indices()
        .nth(max_chars)
        .map_or(text.len(), |(i, _)| i);
    let prefix = &text[..cut];
    let at_word = match prefix.rfind(char::is_whitespace) {
        Some(space) if space > 0 => &prefix[..space],
        _ => prefix,
    };
    format!("{}…", at_word.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::FormatTag;
    use crate::retrieval::enhanced_index::{ChunkEntry, DocumentRevision};
    use crate::retrieval::file_index::FileStamp;
    use anyhow::Result;
    use docrag_embed::{EmbeddingProvider, HashingProvider};
    use std::sync::Arc;

    async fn engine_with(docs: &[(&str, &[&str])]) -> Result<RetrievalEngine> {
        let embedder: EmbedderHandle = Arc::new(HashingProvider::new(256));
        let index = EnhancedFileIndex::open_memory().await?;
        let model = embedder.model_id();
        index.ensure_model(&model).await?;

        for (path, chunks) in docs {
            let stamp = FileStamp {
                size: 1,
                modified_ms: 1,
            };
            let id = index.begin_indexing(path, FormatTag::Text, stamp).await?;
            let mut entries = Vec::new();
            for (sequence, content) in chunks.iter().enumerate() {
                entries.push(ChunkEntry {
                    sequence,
                    start: 0,
                    end: content.chars().count(),
                    overlap: 0,
                    content: content.to_string(),
                    embedding: embedder.embed_text(content).await?,
                });
            }
            let revision = DocumentRevision {
                content_hash: format!("hash-{path}"),
                size: 1,
                modified_ms: 1,
            };
            index.replace_document(id, &revision, &entries, &model).await?;
        }
        Ok(RetrievalEngine::new(index, embedder, 500))
    }

    #[tokio::test]
    async fn test_retrieve_ranks_relevant_passage_first() -> Result<()> {
        let engine = engine_with(&[
            ("a.txt", &["Paris is the capital of France."]),
            ("b.txt", &["Bananas are rich in potassium."]),
        ])
        .await?;

        let result = engine
            .retrieve("What is the capital of France?", 5, 0.3)
            .await?;
        assert!(!result.is_empty());
        assert_eq!(result.passages[0].source_path, "a.txt");
        assert!(result.passages[0].score >= 0.3);
        assert_eq!(result.passages[0].content_hash, "hash-a.txt");
        assert!(result.passages.iter().all(|p| p.source_path != "b.txt"));
        assert!(
            result
                .passages
                .windows(2)
                .all(|w| w[0].score >= w[1].score)
        );
        assert!(result.context().starts_with("[Source: a.txt]\nParis"));
        Ok(())
    }

    #[tokio::test]
    async fn test_blank_question_and_empty_index() -> Result<()> {
        let engine = engine_with(&[]).await?;
        let blank = engine.retrieve("   ", 5, 0.0).await?;
        assert!(blank.is_empty());

        let none = engine.retrieve("anything at all", 5, 0.0).await?;
        assert!(none.is_empty());
        assert_eq!(none.context(), NO_CONTEXT_MESSAGE);
        Ok(())
    }

    #[tokio::test]
    async fn test_top_k_bounds_results() -> Result<()> {
        let engine = engine_with(&[(
            "notes.txt",
            &[
                "France borders Spain.",
                "France borders Italy.",
                "France borders Belgium.",
            ],
        )])
        .await?;
        let result = engine.retrieve("France borders", 2, -1.0).await?;
        assert_eq!(result.len(), 2);
        Ok(())
    }

    #[test]
    fn test_excerpt_cuts_at_word_boundary() {
        assert_eq!(excerpt("short text", 50), "short text");
        assert_eq!(excerpt("the quick brown fox", 12), "the quick…");
        assert_eq!(excerpt("unbreakable", 4), "unbr…");
        assert_eq!(excerpt("héllo wörld", 8), "héllo…");
    }
}
