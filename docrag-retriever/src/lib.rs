//! docrag-retriever: incremental document indexing and passage retrieval
//!
//! Watches a directory of office documents, PDFs and text files, keeps a
//! SQLite index of embedded text chunks current as files change, and answers
//! questions with the most similar passages and their sources. Generating an
//! answer from those passages is left to the caller.
//!
//! ## Key Modules
//!
//! - **[`extract`]**: format detection and per-format text extraction, with OCR
//!   for scanned pages and embedded images
//! - **[`retrieval`]**: change detection, the indexing pipeline, the SQLite
//!   index and the retrieval engine
//! - **[`status`]**: index status, document listings and cache statistics
//! - **[`service`]**: wires everything together and owns the background tasks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docrag_retriever::{config::DocragConfig, service::DocragService};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let service = DocragService::start(DocragConfig::for_root("/srv/documents")).await?;
//!
//! let result = service.retrieve("What is the capital of France?", None, None).await?;
//! println!("{}", result.context());
//!
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Files → ChangeDetector → TaskQueue → Extractors → Chunker → Embedder → SQLite
//!                                                                          ↓
//!                                   Question → Embedder → RetrievalEngine ← query
//! ```

pub mod config;
pub mod error;
pub mod extract;
pub mod retrieval;
pub mod service;
pub mod status;
