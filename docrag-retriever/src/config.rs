//! Service configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) is a valid
//! configuration. A minimal file:
//!
//! ```toml
//! [index]
//! root = "/srv/documents"
//!
//! [embedding]
//! provider = "fastembed"
//! model = "multilingual-e5-small"
//!
//! [extraction]
//! ocr_engine = "tesseract"
//! ```

use crate::error::ConfigError;
use docrag_context::ChunkerConfig;
use docrag_embed::EmbedConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the index database created inside the watched root when no explicit
/// path is configured. Hidden, so the indexer never picks it up as a document.
pub const DEFAULT_DATABASE_NAME: &str = ".docrag.db";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DocragConfig {
    pub index: IndexConfig,
    pub watcher: WatcherConfig,
    pub chunking: ChunkerConfig,
    pub embedding: EmbedConfig,
    pub indexing: IndexingConfig,
    pub extraction: ExtractionConfig,
    pub retrieval: RetrievalConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Directory tree to index.
    pub root: PathBuf,
    /// SQLite file. Defaults to `<root>/.docrag.db`.
    pub database: Option<PathBuf>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            database: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Window within which repeated events for one path coalesce.
    pub debounce_ms: u64,
    /// Period of the background reconcile. Zero disables it.
    pub reconcile_interval_secs: u64,
    /// Capacity of the event channel between the watcher and the indexer.
    pub channel_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 2000,
            reconcile_interval_secs: 300,
            channel_capacity: 1024,
        }
    }
}

impl WatcherConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn reconcile_interval(&self) -> Option<Duration> {
        (self.reconcile_interval_secs > 0).then(|| Duration::from_secs(self.reconcile_interval_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Documents taken from the queue per processing round.
    pub batch_size: usize,
    /// Documents indexed concurrently within a round.
    pub max_workers: usize,
    /// Files larger than this fail extraction without being read.
    pub max_file_bytes: u64,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            max_workers: 4,
            max_file_bytes: 100 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OcrEngineKind {
    #[default]
    None,
    Tesseract,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// PDF pages with fewer non-whitespace characters than this are treated as
    /// scanned and have their images sent through OCR.
    pub min_page_chars: usize,
    pub ocr_engine: OcrEngineKind,
    /// Tesseract language string.
    pub ocr_languages: String,
    pub tesseract_binary: PathBuf,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_page_chars: 32,
            ocr_engine: OcrEngineKind::None,
            ocr_languages: "eng+fra".to_string(),
            tesseract_binary: PathBuf::from("tesseract"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    /// Matches scoring below this cosine similarity are dropped.
    pub min_score: f32,
    /// Maximum characters of chunk text returned per passage.
    pub excerpt_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_score: 0.3,
            excerpt_chars: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl DocragConfig {
    /// Reads and validates a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&raw)?;

        // Relative paths are resolved against the config file's directory.
        if let Some(parent) = path.parent() {
            if config.index.root.is_relative() {
                config.index.root = parent.join(&config.index.root);
            }
            if let Some(database) = config.index.database.as_mut() {
                if database.is_relative() {
                    *database = parent.join(&*database);
                }
            }
        }
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration rooted at `root` with every other value defaulted.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            index: IndexConfig {
                root: root.into(),
                database: None,
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking.validate()?;
        self.embedding.validate()?;
        if self.indexing.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "indexing.batch_size must be at least 1".into(),
            ));
        }
        if self.indexing.max_workers == 0 {
            return Err(ConfigError::Invalid(
                "indexing.max_workers must be at least 1".into(),
            ));
        }
        if self.watcher.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "watcher.channel_capacity must be at least 1".into(),
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Invalid("retrieval.top_k must be at least 1".into()));
        }
        if !(-1.0..=1.0).contains(&self.retrieval.min_score) {
            return Err(ConfigError::Invalid(
                "retrieval.min_score must be within [-1, 1]".into(),
            ));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.index
            .database
            .clone()
            .unwrap_or_else(|| self.index.root.join(DEFAULT_DATABASE_NAME))
    }
}
