use super::legacy::LegacyOfficeExtractor;
use super::ocr::build_ocr_engine;
use super::office::{DocxExtractor, OdtExtractor, XlsxExtractor};
use super::pdf::PdfExtractor;
use super::structured::{CsvExtractor, JsonExtractor};
use super::text::PlainTextExtractor;
use super::{Extractor, FormatTag};
use crate::config::ExtractionConfig;
use crate::error::ExtractionError;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Maps formats to extractors. Later registrations take precedence, so a
/// default can be overridden by registering a replacement.
#[derive(Clone)]
pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn Extractor>>,
    max_file_bytes: u64,
}

impl ExtractorRegistry {
    pub fn new(max_file_bytes: u64) -> Self {
        Self {
            extractors: Vec::new(),
            max_file_bytes,
        }
    }

    /// Registry with an extractor for every supported format.
    pub fn with_defaults(config: &ExtractionConfig, max_file_bytes: u64) -> Self {
        let ocr = build_ocr_engine(config);
        let mut registry = Self::new(max_file_bytes);
        registry.register(Arc::new(PlainTextExtractor));
        registry.register(Arc::new(JsonExtractor));
        registry.register(Arc::new(CsvExtractor));
        registry.register(Arc::new(PdfExtractor::new(ocr.clone(), config.min_page_chars)));
        registry.register(Arc::new(DocxExtractor::new(ocr.clone())));
        registry.register(Arc::new(XlsxExtractor));
        registry.register(Arc::new(OdtExtractor::new(ocr)));
        registry.register(Arc::new(LegacyOfficeExtractor));
        registry
    }

    pub fn register(&mut self, extractor: Arc<dyn Extractor>) {
        self.extractors.push(extractor);
    }

    pub fn find(&self, format: FormatTag) -> Option<Arc<dyn Extractor>> {
        self.extractors
            .iter()
            .rev()
            .find(|extractor| extractor.can_handle(format))
            .cloned()
    }

    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_bytes
    }

    /// Extracts `bytes` (the content of `path`) on the blocking pool.
    pub async fn extract(
        &self,
        path: PathBuf,
        bytes: Vec<u8>,
        format: FormatTag,
    ) -> Result<String, ExtractionError> {
        let size = bytes.len() as u64;
        if size > self.max_file_bytes {
            return Err(ExtractionError::TooLarge {
                size,
                limit: self.max_file_bytes,
            });
        }
        let extractor = self
            .find(format)
            .ok_or_else(|| ExtractionError::Unsupported(format.to_string()))?;

        debug!("Extracting {} with {}", path.display(), extractor.name());
        tokio::task::spawn_blocking(move || extractor.extract(&path, &bytes)).await?
    }
}
