//! OCR capability used for scanned PDF pages and images embedded in office
//! documents.

use crate::config::{ExtractionConfig, OcrEngineKind};
use crate::error::OcrError;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::{debug, warn};

/// Recognizes text in an encoded image (JPEG, PNG, PNM, JPEG 2000, ...).
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether calling [`recognize`](Self::recognize) can produce text at all.
    /// Extractors skip collecting images when it cannot.
    fn is_enabled(&self) -> bool {
        true
    }

    fn recognize(&self, image: &[u8]) -> Result<String, OcrError>;
}

/// OCR disabled: recognizes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOcr;

impl OcrEngine for NoOcr {
    fn name(&self) -> &'static str {
        "none"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    fn recognize(&self, _image: &[u8]) -> Result<String, OcrError> {
        Ok(String::new())
    }
}

/// Runs the `tesseract` command line tool, feeding the image on stdin.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    binary: PathBuf,
    languages: String,
}

impl TesseractOcr {
    pub fn new(binary: impl Into<PathBuf>, languages: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            languages: languages.into(),
        }
    }
}

impl OcrEngine for TesseractOcr {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn recognize(&self, image: &[u8]) -> Result<String, OcrError> {
        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", &self.languages])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    OcrError::Unavailable(format!("{} not found", self.binary.display()))
                }
                _ => OcrError::Io(e),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(image) {
                // Usually a broken pipe: tesseract exited without reading.
                drop(stdin);
                let _ = child.kill();
                let _ = child.wait();
                return Err(OcrError::Io(e));
            }
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(OcrError::Failed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

pub fn build_ocr_engine(config: &ExtractionConfig) -> Arc<dyn OcrEngine> {
    match config.ocr_engine {
        OcrEngineKind::None => Arc::new(NoOcr),
        OcrEngineKind::Tesseract => Arc::new(TesseractOcr::new(
            config.tesseract_binary.clone(),
            config.ocr_languages.clone(),
        )),
    }
}

/// Runs OCR and swallows failures, which only ever cost the image's text.
pub fn recognize_or_empty(engine: &dyn OcrEngine, image: &[u8], origin: &str) -> String {
    match engine.recognize(image) {
        Ok(text) => {
            debug!("OCR recognized {} chars in {}", text.len(), origin);
            text
        }
        Err(e) => {
            warn!("OCR failed for {} ({}): {}", origin, engine.name(), e);
            String::new()
        }
    }
}
