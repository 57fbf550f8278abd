//! PDF text extraction with OCR for scanned pages.
//!
//! Text is read page by page with lopdf. A page whose text layer has fewer than
//! `min_page_chars` non-whitespace characters is treated as scanned: its images
//! are decoded and sent through the OCR engine. When lopdf finds no text at all
//! the whole document is retried with pdf-extract, which handles more font
//! encodings.

use super::ocr::{OcrEngine, recognize_or_empty};
use super::{Extractor, FormatTag};
use crate::error::ExtractionError;
use flate2::read::ZlibDecoder;
use lopdf::Document;
use lopdf::xobject::PdfImage;
use std::io::Read;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

const MAX_OCR_IMAGES_PER_PAGE: usize = 8;
const MIN_IMAGE_DIMENSION: i64 = 50;

pub struct PdfExtractor {
    ocr: Arc<dyn OcrEngine>,
    min_page_chars: usize,
}

impl PdfExtractor {
    pub fn new(ocr: Arc<dyn OcrEngine>, min_page_chars: usize) -> Self {
        Self {
            ocr,
            min_page_chars,
        }
    }

    fn page_text(&self, doc: &Document, path: &Path, page_num: u32, page_id: lopdf::ObjectId) -> String {
        let text = match doc.extract_text(&[page_num]) {
            Ok(text) => text,
            Err(e) => {
                debug!("No text layer on page {} of {}: {}", page_num, path.display(), e);
                String::new()
            }
        };

        let density = text.chars().filter(|c| !c.is_whitespace()).count();
        if density >= self.min_page_chars || !self.ocr.is_enabled() {
            return text;
        }

        let images = match doc.get_page_images(page_id) {
            Ok(images) => images,
            Err(e) => {
                debug!("Cannot list images on page {} of {}: {}", page_num, path.display(), e);
                return text;
            }
        };

        let mut recognized = Vec::new();
        for image in images
            .iter()
            .filter(|image| image.width >= MIN_IMAGE_DIMENSION && image.height >= MIN_IMAGE_DIMENSION)
            .take(MAX_OCR_IMAGES_PER_PAGE)
        {
            let Some(encoded) = encode_for_ocr(image) else {
                continue;
            };
            let origin = format!("{} page {}", path.display(), page_num);
            let ocr_text = recognize_or_empty(self.ocr.as_ref(), &encoded, &origin);
            if !ocr_text.trim().is_empty() {
                recognized.push(ocr_text);
            }
        }

        if recognized.is_empty() {
            return text;
        }
        let mut page = text.trim().to_string();
        for ocr_text in recognized {
            if !page.is_empty() {
                page.push_str("\n\n");
            }
            page.push_str(ocr_text.trim());
        }
        page
    }
}

impl Extractor for PdfExtractor {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn can_handle(&self, format: FormatTag) -> bool {
        format == FormatTag::Pdf
    }

    fn extract(&self, path: &Path, bytes: &[u8]) -> Result<String, ExtractionError> {
        let doc = Document::load_mem(bytes).map_err(|e| ExtractionError::corrupt("pdf", e))?;

        let pages: Vec<String> = doc
            .get_pages()
            .into_iter()
            .map(|(page_num, page_id)| self.page_text(&doc, path, page_num, page_id))
            .filter(|page| !page.trim().is_empty())
            .collect();

        if !pages.is_empty() {
            return Ok(pages.join("\n\n"));
        }

        debug!("lopdf found no text in {}, trying pdf-extract", path.display());
        Ok(fallback_text(bytes, path))
    }
}

/// pdf-extract panics on some malformed inputs; a panic there costs only the
/// fallback text.
fn fallback_text(bytes: &[u8], path: &Path) -> String {
    match catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes))) {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            debug!("pdf-extract failed on {}: {}", path.display(), e);
            String::new()
        }
        Err(_) => {
            warn!("pdf-extract panicked on {}", path.display());
            String::new()
        }
    }
}

/// Bytes an OCR engine can read: JPEG and JPEG 2000 streams as stored,
/// Flate-compressed raw samples as a binary PNM image.
fn encode_for_ocr(image: &PdfImage<'_>) -> Option<Vec<u8>> {
    let filters = image.filters.as_deref().unwrap_or_default();
    if filters.iter().any(|f| f == "DCTDecode" || f == "JPXDecode") {
        return Some(image.content.to_vec());
    }

    let samples = if filters.iter().any(|f| f == "FlateDecode") {
        let mut decoded = Vec::new();
        if let Err(e) = ZlibDecoder::new(image.content).read_to_end(&mut decoded) {
            debug!("Cannot inflate image: {}", e);
            return None;
        }
        decoded
    } else if filters.is_empty() {
        image.content.to_vec()
    } else {
        debug!("Unsupported image filters for OCR: {:?}", filters);
        return None;
    };

    if image.bits_per_component.unwrap_or(8) != 8 {
        return None;
    }
    let (width, height) = (usize::try_from(image.width).ok()?, usize::try_from(image.height).ok()?);
    let pixels = width.checked_mul(height)?;
    match image.color_space.as_deref().unwrap_or("DeviceRGB") {
        "DeviceGray" | "Gray" | "CalGray" => Some(to_pnm(b"P5", width, height, samples.get(..pixels)?)),
        "DeviceCMYK" | "CMYK" => {
            let rgb = cmyk_to_rgb(samples.get(..pixels.checked_mul(4)?)?);
            Some(to_pnm(b"P6", width, height, &rgb))
        }
        _ => Some(to_pnm(b"P6", width, height, samples.get(..pixels.checked_mul(3)?)?)),
    }
}

fn to_pnm(magic: &[u8], width: usize, height: usize, samples: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() + 32);
    out.extend_from_slice(magic);
    out.extend_from_slice(format!("\n{width} {height}\n255\n").as_bytes());
    out.extend_from_slice(samples);
    out
}

fn cmyk_to_rgb(cmyk: &[u8]) -> Vec<u8> {
    cmyk.chunks_exact(4)
        .flat_map(|px| {
            let k = 255 - u16::from(px[3]);
            [0, 1, 2].map(|i| ((255 - u16::from(px[i])) * k / 255) as u8)
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::OcrError;
    use crate::extract::ocr::NoOcr;

    /// Single-page PDF whose content stream shows `phrase` in Helvetica.
    pub(crate) fn minimal_pdf_with_phrase(phrase: &str) -> Vec<u8> {
        let stream = format!("BT /F1 12 Tf 100 700 Td ({phrase}) Tj ET");
        let objects = [
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >>".to_string(),
            format!("<< /Length {} >>\nstream\n{}\nendstream", stream.len(), stream),
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
        ];

        let mut pdf = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(pdf.len());
            pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
        }
        let xref_offset = pdf.len();
        pdf.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
        for offset in offsets {
            pdf.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
        }
        pdf.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                xref_offset
            )
            .as_bytes(),
        );
        pdf
    }

    struct CountingOcr(std::sync::atomic::AtomicUsize);

    impl OcrEngine for CountingOcr {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn recognize(&self, _image: &[u8]) -> Result<String, OcrError> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok("recognized".into())
        }
    }

    #[test]
    fn test_extracts_text_layer() {
        let pdf = minimal_pdf_with_phrase("Paris is the capital of France");
        let text = PdfExtractor::new(Arc::new(NoOcr), 8)
            .extract(Path::new("a.pdf"), &pdf)
            .unwrap();
        assert!(text.contains("Paris is the capital of France"), "got {text:?}");
    }

    #[test]
    fn test_dense_pages_skip_ocr() {
        let ocr = Arc::new(CountingOcr(Default::default()));
        let pdf = minimal_pdf_with_phrase("Plenty of text on this page to count as dense");
        PdfExtractor::new(ocr.clone(), 8)
            .extract(Path::new("a.pdf"), &pdf)
            .unwrap();
        assert_eq!(ocr.0.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let err = PdfExtractor::new(Arc::new(NoOcr), 32)
            .extract(Path::new("a.pdf"), b"%PDF-1.4 truncated nonsense")
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Corrupt { format: "pdf", .. }));
    }

    #[test]
    fn test_pnm_encoding() {
        let pnm = to_pnm(b"P5", 2, 1, &[0, 255]);
        assert_eq!(pnm, b"P5\n2 1\n255\n\x00\xff");
        assert_eq!(cmyk_to_rgb(&[0, 0, 0, 0, 255, 255, 255, 255]), vec![255, 255, 255, 0, 0, 0]);
    }
}
