//! Turning document files into plain UTF-8 text.
//!
//! Each supported format has an [`Extractor`]; the [`ExtractorRegistry`] picks
//! one by [`FormatTag`] and runs it on the blocking thread pool. Formats are
//! identified by file extension, with content sniffing for files that have none.
//!
//! | Category | Formats |
//! |---|---|
//! | PDF | `.pdf` |
//! | Word | `.docx`, `.doc` |
//! | Excel | `.xlsx`, `.xls` |
//! | Text | `.txt`, `.md`, `.markdown` |
//! | Data | `.json`, `.csv` |
//! | OpenDocument | `.odt` |

pub mod legacy;
pub mod ocr;
pub mod office;
pub mod pdf;
pub mod registry;
pub mod structured;
pub mod text;

use crate::error::ExtractionError;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;

pub use ocr::{NoOcr, OcrEngine, TesseractOcr};
pub use registry::ExtractorRegistry;

/// Magic number of OLE2 compound files (legacy `.doc` / `.xls`).
pub(crate) const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Format of a document, stored on its index record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatTag {
    Text,
    Markdown,
    Json,
    Csv,
    Pdf,
    Docx,
    Doc,
    Xlsx,
    Xls,
    Odt,
}

impl FormatTag {
    pub const ALL: [FormatTag; 10] = [
        FormatTag::Text,
        FormatTag::Markdown,
        FormatTag::Json,
        FormatTag::Csv,
        FormatTag::Pdf,
        FormatTag::Docx,
        FormatTag::Doc,
        FormatTag::Xlsx,
        FormatTag::Xls,
        FormatTag::Odt,
    ];

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "txt" => Some(FormatTag::Text),
            "md" | "markdown" => Some(FormatTag::Markdown),
            "json" => Some(FormatTag::Json),
            "csv" => Some(FormatTag::Csv),
            "pdf" => Some(FormatTag::Pdf),
            "docx" => Some(FormatTag::Docx),
            "doc" => Some(FormatTag::Doc),
            "xlsx" => Some(FormatTag::Xlsx),
            "xls" => Some(FormatTag::Xls),
            "odt" => Some(FormatTag::Odt),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Identifies a format from file content alone.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF-") {
            return Some(FormatTag::Pdf);
        }
        if bytes.starts_with(b"PK\x03\x04") {
            return sniff_zip(bytes);
        }
        if bytes.starts_with(&OLE_MAGIC) {
            if contains_utf16(bytes, "WordDocument") {
                return Some(FormatTag::Doc);
            }
            if contains_utf16(bytes, "Workbook") || contains_utf16(bytes, "Book") {
                return Some(FormatTag::Xls);
            }
            return None;
        }
        if !bytes.contains(&0) && std::str::from_utf8(bytes).is_ok() {
            return Some(FormatTag::Text);
        }
        None
    }

    /// Format of a file: by extension when it has one, by content otherwise.
    /// Unknown extensions are never sniffed.
    pub fn detect(path: &Path, bytes: &[u8]) -> Option<Self> {
        match path.extension() {
            Some(_) => Self::from_path(path),
            None => Self::sniff(bytes),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FormatTag::Text => "text",
            FormatTag::Markdown => "markdown",
            FormatTag::Json => "json",
            FormatTag::Csv => "csv",
            FormatTag::Pdf => "pdf",
            FormatTag::Docx => "docx",
            FormatTag::Doc => "doc",
            FormatTag::Xlsx => "xlsx",
            FormatTag::Xls => "xls",
            FormatTag::Odt => "odt",
        }
    }

    pub fn category(&self) -> DocumentCategory {
        match self {
            FormatTag::Pdf => DocumentCategory::Pdf,
            FormatTag::Docx | FormatTag::Doc => DocumentCategory::Word,
            FormatTag::Xlsx | FormatTag::Xls => DocumentCategory::Excel,
            FormatTag::Text | FormatTag::Markdown => DocumentCategory::Text,
            FormatTag::Json | FormatTag::Csv => DocumentCategory::Data,
            FormatTag::Odt => DocumentCategory::OpenDocument,
        }
    }
}

impl std::fmt::Display for FormatTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FormatTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FormatTag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| format!("unknown format: {s}"))
    }
}

/// Grouping used when listing documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DocumentCategory {
    #[serde(rename = "PDF")]
    Pdf,
    Word,
    Excel,
    Text,
    Data,
    OpenDocument,
}

impl DocumentCategory {
    pub fn label(&self) -> &'static str {
        match self {
            DocumentCategory::Pdf => "PDF",
            DocumentCategory::Word => "Word",
            DocumentCategory::Excel => "Excel",
            DocumentCategory::Text => "Text",
            DocumentCategory::Data => "Data",
            DocumentCategory::OpenDocument => "OpenDocument",
        }
    }
}

/// Converts one family of formats to text.
///
/// Implementations are synchronous and may be CPU heavy; the registry runs them
/// on the blocking pool. They receive the bytes the indexer already read (and
/// hashed) so the file is read once per indexing attempt.
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_handle(&self, format: FormatTag) -> bool;

    fn extract(&self, path: &Path, bytes: &[u8]) -> Result<String, ExtractionError>;
}

fn sniff_zip(bytes: &[u8]) -> Option<FormatTag> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).ok()?;
    if archive.by_name("word/document.xml").is_ok() {
        return Some(FormatTag::Docx);
    }
    if archive.by_name("xl/workbook.xml").is_ok() {
        return Some(FormatTag::Xlsx);
    }
    let mimetype = office::read_zip_entry_bounded(&mut archive, "mimetype", 1024).ok()?;
    (mimetype.trim_ascii() == b"application/vnd.oasis.opendocument.text").then_some(FormatTag::Odt)
}

fn contains_utf16(haystack: &[u8], needle: &str) -> bool {
    let encoded: Vec<u8> = needle.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
    haystack
        .windows(encoded.len())
        .any(|window| window == encoded.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::office::tests::zip_with;

    #[test]
    fn test_from_extension_is_case_insensitive() {
        assert_eq!(FormatTag::from_extension("PDF"), Some(FormatTag::Pdf));
        assert_eq!(FormatTag::from_extension("Md"), Some(FormatTag::Markdown));
        assert_eq!(FormatTag::from_extension("exe"), None);
    }

    #[test]
    fn test_sniff_formats() {
        assert_eq!(FormatTag::sniff(b"%PDF-1.7\n..."), Some(FormatTag::Pdf));
        assert_eq!(FormatTag::sniff(b"plain words"), Some(FormatTag::Text));
        assert_eq!(FormatTag::sniff(&[0x00, 0xFF, 0x10]), None);

        let docx = zip_with(&[("word/document.xml", b"<w:document/>")]);
        assert_eq!(FormatTag::sniff(&docx), Some(FormatTag::Docx));

        let xlsx = zip_with(&[("xl/workbook.xml", b"<workbook/>")]);
        assert_eq!(FormatTag::sniff(&xlsx), Some(FormatTag::Xlsx));

        let odt = zip_with(&[("mimetype", b"application/vnd.oasis.opendocument.text")]);
        assert_eq!(FormatTag::sniff(&odt), Some(FormatTag::Odt));

        let mut doc = OLE_MAGIC.to_vec();
        doc.extend("WordDocument".encode_utf16().flat_map(|u| u.to_le_bytes()));
        assert_eq!(FormatTag::sniff(&doc), Some(FormatTag::Doc));
    }

    #[test]
    fn test_detect_prefers_extension() {
        assert_eq!(
            FormatTag::detect(Path::new("notes.md"), b"%PDF-1.4"),
            Some(FormatTag::Markdown)
        );
        assert_eq!(
            FormatTag::detect(Path::new("README"), b"hello"),
            Some(FormatTag::Text)
        );
        assert_eq!(FormatTag::detect(Path::new("image.png"), b"hello"), None);
    }

    #[test]
    fn test_categories() {
        assert_eq!(FormatTag::Doc.category(), DocumentCategory::Word);
        assert_eq!(FormatTag::Csv.category(), DocumentCategory::Data);
        assert_eq!(FormatTag::Odt.category().label(), "OpenDocument");
        assert_eq!("xlsx".parse::<FormatTag>().unwrap(), FormatTag::Xlsx);
    }
}
