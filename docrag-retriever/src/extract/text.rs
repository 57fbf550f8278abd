//! Plain text and Markdown, with encoding detection.

use super::{Extractor, FormatTag};
use crate::error::ExtractionError;
use std::path::Path;

/// Code points for bytes 0x80..=0x9F in Windows-1252. Undefined slots map to
/// the C1 control of the same value, as browsers do.
const CP1252_HIGH: [char; 32] = [
    '\u{20AC}', '\u{81}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{8D}', '\u{017D}', '\u{8F}',
    '\u{90}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}', '\u{0153}', '\u{9D}', '\u{017E}', '\u{0178}',
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Windows1252,
}

/// Decodes bytes of unknown encoding.
///
/// Order: byte order mark, strict UTF-8, BOM-less UTF-16 (inferred from the
/// position of zero bytes), then Windows-1252 which accepts any input.
pub fn decode_text(bytes: &[u8]) -> (String, TextEncoding) {
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return (String::from_utf8_lossy(rest).into_owned(), TextEncoding::Utf8);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return (decode_utf16(rest, u16::from_le_bytes), TextEncoding::Utf16Le);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return (decode_utf16(rest, u16::from_be_bytes), TextEncoding::Utf16Be);
    }
    if let Ok(text) = std::str::from_utf8(bytes) {
        if !text.contains('\0') {
            return (text.to_string(), TextEncoding::Utf8);
        }
    }
    if let Some(encoding) = guess_utf16(bytes) {
        let text = match encoding {
            TextEncoding::Utf16Be => decode_utf16(bytes, u16::from_be_bytes),
            _ => decode_utf16(bytes, u16::from_le_bytes),
        };
        return (text, encoding);
    }
    (decode_cp1252(bytes), TextEncoding::Windows1252)
}

fn decode_utf16(bytes: &[u8], to_unit: fn([u8; 2]) -> u16) -> String {
    let units = bytes.chunks_exact(2).map(|pair| to_unit([pair[0], pair[1]]));
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Mostly-ASCII UTF-16 text has a zero in one byte of nearly every pair.
fn guess_utf16(bytes: &[u8]) -> Option<TextEncoding> {
    if bytes.len() < 4 || bytes.len() % 2 != 0 {
        return None;
    }
    let pairs = bytes.len() / 2;
    let (mut zero_even, mut zero_odd) = (0usize, 0usize);
    for pair in bytes.chunks_exact(2) {
        if pair[0] == 0 {
            zero_even += 1;
        }
        if pair[1] == 0 {
            zero_odd += 1;
        }
    }
    let threshold = pairs * 2 / 5;
    if zero_odd > threshold && zero_even * 10 < pairs {
        Some(TextEncoding::Utf16Le)
    } else if zero_even > threshold && zero_odd * 10 < pairs {
        Some(TextEncoding::Utf16Be)
    } else {
        None
    }
}

pub fn decode_cp1252(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| match b {
            0x80..=0x9F => CP1252_HIGH[(b - 0x80) as usize],
            _ => b as char,
        })
        .collect()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl Extractor for PlainTextExtractor {
    fn name(&self) -> &'static str {
        "plain-text"
    }

    fn can_handle(&self, format: FormatTag) -> bool {
        matches!(format, FormatTag::Text | FormatTag::Markdown)
    }

    fn extract(&self, path: &Path, bytes: &[u8]) -> Result<String, ExtractionError> {
        let (text, encoding) = decode_text(bytes);
        if encoding != TextEncoding::Utf8 {
            tracing::debug!("Decoded {} as {:?}", path.display(), encoding);
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_passthrough() {
        let (text, enc) = decode_text("Café à Paris".as_bytes());
        assert_eq!(text, "Café à Paris");
        assert_eq!(enc, TextEncoding::Utf8);
    }

    #[test]
    fn test_boms() {
        let (text, enc) = decode_text(b"\xEF\xBB\xBFhello");
        assert_eq!((text.as_str(), enc), ("hello", TextEncoding::Utf8));

        let mut le = vec![0xFF, 0xFE];
        le.extend("été".encode_utf16().flat_map(|u| u.to_le_bytes()));
        assert_eq!(decode_text(&le), ("été".to_string(), TextEncoding::Utf16Le));

        let mut be = vec![0xFE, 0xFF];
        be.extend("été".encode_utf16().flat_map(|u| u.to_be_bytes()));
        assert_eq!(decode_text(&be), ("été".to_string(), TextEncoding::Utf16Be));
    }

    #[test]
    fn test_bomless_utf16() {
        let le: Vec<u8> = "Plain report text"
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        assert_eq!(
            decode_text(&le),
            ("Plain report text".to_string(), TextEncoding::Utf16Le)
        );
    }

    #[test]
    fn test_windows_1252_fallback() {
        // "Déjà vu – €5" in Windows-1252
        let bytes = b"D\xE9j\xE0 vu \x96 \x805";
        let (text, enc) = decode_text(bytes);
        assert_eq!(text, "Déjà vu – €5");
        assert_eq!(enc, TextEncoding::Windows1252);
    }

    #[test]
    fn test_extractor_handles_text_formats() {
        let extractor = PlainTextExtractor;
        assert!(extractor.can_handle(FormatTag::Markdown));
        assert!(!extractor.can_handle(FormatTag::Pdf));
        assert_eq!(
            extractor
                .extract(Path::new("a.txt"), b"Paris is the capital of France.")
                .unwrap(),
            "Paris is the capital of France."
        );
    }
}
