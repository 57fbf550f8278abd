//! Best-effort text recovery from legacy binary `.doc` and `.xls` files.
//!
//! The OLE2 container is not parsed. Instead the raw bytes are scanned for runs
//! of printable UTF-16LE and 8-bit text, which is where Word and Excel keep
//! document text and shared strings. Formatting, ordering across streams and
//! numeric cells are lost, and only Latin-script text is recovered.

use super::text::decode_cp1252;
use super::{Extractor, FormatTag, OLE_MAGIC};
use crate::error::ExtractionError;
use std::collections::HashSet;
use std::path::Path;

/// Shorter runs are almost always binary noise.
const MIN_RUN_CHARS: usize = 8;

/// Names of OLE streams and storages that show up as UTF-16 runs.
const CONTAINER_NAMES: &[&str] = &[
    "Root Entry",
    "WordDocument",
    "SummaryInformation",
    "DocumentSummaryInformation",
    "CompObj",
    "Workbook",
    "1Table",
    "0Table",
    "ObjectPool",
];

#[derive(Debug, Default, Clone, Copy)]
pub struct LegacyOfficeExtractor;

impl Extractor for LegacyOfficeExtractor {
    fn name(&self) -> &'static str {
        "legacy-office"
    }

    fn can_handle(&self, format: FormatTag) -> bool {
        matches!(format, FormatTag::Doc | FormatTag::Xls)
    }

    fn extract(&self, _path: &Path, bytes: &[u8]) -> Result<String, ExtractionError> {
        if !bytes.starts_with(&OLE_MAGIC) {
            return Err(ExtractionError::corrupt(
                "ole",
                "missing compound file signature",
            ));
        }

        let mut seen = HashSet::new();
        let runs: Vec<String> = utf16_runs(bytes)
            .into_iter()
            .chain(byte_runs(bytes))
            .map(|run| run.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|run| is_meaningful(run))
            .filter(|run| seen.insert(run.clone()))
            .collect();

        if runs.is_empty() {
            return Err(ExtractionError::corrupt("ole", "no recoverable text"));
        }
        Ok(runs.join("\n"))
    }
}

fn is_printable(c: char) -> bool {
    !c.is_control() || c == '\t' || c == '\n' || c == '\r'
}

/// Misaligned UTF-16 decoding yields CJK-looking noise, so only Latin letters
/// count towards a run being text.
fn is_latin_letter(c: char) -> bool {
    c.is_alphabetic() && (c as u32) < 0x0250
}

fn is_meaningful(run: &str) -> bool {
    run.chars().count() >= MIN_RUN_CHARS
        && run.chars().filter(|&c| is_latin_letter(c)).count() * 2 >= run.chars().count()
        && !CONTAINER_NAMES.iter().any(|name| run.contains(name))
}

fn utf16_runs(bytes: &[u8]) -> Vec<String> {
    let mut runs = Vec::new();
    // Text may start at either byte parity.
    for offset in 0..2 {
        let units = bytes[offset.min(bytes.len())..]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
        let mut current = String::new();
        for decoded in char::decode_utf16(units) {
            match decoded {
                Ok(c) if is_printable(c) && c != '\0' => current.push(c),
                _ => flush(&mut current, &mut runs),
            }
        }
        flush(&mut current, &mut runs);
    }
    runs
}

fn byte_runs(bytes: &[u8]) -> Vec<String> {
    let mut runs = Vec::new();
    let mut start = None;
    for (i, &b) in bytes.iter().enumerate() {
        let printable = matches!(b, 0x20..=0x7E | b'\t' | b'\n' | b'\r' | 0xA0..=0xFF);
        match (printable, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                let mut run = decode_cp1252(&bytes[s..i]);
                flush(&mut run, &mut runs);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        let mut run = decode_cp1252(&bytes[s..]);
        flush(&mut run, &mut runs);
    }
    runs
}

fn flush(current: &mut String, runs: &mut Vec<String>) {
    if current.trim().chars().count() >= MIN_RUN_CHARS {
        runs.push(current.trim().to_string());
    }
    current.clear();
}
