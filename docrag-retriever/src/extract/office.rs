//! Zip-based office formats: DOCX, XLSX and ODT.
//!
//! Word-processing documents produce one block per paragraph and one line per
//! table row (cells joined by ` | `). Embedded pictures are sent through OCR
//! when an engine is configured. Spreadsheets produce a `--- Sheet: <name> ---`
//! header followed by one line per non-empty row.

use super::ocr::{OcrEngine, recognize_or_empty};
use super::{Extractor, FormatTag};
use crate::error::ExtractionError;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;

/// Maximum decompressed bytes read from a single zip entry.
pub(crate) const MAX_ZIP_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
const MAX_SHEETS: usize = 100;
const MAX_CELLS_PER_SHEET: usize = 100_000;
const MAX_OCR_IMAGES: usize = 50;
const OCR_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tif", "tiff"];

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn open_archive<'a>(bytes: &'a [u8], format: &'static str) -> Result<Archive<'a>, ExtractionError> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| ExtractionError::corrupt(format, e))
}

pub(crate) fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, String> {
    let entry = archive.by_name(name).map_err(|e| format!("{name}: {e}"))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| format!("{name}: {e}"))?;
    if out.len() as u64 >= max_bytes {
        return Err(format!("zip entry {name} exceeds {max_bytes} bytes"));
    }
    Ok(out)
}

/// Element names of a flowing-text XML vocabulary.
struct FlowVocabulary {
    paragraphs: &'static [&'static [u8]],
    /// When set, only text inside this element counts (`w:t`). Otherwise all
    /// text inside a paragraph does.
    text_run: Option<&'static [u8]>,
    tab: &'static [u8],
    line_breaks: &'static [&'static [u8]],
    space: Option<&'static [u8]>,
    row: &'static [u8],
    cell: &'static [u8],
}

const WORDPROCESSINGML: FlowVocabulary = FlowVocabulary {
    paragraphs: &[b"p"],
    text_run: Some(b"t"),
    tab: b"tab",
    line_breaks: &[b"br", b"cr"],
    space: None,
    row: b"tr",
    cell: b"tc",
};

const OPENDOCUMENT_TEXT: FlowVocabulary = FlowVocabulary {
    paragraphs: &[b"p", b"h"],
    text_run: None,
    tab: b"tab",
    line_breaks: &[b"line-break"],
    space: Some(b"s"),
    row: b"table-row",
    cell: b"table-cell",
};

#[derive(Debug, PartialEq)]
enum Block {
    Paragraph(String),
    Row(String),
}

fn join_blocks(blocks: &[Block]) -> String {
    let mut out = String::new();
    let mut previous_row = false;
    for block in blocks {
        let (text, is_row) = match block {
            Block::Paragraph(text) => (text, false),
            Block::Row(text) => (text, true),
        };
        if !out.is_empty() {
            out.push_str(if is_row && previous_row { "\n" } else { "\n\n" });
        }
        out.push_str(text);
        previous_row = is_row;
    }
    out
}

#[derive(Default)]
struct FlowState {
    blocks: Vec<Block>,
    paragraph: String,
    in_paragraph: bool,
    in_text_run: bool,
    row: Vec<String>,
    cell: String,
    in_cell: bool,
}

impl FlowState {
    fn inline(&mut self, vocabulary: &FlowVocabulary, name: &[u8]) {
        if !self.in_paragraph {
            return;
        }
        if name == vocabulary.tab {
            self.paragraph.push('\t');
        } else if vocabulary.line_breaks.contains(&name) {
            self.paragraph.push('\n');
        } else if vocabulary.space == Some(name) {
            self.paragraph.push(' ');
        }
    }

    fn end_paragraph(&mut self) {
        self.in_paragraph = false;
        let text = self.paragraph.trim();
        if text.is_empty() {
            return;
        }
        if self.in_cell {
            if !self.cell.is_empty() {
                self.cell.push(' ');
            }
            self.cell.push_str(text);
        } else {
            self.blocks.push(Block::Paragraph(text.to_string()));
        }
    }
}

fn flow_text(xml: &[u8], vocabulary: &FlowVocabulary) -> Result<Vec<Block>, quick_xml::Error> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut state = FlowState::default();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = e.local_name();
                let name = name.as_ref();
                if vocabulary.paragraphs.contains(&name) {
                    state.paragraph.clear();
                    state.in_paragraph = true;
                } else if vocabulary.text_run == Some(name) {
                    state.in_text_run = true;
                } else if name == vocabulary.row {
                    state.row.clear();
                } else if name == vocabulary.cell {
                    state.cell.clear();
                    state.in_cell = true;
                } else {
                    state.inline(vocabulary, name);
                }
            }
            Event::Empty(e) => state.inline(vocabulary, e.local_name().as_ref()),
            Event::Text(t) => {
                if state.in_paragraph && (vocabulary.text_run.is_none() || state.in_text_run) {
                    state.paragraph.push_str(&t.unescape()?);
                }
            }
            Event::End(e) => {
                let name = e.local_name();
                let name = name.as_ref();
                if vocabulary.paragraphs.contains(&name) {
                    state.end_paragraph();
                } else if vocabulary.text_run == Some(name) {
                    state.in_text_run = false;
                } else if name == vocabulary.cell {
                    state.in_cell = false;
                    let cell = std::mem::take(&mut state.cell);
                    state.row.push(cell.trim().to_string());
                } else if name == vocabulary.row {
                    let row = std::mem::take(&mut state.row);
                    if row.iter().any(|c| !c.is_empty()) {
                        state.blocks.push(Block::Row(row.join(" | ")));
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(state.blocks)
}

/// OCR text of the pictures stored under `prefix`, one block per picture.
fn ocr_pictures(
    archive: &mut Archive<'_>,
    prefix: &str,
    ocr: &dyn OcrEngine,
    path: &Path,
) -> Vec<Block> {
    if !ocr.is_enabled() {
        return Vec::new();
    }
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|name| name.starts_with(prefix))
        .filter(|name| {
            Path::new(name)
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| OCR_IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .map(str::to_string)
        .collect();
    names.sort();

    let mut blocks = Vec::new();
    for name in names.into_iter().take(MAX_OCR_IMAGES) {
        let image = match read_zip_entry_bounded(archive, &name, MAX_ZIP_ENTRY_BYTES) {
            Ok(image) => image,
            Err(e) => {
                tracing::debug!("Skipping picture in {}: {}", path.display(), e);
                continue;
            }
        };
        let origin = format!("{} ({})", path.display(), name);
        let text = recognize_or_empty(ocr, &image, &origin);
        if !text.trim().is_empty() {
            blocks.push(Block::Paragraph(text.trim().to_string()));
        }
    }
    blocks
}

pub struct DocxExtractor {
    ocr: Arc<dyn OcrEngine>,
}

impl DocxExtractor {
    pub fn new(ocr: Arc<dyn OcrEngine>) -> Self {
        Self { ocr }
    }
}

impl Extractor for DocxExtractor {
    fn name(&self) -> &'static str {
        "docx"
    }

    fn can_handle(&self, format: FormatTag) -> bool {
        format == FormatTag::Docx
    }

    fn extract(&self, path: &Path, bytes: &[u8]) -> Result<String, ExtractionError> {
        let mut archive = open_archive(bytes, "docx")?;
        let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_ZIP_ENTRY_BYTES)
            .map_err(|e| ExtractionError::corrupt("docx", e))?;
        let mut blocks =
            flow_text(&xml, &WORDPROCESSINGML).map_err(|e| ExtractionError::corrupt("docx", e))?;
        blocks.extend(ocr_pictures(&mut archive, "word/media/", self.ocr.as_ref(), path));
        Ok(join_blocks(&blocks))
    }
}

pub struct OdtExtractor {
    ocr: Arc<dyn OcrEngine>,
}

impl OdtExtractor {
    pub fn new(ocr: Arc<dyn OcrEngine>) -> Self {
        Self { ocr }
    }
}

impl Extractor for OdtExtractor {
    fn name(&self) -> &'static str {
        "odt"
    }

    fn can_handle(&self, format: FormatTag) -> bool {
        format == FormatTag::Odt
    }

    fn extract(&self, path: &Path, bytes: &[u8]) -> Result<String, ExtractionError> {
        let mut archive = open_archive(bytes, "odt")?;
        let xml = read_zip_entry_bounded(&mut archive, "content.xml", MAX_ZIP_ENTRY_BYTES)
            .map_err(|e| ExtractionError::corrupt("odt", e))?;
        let mut blocks = flow_text(&xml, &OPENDOCUMENT_TEXT)
            .map_err(|e| ExtractionError::corrupt("odt", e))?;
        blocks.extend(ocr_pictures(&mut archive, "Pictures/", self.ocr.as_ref(), path));
        Ok(join_blocks(&blocks))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct XlsxExtractor;

impl Extractor for XlsxExtractor {
    fn name(&self) -> &'static str {
        "xlsx"
    }

    fn can_handle(&self, format: FormatTag) -> bool {
        format == FormatTag::Xlsx
    }

    fn extract(&self, _path: &Path, bytes: &[u8]) -> Result<String, ExtractionError> {
        let corrupt = |e: String| ExtractionError::corrupt("xlsx", e);
        let mut archive = open_archive(bytes, "xlsx")?;
        let shared_strings = read_shared_strings(&mut archive).map_err(corrupt)?;
        let sheets = list_sheets(&mut archive);

        let mut sections = Vec::new();
        for (name, entry) in sheets.into_iter().take(MAX_SHEETS) {
            let xml =
                read_zip_entry_bounded(&mut archive, &entry, MAX_ZIP_ENTRY_BYTES).map_err(corrupt)?;
            let rows = sheet_rows(&xml, &shared_strings)
                .map_err(|e| ExtractionError::corrupt("xlsx", e))?;
            if !rows.is_empty() {
                sections.push(format!("--- Sheet: {name} ---\n{}", rows.join("\n")));
            }
        }
        Ok(sections.join("\n\n"))
    }
}

fn attribute(e: &BytesStart<'_>, local_name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local_name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>, String> {
    if archive.index_for_name("xl/sharedStrings.xml").is_none() {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_ZIP_ENTRY_BYTES)?;
    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let (mut in_si, mut in_t) = (false, false);
    loop {
        match reader.read_event_into(&mut buf).map_err(|e| e.to_string())? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = true;
                    current.clear();
                }
                b"t" if in_si => in_t = true,
                _ => {}
            },
            Event::Text(t) if in_t => {
                current.push_str(&t.unescape().map_err(|e| e.to_string())?);
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => {
                    in_si = false;
                    strings.push(std::mem::take(&mut current));
                }
                b"t" => in_t = false,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Sheet display names and their zip entries, in workbook order. Falls back to
/// `sheetN.xml` entries in numeric order when the workbook cannot be read.
fn list_sheets(archive: &mut Archive<'_>) -> Vec<(String, String)> {
    match workbook_sheets(archive) {
        Ok(sheets) if !sheets.is_empty() => sheets,
        _ => {
            let mut entries: Vec<(u32, String)> = archive
                .file_names()
                .filter_map(|name| {
                    let n = name
                        .strip_prefix("xl/worksheets/sheet")?
                        .strip_suffix(".xml")?
                        .parse::<u32>()
                        .ok()?;
                    Some((n, name.to_string()))
                })
                .collect();
            entries.sort();
            entries
                .into_iter()
                .map(|(n, entry)| (format!("Sheet{n}"), entry))
                .collect()
        }
    }
}

fn workbook_sheets(archive: &mut Archive<'_>) -> Result<Vec<(String, String)>, String> {
    let rels_xml =
        read_zip_entry_bounded(archive, "xl/_rels/workbook.xml.rels", MAX_ZIP_ENTRY_BYTES)?;
    let mut targets = HashMap::new();
    let mut reader = Reader::from_reader(rels_xml.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(|e| e.to_string())? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) = (attribute(&e, b"Id"), attribute(&e, b"Target")) {
                    let entry = match target.strip_prefix('/') {
                        Some(absolute) => absolute.to_string(),
                        None => format!("xl/{target}"),
                    };
                    targets.insert(id, entry);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let workbook_xml = read_zip_entry_bounded(archive, "xl/workbook.xml", MAX_ZIP_ENTRY_BYTES)?;
    let mut reader = Reader::from_reader(workbook_xml.as_slice());
    let mut sheets = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(|e| e.to_string())? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let name = attribute(&e, b"name");
                let entry = attribute(&e, b"id").and_then(|id| targets.get(&id).cloned());
                if let (Some(name), Some(entry)) = (name, entry) {
                    sheets.push((name, entry));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

fn sheet_rows(xml: &[u8], shared_strings: &[String]) -> Result<Vec<String>, quick_xml::Error> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut value = String::new();
    let mut cell_type: Option<String> = None;
    let mut in_value = false;
    let mut cells = 0usize;

    loop {
        if cells >= MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => row.clear(),
                b"c" => {
                    cell_type = attribute(&e, b"t");
                    value.clear();
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Event::Text(t) if in_value => value.push_str(&t.unescape()?),
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    cells += 1;
                    let rendered = match cell_type.as_deref() {
                        Some("s") => value
                            .trim()
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared_strings.get(i).cloned())
                            .unwrap_or_default(),
                        Some("b") => match value.trim() {
                            "1" => "TRUE".to_string(),
                            "0" => "FALSE".to_string(),
                            other => other.to_string(),
                        },
                        _ => value.trim().to_string(),
                    };
                    if !rendered.trim().is_empty() {
                        row.push(rendered.trim().to_string());
                    }
                }
                b"row" => {
                    if !row.is_empty() {
                        rows.push(row.join(" | "));
                    }
                    row.clear();
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}
