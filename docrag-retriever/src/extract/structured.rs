//! JSON and CSV rendered as searchable lines.
//!
//! JSON becomes one `path.to.key: value` line per scalar. CSV rows become
//! `header: value | header: value` lines so that each value keeps its column name.

use super::text::decode_text;
use super::{Extractor, FormatTag};
use crate::error::ExtractionError;
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonExtractor;

impl Extractor for JsonExtractor {
    fn name(&self) -> &'static str {
        "json"
    }

    fn can_handle(&self, format: FormatTag) -> bool {
        format == FormatTag::Json
    }

    fn extract(&self, _path: &Path, bytes: &[u8]) -> Result<String, ExtractionError> {
        let (text, _) = decode_text(bytes);
        if text.trim().is_empty() {
            return Ok(String::new());
        }
        let value: Value =
            serde_json::from_str(&text).map_err(|e| ExtractionError::corrupt("json", e))?;
        let mut lines = Vec::new();
        flatten_json(&value, String::new(), &mut lines);
        Ok(lines.join("\n"))
    }
}

fn flatten_json(value: &Value, prefix: String, lines: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_json(child, path, lines);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                flatten_json(child, format!("{prefix}[{i}]"), lines);
            }
        }
        Value::Null => {}
        scalar => {
            let rendered = match scalar {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if prefix.is_empty() {
                lines.push(rendered);
            } else {
                lines.push(format!("{prefix}: {rendered}"));
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CsvExtractor;

impl Extractor for CsvExtractor {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn can_handle(&self, format: FormatTag) -> bool {
        format == FormatTag::Csv
    }

    fn extract(&self, _path: &Path, bytes: &[u8]) -> Result<String, ExtractionError> {
        let (text, _) = decode_text(bytes);
        let delimiter = detect_delimiter(&text);
        let mut records = parse_csv(&text, delimiter)?.into_iter();

        let Some(headers) = records.next() else {
            return Ok(String::new());
        };
        let headers: Vec<String> = headers
            .into_iter()
            .enumerate()
            .map(|(i, h)| {
                let h = h.trim().to_string();
                if h.is_empty() { format!("column {}", i + 1) } else { h }
            })
            .collect();

        let mut lines = vec![headers.join(" | ")];
        for record in records {
            let cells: Vec<String> = record
                .iter()
                .enumerate()
                .filter(|(_, value)| !value.trim().is_empty())
                .map(|(i, value)| match headers.get(i) {
                    Some(header) => format!("{header}: {}", value.trim()),
                    None => value.trim().to_string(),
                })
                .collect();
            if !cells.is_empty() {
                lines.push(cells.join(" | "));
            }
        }
        Ok(lines.join("\n"))
    }
}

/// Semicolon-separated files are common in European spreadsheet exports.
fn detect_delimiter(text: &str) -> char {
    let header = text.lines().next().unwrap_or_default();
    let count = |c: char| header.chars().filter(|&x| x == c).count();
    [',', ';', '\t']
        .into_iter()
        .max_by_key(|&c| (count(c), c == ','))
        .filter(|&c| count(c) > 0)
        .unwrap_or(',')
}

/// RFC 4180 parsing: quoted fields may contain delimiters, doubled quotes and
/// line breaks. Blank lines are skipped.
fn parse_csv(text: &str, delimiter: char) -> Result<Vec<Vec<String>>, ExtractionError> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            c if c == delimiter => record.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                if record.iter().any(|f| !f.is_empty()) {
                    records.push(std::mem::take(&mut record));
                } else {
                    record.clear();
                }
            }
            _ => field.push(c),
        }
    }
    if in_quotes {
        return Err(ExtractionError::corrupt("csv", "unterminated quoted field"));
    }
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        if record.iter().any(|f| !f.is_empty()) {
            records.push(record);
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_flattening() {
        let json = br#"{"city": "Paris", "country": {"name": "France", "population": 68}, "tags": ["capital", null, true]}"#;
        let text = JsonExtractor.extract(Path::new("a.json"), json).unwrap();
        assert_eq!(
            text,
            "city: Paris\ncountry.name: France\ncountry.population: 68\ntags[0]: capital\ntags[2]: true"
        );
    }

    #[test]
    fn test_invalid_json_is_corrupt() {
        let err = JsonExtractor
            .extract(Path::new("a.json"), b"{not json")
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Corrupt { format: "json", .. }));
    }

    #[test]
    fn test_csv_rows_are_labelled() {
        let csv = b"city,country,notes\nParis,France,\"capital, largest city\"\n\nLyon,France,\"said \"\"hi\"\"\"\n";
        let text = CsvExtractor.extract(Path::new("a.csv"), csv).unwrap();
        assert_eq!(
            text,
            "city | country | notes\n\
             city: Paris | country: France | notes: capital, largest city\n\
             city: Lyon | country: France | notes: said \"hi\""
        );
    }

    #[test]
    fn test_csv_semicolon_and_multiline_fields() {
        let csv = "nom;ville\r\n\"Dupont\nJean\";Paris\r\n";
        let text = CsvExtractor.extract(Path::new("a.csv"), csv.as_bytes()).unwrap();
        assert_eq!(text, "nom | ville\nnom: Dupont\nJean | ville: Paris");
    }

    #[test]
    fn test_csv_unterminated_quote_is_corrupt() {
        assert!(CsvExtractor
            .extract(Path::new("a.csv"), b"a,b\n\"open,1\n")
            .is_err());
    }
}
