//! # Table Export
//!
//! Writes the records of one table as CSV text or as a single-sheet XLSX
//! workbook. The header is the descriptor's column order, widened with any
//! payload keys the descriptor does not list.

pub(crate) mod csv_writer;
pub(crate) mod xlsx_writer;

use crate::database::record::Payload;
use crate::error::RustyTableError;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::io::Seek;
use std::io::Write;
use std::str::FromStr;

/// Output format of [`crate::Workspace::export_table`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Xlsx,
}

impl ExportFormat {
    /// File extension without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = RustyTableError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "xlsx" => Ok(ExportFormat::Xlsx),
            _ => Err(RustyTableError::InvalidParameter {
                name: "format".to_owned(),
                message: format!("'{value}' is not one of 'csv' or 'xlsx'"),
            }),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Descriptor columns first, then keys found only in payloads, in first-seen order.
pub(crate) fn widen_header(columns: &[String], payloads: &[Payload]) -> Vec<String> {
    let mut header = columns.to_vec();
    let mut seen = columns.iter().map(String::as_str).collect::<HashSet<_>>();
    for payload in payloads {
        for key in payload.keys() {
            if seen.insert(key.as_str()) {
                header.push(key.to_owned());
            }
        }
    }
    header
}

/// Text of a value in a CSV cell or an XLSX inline string; null is blank.
pub(crate) fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.to_owned(),
        other => other.to_string(),
    }
}

/// Writes `payloads` under `header` in the given format.
pub(crate) fn write_table<W: Write + Seek>(
    format: ExportFormat,
    sheet_name: &str,
    header: &[String],
    payloads: &[Payload],
    writer: W,
) -> Result<(), RustyTableError> {
    match format {
        ExportFormat::Csv => csv_writer::write(header, payloads, writer),
        ExportFormat::Xlsx => xlsx_writer::write(sheet_name, header, payloads, writer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn formats_parse_case_insensitively() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!(" xlsx ".parse::<ExportFormat>().unwrap(), ExportFormat::Xlsx);
        assert_eq!("pdf".parse::<ExportFormat>().unwrap_err().kind(), ErrorKind::InvalidParameter);
        assert_eq!(ExportFormat::Xlsx.to_string(), "xlsx");
    }

    #[test]
    fn header_is_widened_with_unknown_keys() {
        let columns = vec!["a".to_owned(), "b".to_owned()];
        let payloads = vec![
            payload(json!({"b": 1, "z": 2})),
            payload(json!({"a": 1, "y": 2, "z": 3})),
        ];
        assert_eq!(widen_header(&columns, &payloads), ["a", "b", "z", "y"]);
        assert_eq!(widen_header(&columns, &[]), ["a", "b"]);
    }

    #[test]
    fn cell_text_blanks_null() {
        assert_eq!(cell_text(&Value::Null), "");
        assert_eq!(cell_text(&json!("x")), "x");
        assert_eq!(cell_text(&json!(1.5)), "1.5");
        assert_eq!(cell_text(&json!(true)), "true");
        assert_eq!(cell_text(&json!([1, 2])), "[1,2]");
    }
}
