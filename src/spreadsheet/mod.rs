//! # Spreadsheet Import
//!
//! Reads uploaded CSV and Excel (.xlsx, .xlsm, .xls) files into ingestion batches,
//! one per non-empty sheet, each paired with the table name derived from the
//! file name.

pub(crate) mod cell;
pub(crate) mod csv_file;
pub(crate) mod excel;
pub(crate) mod reference;
pub(crate) mod sheet;
pub(crate) mod xls;
pub(crate) mod xlsx;

use crate::database::batch::Batch;
use crate::error::RustyTableError;
use crate::spreadsheet::xls::XlsWorkbook;
use crate::spreadsheet::xlsx::XlsxWorkbook;
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;

/// Errors raised while reading an uploaded file.
#[derive(Error, Debug)]
pub enum SpreadsheetError {
    #[error("Unsupported file format '{0}', expected .csv, .xls, .xlsx or .xlsm")]
    UnsupportedFormat(String),

    #[error("File '{name}' is {size} bytes, exceeding the {limit} byte limit")]
    FileTooLarge { name: String, size: u64, limit: u64 },

    #[error("File '{0}' contains no data")]
    EmptyFile(String),

    #[error("Missing workbook part '{0}'")]
    MissingPart(String),

    #[error("Invalid cell reference '{0}'")]
    InvalidReference(String),
}

/// Upload formats accepted by [`read_file`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) enum FileFormat {
    Csv,
    Xls,
    Xlsx,
}

impl FileFormat {
    /// Detects the format from the file extension (case-insensitive).
    pub(crate) fn detect(path: &Path) -> Result<Self, SpreadsheetError> {
        let extension = path
            .extension()
            .and_then(|extension| extension.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "csv" => Ok(FileFormat::Csv),
            "xls" => Ok(FileFormat::Xls),
            "xlsx" | "xlsm" => Ok(FileFormat::Xlsx),
            _ => Err(SpreadsheetError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s").expect("Hardcode regex pattern"));

/// Table name for a file stem and, for workbooks, a sheet name: `"{stem}_{sheet}"`
/// with every whitespace character replaced by `_`.
pub(crate) fn table_name_for(stem: &str, sheet: Option<&str>) -> String {
    let name = match sheet {
        Some(sheet) => format!("{stem}_{sheet}"),
        None => stem.to_owned(),
    };
    WHITESPACE.replace_all(&name, "_").into_owned()
}

/// Reads an uploaded file into `(table name, batch)` pairs.
///
/// Files above `max_bytes`, unsupported extensions and files without any
/// data row are rejected as malformed. Empty sheets are skipped.
pub(crate) fn read_file(path: &Path, max_bytes: u64) -> Result<Vec<(String, Batch)>, RustyTableError> {
    let format = FileFormat::detect(path)?;
    let display_name = path.display().to_string();
    let size = fs::metadata(path)?.len();
    if size > max_bytes {
        Err(SpreadsheetError::FileTooLarge {
            name: display_name.to_owned(),
            size,
            limit: max_bytes,
        })?
    }

    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let batches = match format {
        FileFormat::Csv => csv_file::read_batch(&fs::read(path)?)?
            .map(|batch| vec![(table_name_for(&stem, None), batch)])
            .unwrap_or_default(),
        FileFormat::Xls => name_sheets(&stem, XlsWorkbook::open(path)?.read_batches()?),
        FileFormat::Xlsx => name_sheets(&stem, XlsxWorkbook::open(path)?.read_batches()?),
    };
    if batches.is_empty() {
        Err(SpreadsheetError::EmptyFile(display_name))?
    }
    Ok(batches)
}

fn name_sheets(stem: &str, sheets: Vec<(String, Batch)>) -> Vec<(String, Batch)> {
    sheets
        .into_iter()
        .map(|(sheet, batch)| (table_name_for(stem, Some(&sheet)), batch))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn formats_by_extension() {
        assert_eq!(FileFormat::detect(Path::new("a/b.CSV")).unwrap(), FileFormat::Csv);
        assert_eq!(FileFormat::detect(Path::new("book.xlsm")).unwrap(), FileFormat::Xlsx);
        assert_eq!(FileFormat::detect(Path::new("legacy.XLS")).unwrap(), FileFormat::Xls);
        assert!(FileFormat::detect(Path::new("legacy.xlsb")).is_err());
        assert!(FileFormat::detect(Path::new("noextension")).is_err());
    }

    #[test]
    fn table_names_replace_whitespace() {
        assert_eq!(table_name_for("Sales 2024", None), "Sales_2024");
        assert_eq!(table_name_for("report", Some("Q1 Data")), "report_Q1_Data");
    }

    #[test]
    fn reads_csv_files() -> anyhow::Result<()> {
        let mut file = Builder::new().prefix("staff list").suffix(".csv").tempfile()?;
        file.write_all(b"name,age\nAnn,31\n")?;
        let batches = read_file(file.path(), 1024)?;

        assert_eq!(batches.len(), 1);
        assert!(batches[0].0.starts_with("staff_list"));
        assert_eq!(batches[0].1.len(), 1);
        Ok(())
    }

    #[test]
    fn reads_workbooks_per_sheet() -> anyhow::Result<()> {
        let mut file = Builder::new().prefix("team").suffix(".xlsx").tempfile()?;
        file.write_all(xlsx::tests::sample_workbook().get_ref())?;
        let batches = read_file(file.path(), 1 << 20)?;

        let names = batches.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("team") && names[0].ends_with("_Staff_List"));
        Ok(())
    }

    #[test]
    fn reads_legacy_workbooks_per_sheet() -> anyhow::Result<()> {
        let mut file = Builder::new().prefix("team").suffix(".xls").tempfile()?;
        file.write_all(&xls::tests::sample_workbook())?;
        let batches = read_file(file.path(), 1 << 20)?;

        assert_eq!(batches.len(), 1);
        assert!(batches[0].0.starts_with("team") && batches[0].0.ends_with("_Staff_List"));
        assert_eq!(batches[0].1.len(), 3);
        Ok(())
    }

    #[test]
    fn rejects_large_empty_and_unknown_files() -> anyhow::Result<()> {
        let mut file = Builder::new().suffix(".csv").tempfile()?;
        file.write_all(b"name,age\nAnn,31\n")?;
        assert_eq!(read_file(file.path(), 4).unwrap_err().kind(), ErrorKind::Malformed);

        let mut empty = Builder::new().suffix(".csv").tempfile()?;
        empty.write_all(b"name,age\n")?;
        assert_eq!(read_file(empty.path(), 1024).unwrap_err().kind(), ErrorKind::Malformed);

        let other = Builder::new().suffix(".txt").tempfile()?;
        assert_eq!(read_file(other.path(), 1024).unwrap_err().kind(), ErrorKind::Malformed);
        Ok(())
    }
}
