//! Legacy Excel 97-2003 workbooks: a BIFF8 record stream inside an OLE compound file.

use crate::database::batch::Batch;
use crate::error::RustyTableError;
use crate::helpers::biff8::Biff8Reader;
use crate::helpers::cfb::CompoundFile;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::excel;
use crate::spreadsheet::reference::index_to_reference;
use crate::spreadsheet::sheet::Sheet;
use crate::spreadsheet::SpreadsheetError;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

// BIFF8 record types
const FORMULA: u16 = 0x0006;
const EOF: u16 = 0x000A;
const DATE1904: u16 = 0x0022;
const FILE_PASS: u16 = 0x002F;
const CODE_PAGE: u16 = 0x0042;
const BOUND_SHEET8: u16 = 0x0085;
const MUL_RK: u16 = 0x00BD;
const XF: u16 = 0x00E0;
const SST: u16 = 0x00FC;
const LABEL_SST: u16 = 0x00FD;
const NUMBER: u16 = 0x0203;
const LABEL: u16 = 0x0204;
const BOOL_ERR: u16 = 0x0205;
const STRING: u16 = 0x0207;
const ARRAY: u16 = 0x0221;
const TABLE: u16 = 0x0236;
const RK: u16 = 0x027E;
const FORMAT: u16 = 0x041E;
const SHARED_FORMULA: u16 = 0x04BC;
const BOF: u16 = 0x0809;

/// Column limit of the format (IV)
const MAX_XLS_COLUMNS: usize = 256;
/// Sheet type of a worksheet in BOUND_SHEET8; charts and macro sheets are skipped
const WORKSHEET: u8 = 0;

/// Errors specific to legacy workbooks.
#[derive(Error, Debug)]
pub enum XlsError {
    #[error("Workbook is password protected")]
    Encrypted,

    #[error("Invalid formula result '{0:#018x}'")]
    FormulaResult(u64),
}

/// An opened XLS workbook.
pub(crate) struct XlsWorkbook {
    reader: Biff8Reader,
    shared_strings: Vec<String>,
    /// Cell type per style index, for date detection
    number_formats: Vec<CellType>,
    /// Worksheets as (name, stream offset of their BOF record) in tab order
    sheets: Vec<(String, usize)>,
}

impl XlsWorkbook {
    pub(crate) fn open(path: &Path) -> Result<Self, RustyTableError> {
        Self::new(fs::read(path)?)
    }

    /// Parses the workbook globals: sheet list, date system, code page,
    /// number formats and shared strings.
    pub(crate) fn new(data: Vec<u8>) -> Result<Self, RustyTableError> {
        let file = CompoundFile::new(data)?;
        let stream = match file.read("Workbook")? {
            Some(stream) => stream,
            None => file
                .read("Book")?
                .ok_or_else(|| SpreadsheetError::MissingPart("Workbook".to_owned()))?,
        };
        let mut reader = Biff8Reader::new(stream);
        let mut is_1904 = false;
        let mut shared_strings = Vec::new();
        let mut custom_formats = HashMap::<String, String>::new();
        let mut format_indexes = Vec::<String>::new();
        let mut sheets = Vec::new();
        while let Some(kind) = reader.next()? {
            match kind {
                EOF => break,
                FILE_PASS => Err(XlsError::Encrypted)?,
                DATE1904 => is_1904 = reader.read_u16()? == 1,
                CODE_PAGE => {
                    let code_page = reader.read_u16()?;
                    match codepage::to_encoding(code_page) {
                        Some(encoding) if encoding.is_single_byte() => reader.compressed_encoding = encoding,
                        _ => debug!(code_page, "Kept Windows-1252 for compressed strings"),
                    }
                }
                FORMAT => {
                    let id = reader.read_u16()?;
                    custom_formats.insert(id.to_string(), reader.read_string()?);
                }
                XF => {
                    reader.skip(2)?;
                    format_indexes.push(reader.read_u16()?.to_string());
                }
                SST => shared_strings = load_shared_strings(&mut reader)?,
                BOUND_SHEET8 => {
                    let position = reader.read_u32()? as usize;
                    reader.skip(1)?;
                    let sheet_type = reader.read_u8()?;
                    let name = reader.read_short_string()?;
                    if sheet_type == WORKSHEET {
                        sheets.push((name, position));
                    }
                }
                _ => (),
            }
        }

        let custom_formats = custom_formats
            .into_iter()
            .map(|(id, format)| (id, CellType::parse_custom_number_format(&format, is_1904)))
            .collect();
        let number_formats = excel::resolve_number_formats(format_indexes, custom_formats, is_1904);
        debug!(sheets = sheets.len(), is_1904, "Opened legacy workbook");
        Ok(XlsWorkbook {
            reader,
            shared_strings,
            number_formats,
            sheets,
        })
    }

    /// Reads every worksheet's non-empty cells.
    fn read_sheets(&mut self) -> Result<Vec<Sheet>, RustyTableError> {
        let mut sheets = Vec::<Sheet>::new();
        let reader = &mut self.reader;
        for (sheet_name, position) in &self.sheets {
            reader.goto(*position);
            if reader.next()? != Some(BOF) {
                Err(SpreadsheetError::MissingPart(sheet_name.to_owned()))?
            }
            let mut sheet = Sheet::new(sheet_name);
            while let Some(kind) = reader.next()? {
                match kind {
                    BOF | EOF => break,
                    NUMBER | RK | LABEL | LABEL_SST | BOOL_ERR | FORMULA => {
                        let row = reader.read_u16()? as usize;
                        let col = reader.read_u16()? as usize;
                        let style = reader.read_u16()? as usize;
                        let (kind, value) = match kind {
                            NUMBER => (style_type(&self.number_formats, style), reader.read_f64()?.to_string()),
                            RK => (style_type(&self.number_formats, style), reader.read_rk_number()?.to_string()),
                            LABEL => (CellType::InlineString, reader.read_string()?),
                            LABEL_SST => (CellType::SharedString, reader.read_u32()?.to_string()),
                            BOOL_ERR => read_bool_or_error(reader)?,
                            _ => read_formula_result(reader, style_type(&self.number_formats, style))?,
                        };
                        push_cell(&mut sheet, row, col, kind, value)?;
                    }
                    MUL_RK => {
                        let row = reader.read_u16()? as usize;
                        let first = reader.read_u16()? as usize;
                        let last = reader.last_u16()? as usize;
                        for col in first..=last {
                            let style = reader.read_u16()? as usize;
                            let value = reader.read_rk_number()?.to_string();
                            push_cell(&mut sheet, row, col, style_type(&self.number_formats, style), value)?;
                        }
                    }
                    _ => (),
                }
            }
            sheets.push(sheet);
        }
        Ok(sheets)
    }

    /// Converts every worksheet with data into a `(sheet name, batch)` pair.
    pub(crate) fn read_batches(&mut self) -> Result<Vec<(String, Batch)>, RustyTableError> {
        let mut batches = Vec::new();
        for sheet in self.read_sheets()? {
            let name = sheet.name.to_owned();
            match sheet.into_batch(&self.shared_strings)? {
                Some(batch) => batches.push((name, batch)),
                None => debug!(sheet = %name, "Skipped empty sheet"),
            }
        }
        Ok(batches)
    }
}

/// Reads the SST record: total and unique counts, then the unique strings.
fn load_shared_strings(reader: &mut Biff8Reader) -> Result<Vec<String>, RustyTableError> {
    reader.skip(4)?;
    let count = reader.read_u32()? as usize;
    let mut shared_strings = Vec::with_capacity(count.min(1 << 16));
    for _ in 0..count {
        shared_strings.push(reader.read_rich_string()?);
    }
    Ok(shared_strings)
}

fn style_type(number_formats: &[CellType], style: usize) -> CellType {
    number_formats.get(style).copied().unwrap_or(CellType::Number)
}

fn push_cell(sheet: &mut Sheet, row: usize, col: usize, kind: CellType, value: String) -> Result<(), RustyTableError> {
    if col >= MAX_XLS_COLUMNS {
        Err(SpreadsheetError::InvalidReference(index_to_reference(row, col)))?
    }
    if kind != CellType::Empty && !value.is_empty() {
        sheet.push(Cell { row, col, kind, value });
    }
    Ok(())
}

fn read_bool_or_error(reader: &mut Biff8Reader) -> Result<(CellType, String), RustyTableError> {
    let value = reader.read_u8()?;
    Ok(match reader.read_u8()? {
        0 => (CellType::Boolean, value.to_string()),
        _ => (CellType::Error, error_text(value).to_owned()),
    })
}

/// Decodes the cached result of a FORMULA record. Numbers are stored as is;
/// other results set the top two bytes to 0xFFFF and the low byte to the type.
fn read_formula_result(reader: &mut Biff8Reader, number_type: CellType) -> Result<(CellType, String), RustyTableError> {
    let result = reader.read_u64()?;
    if result >> 48 != 0xFFFF {
        return Ok((number_type, f64::from_bits(result).to_string()));
    }
    let value = ((result >> 16) & 0xFF) as u8;
    match result & 0xFF {
        0 => loop {
            // text follows in a STRING record, after any shared formula definition
            match reader.next()? {
                Some(STRING) => break Ok((CellType::InlineString, reader.read_string()?)),
                Some(SHARED_FORMULA | ARRAY | TABLE) => continue,
                _ => Err(XlsError::FormulaResult(result))?,
            }
        },
        1 => Ok((CellType::Boolean, value.to_string())),
        2 => Ok((CellType::Error, error_text(value).to_owned())),
        3 => Ok((CellType::Empty, String::new())),
        _ => Err(XlsError::FormulaResult(result))?,
    }
}

fn error_text(code: u8) -> &'static str {
    match code {
        0x00 => "#NULL!",
        0x07 => "#DIV/0!",
        0x0F => "#VALUE!",
        0x17 => "#REF!",
        0x1D => "#NAME?",
        0x24 => "#NUM!",
        0x2A => "#N/A",
        _ => "#ERROR!",
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::helpers::biff8::tests::record;
    use crate::helpers::biff8::tests::string;
    use crate::helpers::biff8::tests::wide_string;
    use crate::helpers::biff8::CONTINUE;
    use crate::helpers::cfb::tests::compound_file;
    use serde_json::json;
    use serde_json::Value;

    fn bof() -> Vec<u8> {
        let mut data = vec![0; 16];
        data[..4].copy_from_slice(&[0x00, 0x06, 0x05, 0x00]);
        record(BOF, &data)
    }

    fn cell(kind: u16, row: u16, col: u16, style: u16, value: &[u8]) -> Vec<u8> {
        let mut data = [row, col, style].iter().flat_map(|field| field.to_le_bytes()).collect::<Vec<_>>();
        data.extend_from_slice(value);
        record(kind, &data)
    }

    fn xf(format: u16) -> Vec<u8> {
        let mut data = vec![0; 20];
        data[2..4].copy_from_slice(&format.to_le_bytes());
        record(XF, &data)
    }

    fn bound_sheet(position: usize, sheet_type: u8, name: &str) -> Vec<u8> {
        let mut data = (position as u32).to_le_bytes().to_vec();
        data.extend([0, sheet_type, name.len() as u8, 0]);
        data.extend_from_slice(name.as_bytes());
        record(BOUND_SHEET8, &data)
    }

    fn rk(value: i32, percent: bool) -> [u8; 4] {
        (((value << 2) | 0x02 | i32::from(percent)) as u32).to_le_bytes()
    }

    fn formula(result: [u8; 8]) -> Vec<u8> {
        let mut data = result.to_vec();
        data.extend([0; 6]);
        data
    }

    /// Workbook globals followed by the given sheets, each a `(name, type, records)` triple.
    fn workbook_stream(globals: &[Vec<u8>], sheets: &[(&str, u8, Vec<u8>)]) -> Vec<u8> {
        let head = globals.concat();
        let bound_sheets_len: usize = sheets.iter().map(|(name, kind, _)| bound_sheet(0, *kind, name).len()).sum();
        let mut position = head.len() + bound_sheets_len + record(EOF, &[]).len();
        let mut stream = head;
        for (name, kind, records) in sheets {
            stream.extend(bound_sheet(position, *kind, name));
            position += records.len();
        }
        stream.extend(record(EOF, &[]));
        for (_, _, records) in sheets {
            stream.extend_from_slice(records);
        }
        stream
    }

    fn globals() -> Vec<Vec<u8>> {
        let mut sst = 4u32.to_le_bytes().to_vec();
        sst.extend(3u32.to_le_bytes());
        sst.extend([4, 0, 0x08, 1, 0]);
        sst.extend_from_slice(b"Name");
        sst.extend([0; 4]);
        sst.extend([6, 0, 0]);
        sst.extend_from_slice(b"Joi");
        let mut rest = vec![0];
        rest.extend_from_slice(b"ned");
        rest.extend(wide_string("Zoë"));

        let mut format = 164u16.to_le_bytes().to_vec();
        format.extend(string("yyyy-mm-dd"));
        vec![
            bof(),
            record(CODE_PAGE, &1252u16.to_le_bytes()),
            record(DATE1904, &[0, 0]),
            record(FORMAT, &format),
            xf(0),
            xf(164),
            record(SST, &sst),
            record(CONTINUE, &rest),
        ]
    }

    fn staff_sheet() -> Vec<u8> {
        let mut mul_rk = [2u16, 0].iter().flat_map(|field| field.to_le_bytes()).collect::<Vec<_>>();
        mul_rk.extend(0u16.to_le_bytes());
        mul_rk.extend(rk(7, false));
        mul_rk.extend(1u16.to_le_bytes());
        mul_rk.extend(rk(45293, false));
        mul_rk.extend(1u16.to_le_bytes());
        [
            bof(),
            cell(LABEL_SST, 0, 0, 0, &0u32.to_le_bytes()),
            cell(LABEL_SST, 0, 1, 0, &1u32.to_le_bytes()),
            cell(LABEL, 0, 2, 0, &string("Score")),
            cell(LABEL_SST, 1, 0, 0, &2u32.to_le_bytes()),
            cell(NUMBER, 1, 1, 1, &45292f64.to_le_bytes()),
            cell(RK, 1, 2, 0, &rk(150, true)),
            record(MUL_RK, &mul_rk),
            cell(FORMULA, 2, 2, 0, &formula([0, 0, 0, 0, 0, 0, 0xFF, 0xFF])),
            record(STRING, &string("done")),
            cell(BOOL_ERR, 3, 0, 0, &[1, 0]),
            cell(FORMULA, 3, 1, 0, &formula([2, 0, 0x07, 0, 0, 0, 0xFF, 0xFF])),
            cell(FORMULA, 3, 2, 0, &formula(2.5f64.to_le_bytes())),
            record(EOF, &[]),
        ]
        .concat()
    }

    pub(crate) fn sample_workbook() -> Vec<u8> {
        let stream = workbook_stream(
            &globals(),
            &[
                ("Staff List", WORKSHEET, staff_sheet()),
                ("Chart", 2, [bof(), record(EOF, &[])].concat()),
                ("Blank", WORKSHEET, [bof(), record(EOF, &[])].concat()),
            ],
        );
        compound_file(&[("Workbook", &stream)])
    }

    #[test]
    fn reads_worksheets_in_tab_order() {
        let workbook = XlsWorkbook::new(sample_workbook()).unwrap();
        let names = workbook.sheets.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, ["Staff List", "Blank"]);
        assert_eq!(workbook.shared_strings, ["Name", "Joined", "Zoë"]);
    }

    #[test]
    fn decodes_cells_and_skips_empty_sheets() {
        let mut workbook = XlsWorkbook::new(sample_workbook()).unwrap();
        let batches = workbook.read_batches().unwrap();
        assert_eq!(batches.len(), 1);

        let (name, batch) = &batches[0];
        assert_eq!(name, "Staff List");
        assert_eq!(batch.columns(), ["Name", "Joined", "Score"]);
        assert_eq!(
            batch.rows(),
            [
                vec![json!("Zoë"), json!("2024-01-01"), json!(1.5)],
                vec![json!(7), json!("2024-01-02"), json!("done")],
                vec![json!(true), Value::Null, json!(2.5)],
            ]
        );
    }

    #[test]
    fn compressed_strings_follow_the_code_page() {
        let mut globals = globals();
        globals[1] = record(CODE_PAGE, &1251u16.to_le_bytes());
        let mut label = 1u16.to_le_bytes().to_vec();
        label.extend([0, 0xC0]);
        let sheet = [
            bof(),
            cell(LABEL, 0, 0, 0, &string("City")),
            cell(LABEL, 1, 0, 0, &label),
            record(EOF, &[]),
        ]
        .concat();
        let stream = workbook_stream(&globals, &[("Cities", WORKSHEET, sheet)]);
        let mut workbook = XlsWorkbook::new(compound_file(&[("Workbook", &stream)])).unwrap();
        let batches = workbook.read_batches().unwrap();

        assert_eq!(batches[0].1.rows(), [vec![json!("\u{410}")]]);
    }

    #[test]
    fn encrypted_workbooks_are_malformed() {
        let mut globals = globals();
        globals.insert(1, record(FILE_PASS, &[1, 0]));
        let stream = workbook_stream(&globals, &[]);
        let error = XlsWorkbook::new(compound_file(&[("Workbook", &stream)])).err().unwrap();
        assert_eq!(error.kind(), ErrorKind::Malformed);
        assert!(error.to_string().contains("password"));
    }

    #[test]
    fn invalid_containers_and_columns_are_malformed() {
        let error = XlsWorkbook::new(b"name,age\n".repeat(100)).err().unwrap();
        assert_eq!(error.kind(), ErrorKind::Malformed);

        let error = XlsWorkbook::new(compound_file(&[("Other", b"data")])).err().unwrap();
        assert_eq!(error.kind(), ErrorKind::Malformed);

        let sheet = [bof(), cell(NUMBER, 0, 300, 0, &1f64.to_le_bytes()), record(EOF, &[])].concat();
        let stream = workbook_stream(&globals(), &[("Wide", WORKSHEET, sheet)]);
        let mut workbook = XlsWorkbook::new(compound_file(&[("Workbook", &stream)])).unwrap();
        let error = workbook.read_batches().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Malformed);
        assert!(error.to_string().contains("KO1"));
    }
}
