//! Minimal single-sheet XLSX writer.
//! Text is stored as inline strings so no shared string table is needed.

use crate::database::record::Payload;
use crate::error::RustyTableError;
use crate::export::cell_text;
use crate::helpers::xml::XmlWriterHelper;
use crate::helpers::zip::ZipWriterHelper;
use crate::spreadsheet::excel::WORKSHEET_RELATIONSHIP;
use crate::spreadsheet::reference::index_to_reference;
use quick_xml::Writer;
use serde_json::Value;
use std::io::Seek;
use std::io::Write;
use zip::ZipWriter;

const NS_CONTENT_TYPES: &str = "http://schemas.openxmlformats.org/package/2006/content-types";
const NS_RELATIONSHIPS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const NS_MAIN: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const NS_DOCUMENT_RELATIONSHIPS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const OFFICE_DOCUMENT_RELATIONSHIP: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";

/// Longest sheet name Excel accepts
const SHEET_NAME_LIMIT: usize = 31;

/// Writes a workbook whose only sheet holds the header row and one row per payload.
pub(crate) fn write<W: Write + Seek>(
    sheet_name: &str,
    header: &[String],
    payloads: &[Payload],
    writer: W,
) -> Result<(), RustyTableError> {
    let sheet_name = sanitize_sheet_name(sheet_name);
    let mut zip = ZipWriter::new(writer);

    zip.xml_part("[Content_Types].xml", |xml| {
        xml.declaration()?;
        xml.open("Types", &[("xmlns", NS_CONTENT_TYPES)])?;
        xml.empty(
            "Default",
            &[("Extension", "rels"), ("ContentType", "application/vnd.openxmlformats-package.relationships+xml")],
        )?;
        xml.empty("Default", &[("Extension", "xml"), ("ContentType", "application/xml")])?;
        xml.empty(
            "Override",
            &[
                ("PartName", "/xl/workbook.xml"),
                ("ContentType", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"),
            ],
        )?;
        xml.empty(
            "Override",
            &[
                ("PartName", "/xl/worksheets/sheet1.xml"),
                ("ContentType", "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"),
            ],
        )?;
        xml.close("Types")
    })?;

    zip.xml_part("_rels/.rels", |xml| {
        xml.declaration()?;
        xml.open("Relationships", &[("xmlns", NS_RELATIONSHIPS)])?;
        xml.empty(
            "Relationship",
            &[("Id", "rId1"), ("Type", OFFICE_DOCUMENT_RELATIONSHIP), ("Target", "xl/workbook.xml")],
        )?;
        xml.close("Relationships")
    })?;

    zip.xml_part("xl/workbook.xml", |xml| {
        xml.declaration()?;
        xml.open("workbook", &[("xmlns", NS_MAIN), ("xmlns:r", NS_DOCUMENT_RELATIONSHIPS)])?;
        xml.open("sheets", &[])?;
        xml.empty("sheet", &[("name", sheet_name.as_str()), ("sheetId", "1"), ("r:id", "rId1")])?;
        xml.close("sheets")?;
        xml.close("workbook")
    })?;

    zip.xml_part("xl/_rels/workbook.xml.rels", |xml| {
        xml.declaration()?;
        xml.open("Relationships", &[("xmlns", NS_RELATIONSHIPS)])?;
        xml.empty(
            "Relationship",
            &[("Id", "rId1"), ("Type", WORKSHEET_RELATIONSHIP), ("Target", "worksheets/sheet1.xml")],
        )?;
        xml.close("Relationships")
    })?;

    zip.xml_part("xl/worksheets/sheet1.xml", |xml| {
        xml.declaration()?;
        xml.open("worksheet", &[("xmlns", NS_MAIN)])?;
        xml.open("sheetData", &[])?;
        let header_row = header.iter().cloned().map(Value::String).collect::<Vec<_>>();
        write_row(xml, 0, header_row.iter())?;
        for (index, payload) in payloads.iter().enumerate() {
            let cells = header.iter().map(|column| payload.get(column).unwrap_or(&Value::Null));
            write_row(xml, index + 1, cells)?;
        }
        xml.close("sheetData")?;
        xml.close("worksheet")
    })?;

    zip.finish()?;
    Ok(())
}

fn write_row<'a, W: Write>(
    xml: &mut Writer<W>,
    row: usize,
    cells: impl Iterator<Item = &'a Value>,
) -> Result<(), RustyTableError> {
    let row_number = (row + 1).to_string();
    xml.open("row", &[("r", row_number.as_str())])?;
    for (col, value) in cells.enumerate() {
        let reference = index_to_reference(row, col);
        match value {
            Value::Null => (),
            Value::Number(number) => {
                xml.open("c", &[("r", reference.as_str())])?;
                xml.open("v", &[])?;
                xml.text(&number.to_string())?;
                xml.close("v")?;
                xml.close("c")?;
            }
            Value::Bool(flag) => {
                xml.open("c", &[("r", reference.as_str()), ("t", "b")])?;
                xml.open("v", &[])?;
                xml.text(if *flag { "1" } else { "0" })?;
                xml.close("v")?;
                xml.close("c")?;
            }
            other => {
                let text = cell_text(other);
                xml.open("c", &[("r", reference.as_str()), ("t", "inlineStr")])?;
                xml.open("is", &[])?;
                if text.trim() != text {
                    xml.open("t", &[("xml:space", "preserve")])?;
                } else {
                    xml.open("t", &[])?;
                }
                xml.text(&text)?;
                xml.close("t")?;
                xml.close("is")?;
                xml.close("c")?;
            }
        }
    }
    xml.close("row")
}

/// Strips the characters Excel forbids in sheet names and truncates to 31 characters.
pub(crate) fn sanitize_sheet_name(name: &str) -> String {
    let cleaned = name
        .chars()
        .filter(|char| !matches!(char, ':' | '\\' | '/' | '?' | '*' | '[' | ']'))
        .take(SHEET_NAME_LIMIT)
        .collect::<String>();
    let cleaned = cleaned.trim_matches('\'').to_owned();
    if cleaned.is_empty() {
        "Sheet1".to_owned()
    } else {
        cleaned
    }
}
