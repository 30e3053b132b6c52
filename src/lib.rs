//! # Rusty Table
//!
//! Dynamic tables discovered from uploaded spreadsheets, stored in DuckDB
//! without ever running a schema migration.
//!
//! Every logical table is a descriptor (a unique name plus an ordered list of
//! normalized column names) and a set of records tagged with that name. Each
//! record carries its row as a JSON payload.
//!
//! ## Features
//!
//! - **Schema reconciliation**: an incoming header with the same column set
//!   (after normalization) appends to the existing table; any other set forks
//!   into `{name}_1`, `{name}_2`, ...
//! - **File ingestion**: CSV (UTF-8 or Windows-1252), Excel `.xlsx`/`.xlsm`
//!   and legacy `.xls` workbooks, one table per non-empty sheet
//! - **Browsing**: paginated reads with a case-sensitive substring search over
//!   the whole row, plus a cross-table search
//! - **Editing**: single-row insert and update, table rename and delete, each
//!   applied atomically
//! - **Export**: CSV or single-sheet XLSX
//!
//! ## Example
//!
//! ```no_run
//! use rusty_table::{Batch, PageRequest, Workspace};
//! use serde_json::json;
//!
//! # fn main() -> Result<(), rusty_table::RustyTableError> {
//! let mut workspace = Workspace::open_in_memory()?;
//! let batch = Batch::new(
//!     vec!["First Name".to_owned(), "Age".to_owned()],
//!     vec![vec![json!("Ann"), json!(31)]],
//! );
//! let table = workspace.ingest("people", &batch)?;
//! let page = workspace.page(&table, &PageRequest::new(1, 20))?;
//! assert_eq!(page.columns, ["first_name", "age"]);
//! # Ok(())
//! # }
//! ```
mod config;
mod database;
mod error;
mod export;
mod helpers;
mod sample;
mod spreadsheet;
mod workspace;

pub use crate::config::Config;
pub use crate::config::EnvParam;
pub use crate::database::batch::Batch;
pub use crate::database::descriptor::normalize_column_name;
pub use crate::database::descriptor::TableDescriptor;
pub use crate::database::descriptor::TableSummary;
pub use crate::database::page::Page;
pub use crate::database::page::PageRequest;
pub use crate::database::record::Payload;
pub use crate::database::record::Record;
pub use crate::database::record::SearchHit;
pub use crate::error::ErrorKind;
pub use crate::error::RustyTableError;
pub use crate::export::ExportFormat;
pub use crate::helpers::biff8::Biff8Error;
pub use crate::helpers::cfb::CfbError;
pub use crate::helpers::xml::XmlError;
pub use crate::spreadsheet::xls::XlsError;
pub use crate::spreadsheet::SpreadsheetError;
pub use crate::workspace::Workspace;
