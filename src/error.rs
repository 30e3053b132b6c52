use thiserror::Error;

/// Coarse classification of every failure reported by the crate.
///
/// Callers (an HTTP layer, a CLI) map these onto their own status codes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Referenced table or row does not exist
    NotFound,
    /// Name collision on rename
    Conflict,
    /// Unparseable or structurally empty ingestion batch
    Malformed,
    /// Argument outside its accepted range
    InvalidParameter,
    /// Underlying persistence error
    StoreFailure,
}

/// Main error type for the Rusty Table crate.
/// Aggregates errors from the store, the file parsers and internal modules.
#[derive(Error, Debug)]
pub enum RustyTableError {
    #[error("{message}: {source}")]
    WithContextError {
        message: String,
        #[source]
        source: Box<RustyTableError>,
    },

    // Domain errors
    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Row {id} not found in table '{table}'")]
    RowNotFound { id: i64, table: String },

    #[error("Table '{0}' already exists")]
    TableConflict(String),

    #[error("Malformed batch: {0}")]
    MalformedBatch(String),

    #[error("Invalid parameter '{name}': {message}")]
    InvalidParameter { name: String, message: String },

    // Standard library errors
    #[error("{0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    ParseIntError(#[from] std::num::ParseIntError),

    #[error("{0}")]
    ParseFloatError(#[from] std::num::ParseFloatError),

    #[error("{0}")]
    StringEncodingError(#[from] std::str::Utf8Error),

    // Third-party library errors
    #[error("{0}")]
    DuckDBError(#[from] duckdb::Error),

    #[error("{0}")]
    JsonError(#[from] serde_json::Error),

    #[error("{0}")]
    CsvError(#[from] csv::Error),

    #[error("{0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("{0}")]
    XmlError(#[from] quick_xml::Error),

    #[error("{0}")]
    XmlEncodingError(#[from] quick_xml::encoding::EncodingError),

    #[error("{0}")]
    XmlAttributeError(#[from] quick_xml::events::attributes::AttrError),

    // Helper module errors
    #[error("{0}")]
    XmlHelperError(#[from] crate::helpers::xml::XmlError),

    #[error("{0}")]
    CfbHelperError(#[from] crate::helpers::cfb::CfbError),

    #[error("{0}")]
    Biff8HelperError(#[from] crate::helpers::biff8::Biff8Error),

    // Spreadsheet module errors
    #[error("{0}")]
    SpreadsheetError(#[from] crate::spreadsheet::SpreadsheetError),

    #[error("{0}")]
    XlsError(#[from] crate::spreadsheet::xls::XlsError),
}

impl RustyTableError {
    /// Returns the classification of this error, looking through context wrappers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::WithContextError { source, .. } => source.kind(),
            Self::TableNotFound(_) | Self::RowNotFound { .. } => ErrorKind::NotFound,
            Self::TableConflict(_) => ErrorKind::Conflict,
            Self::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            Self::CsvError(error) if error.is_io_error() => ErrorKind::StoreFailure,
            Self::MalformedBatch(_)
            | Self::ParseIntError(_)
            | Self::ParseFloatError(_)
            | Self::StringEncodingError(_)
            | Self::CsvError(_)
            | Self::ZipError(_)
            | Self::XmlError(_)
            | Self::XmlEncodingError(_)
            | Self::XmlAttributeError(_)
            | Self::XmlHelperError(_)
            | Self::CfbHelperError(_)
            | Self::Biff8HelperError(_)
            | Self::SpreadsheetError(_)
            | Self::XlsError(_) => ErrorKind::Malformed,
            Self::IoError(_) | Self::DuckDBError(_) | Self::JsonError(_) => ErrorKind::StoreFailure,
        }
    }

    /// Whether the store rejected a write because another transaction got there first.
    ///
    /// DuckDB reports duplicate keys (at statement or commit time) and optimistic
    /// write-write conflicts only through the error message, so the classification
    /// is textual and case-insensitive.
    pub(crate) fn is_write_conflict(&self) -> bool {
        match self {
            Self::WithContextError { source, .. } => source.is_write_conflict(),
            Self::DuckDBError(error) => is_conflict_message(&error.to_string()),
            _ => false,
        }
    }
}

fn is_conflict_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    ["constraint error", "constraint violation", "duplicate key", "conflict"]
        .iter()
        .any(|pattern| message.contains(pattern))
}

pub(crate) trait ResultMessage {
    fn with_prefix(self, message: &str) -> Self;
}

impl<T> ResultMessage for Result<T, RustyTableError> {
    fn with_prefix(self, message: &str) -> Self {
        self.map_err(|e| RustyTableError::WithContextError {
            message: message.to_owned(),
            source: Box::new(e),
        })
    }
}
