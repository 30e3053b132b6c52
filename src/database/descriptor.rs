use crate::error::RustyTableError;
use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;

/// Registered name and column order of one logical table.
///
/// The column list of a stored descriptor is never rewritten: a batch with a
/// different column set forks into a new descriptor instead.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TableDescriptor {
    /// Unique table name
    pub name: String,
    /// Normalized column names in display and export order
    pub columns: Vec<String>,
    /// Creation time, set once
    pub created_at: DateTime<Utc>,
}

/// A descriptor together with the number of records currently tagged with its name.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TableSummary {
    #[serde(flatten)]
    pub descriptor: TableDescriptor,
    pub record_count: u64,
}

impl TableDescriptor {
    /// Returns true if `columns` holds exactly the same names as this descriptor, in any order.
    pub fn has_column_set(&self, columns: &[String]) -> bool {
        let existing: HashSet<&str> = self.columns.iter().map(String::as_str).collect();
        let incoming: HashSet<&str> = columns.iter().map(String::as_str).collect();
        existing == incoming
    }
}

/// Normalizes a raw column header.
///
/// Surrounding whitespace is trimmed, letters are lower-cased and every space or
/// hyphen becomes an underscore, so `" First-Name "` and `"First Name"` both
/// become `first_name`.
pub fn normalize_column_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|char| match char {
            ' ' | '-' => '_',
            _ => char,
        })
        .collect()
}

/// Normalizes a full header row, rejecting headers that cannot name a table's columns.
pub(crate) fn normalize_columns<S: AsRef<str>>(columns: &[S]) -> Result<Vec<String>, RustyTableError> {
    if columns.is_empty() {
        Err(RustyTableError::MalformedBatch("batch has no columns".to_owned()))?
    }
    let mut seen = HashSet::<String>::new();
    let mut normalized = Vec::with_capacity(columns.len());
    for column in columns {
        let name = normalize_column_name(column.as_ref());
        if name.is_empty() {
            Err(RustyTableError::MalformedBatch(format!(
                "column {} has a blank name",
                normalized.len() + 1
            )))?
        }
        if !seen.insert(name.to_owned()) {
            Err(RustyTableError::MalformedBatch(format!(
                "column '{}' appears more than once after normalization",
                name
            )))?
        }
        normalized.push(name);
    }
    Ok(normalized)
}
