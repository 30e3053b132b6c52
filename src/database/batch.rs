use crate::database::descriptor::normalize_columns;
use crate::database::record::Payload;
use crate::error::RustyTableError;
use serde_json::Value;

/// A parsed block of rows waiting to be stored: a header plus positional rows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Batch {
    /// Raw column headers as presented by the source
    columns: Vec<String>,
    /// Row values aligned with `columns`
    rows: Vec<Vec<Value>>,
}

impl Batch {
    /// Creates a batch from a header and positional rows.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Batch { columns, rows }
    }

    /// Creates a batch from keyed rows.
    ///
    /// The header is the union of all keys in first-seen order; keys missing
    /// from a row become nulls.
    pub fn from_records(records: Vec<Payload>) -> Self {
        let mut columns = Vec::<String>::new();
        for record in &records {
            for key in record.keys() {
                if !columns.contains(key) {
                    columns.push(key.to_owned());
                }
            }
        }
        let rows = records
            .into_iter()
            .map(|mut record| {
                columns
                    .iter()
                    .map(|column| record.remove(column).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Batch { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Number of data rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Normalizes the header and turns every row into a payload keyed by the
    /// normalized names. Short rows are padded with nulls; long rows are rejected.
    pub(crate) fn normalize(&self) -> Result<(Vec<String>, Vec<Payload>), RustyTableError> {
        let columns = normalize_columns(&self.columns)?;
        let mut payloads = Vec::with_capacity(self.rows.len());
        for (index, row) in self.rows.iter().enumerate() {
            if row.len() > columns.len() {
                Err(RustyTableError::MalformedBatch(format!(
                    "row {} has {} values but the header has {} columns",
                    index + 1,
                    row.len(),
                    columns.len()
                )))?
            }
            let mut payload = Payload::new();
            for (position, column) in columns.iter().enumerate() {
                let value = row.get(position).cloned().unwrap_or(Value::Null);
                payload.insert(column.to_owned(), value);
            }
            payloads.push(payload);
        }
        Ok((columns, payloads))
    }
}
