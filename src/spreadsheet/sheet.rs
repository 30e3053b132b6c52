use crate::database::batch::Batch;
use crate::error::RustyTableError;
use crate::spreadsheet::cell::Cell;
use serde_json::Value;

/// Cells collected from one worksheet, in document order.
pub(crate) struct Sheet {
    /// Sheet name as shown on the workbook tab
    pub(crate) name: String,
    cells: Vec<Cell>,
    /// Actual data range (determined from cell data)
    col_lower_bound: Option<usize>,
    col_upper_bound: Option<usize>,
}

impl Sheet {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            cells: Vec::new(),
            col_lower_bound: None,
            col_upper_bound: None,
        }
    }

    /// Adds a cell to the sheet, widening the column range.
    pub(crate) fn push(&mut self, cell: Cell) {
        self.col_lower_bound = Some(self.col_lower_bound.map_or(cell.col, |lower| lower.min(cell.col)));
        self.col_upper_bound = Some(self.col_upper_bound.map_or(cell.col, |upper| upper.max(cell.col)));
        self.cells.push(cell);
    }

    /// Turns the collected cells into a batch.
    ///
    /// The first row holding any cell is the header; rows without cells are skipped.
    /// Blank header cells are named `Unnamed: {position}` and missing data cells are null.
    /// Returns `None` for a sheet without data rows.
    pub(crate) fn into_batch(mut self, shared_strings: &[String]) -> Result<Option<Batch>, RustyTableError> {
        let (Some(col_lower), Some(col_upper)) = (self.col_lower_bound, self.col_upper_bound) else {
            return Ok(None);
        };
        let width = col_upper - col_lower + 1;
        self.cells.sort_by_key(|cell| (cell.row, cell.col));

        let mut lines: Vec<Vec<Value>> = Vec::new();
        let mut current_row = None::<usize>;
        for cell in &self.cells {
            if current_row != Some(cell.row) {
                current_row = Some(cell.row);
                lines.push(vec![Value::Null; width]);
            }
            if let Some(line) = lines.last_mut() {
                line[cell.col - col_lower] = cell.to_json(shared_strings)?;
            }
        }

        let mut lines = lines.into_iter();
        let Some(header) = lines.next() else {
            return Ok(None);
        };
        let columns = header
            .into_iter()
            .enumerate()
            .map(|(position, value)| match value {
                Value::Null => format!("Unnamed: {position}"),
                Value::String(text) if text.trim().is_empty() => format!("Unnamed: {position}"),
                Value::String(text) => text,
                other => other.to_string(),
            })
            .collect::<Vec<_>>();
        let rows = lines
            .filter(|line| line.iter().any(|value| !value.is_null()))
            .collect::<Vec<_>>();
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(Batch::new(columns, rows)))
    }
}
