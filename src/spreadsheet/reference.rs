//! Conversions between A1-style cell references and 0-based indexes.

/// Columns in a worksheet (A to XFD)
pub(crate) const MAX_COLUMNS: usize = 16_384;

/// Rows in a worksheet
pub(crate) const MAX_ROWS: usize = 1_048_576;

/// Converts column letters to a 0-based index: A = 0, Z = 25, AA = 26.
/// Columns past XFD are rejected.
pub(crate) fn col_to_index(letters: &str) -> Option<usize> {
    if letters.is_empty() || !letters.chars().all(|char| char.is_ascii_alphabetic()) {
        return None;
    }
    let mut column = 0usize;
    for char in letters.to_ascii_uppercase().bytes() {
        column = column
            .checked_mul(26)?
            .checked_add((char - b'A') as usize + 1)
            .filter(|column| *column <= MAX_COLUMNS)?;
    }
    Some(column - 1)
}

/// Converts a 0-based column index to letters.
pub(crate) fn index_to_col(col: usize) -> String {
    let mut column = col + 1;
    let mut letters = String::new();
    while column > 0 {
        column -= 1;
        letters.insert(0, (b'A' + (column % 26) as u8) as char);
        column /= 26;
    }
    letters
}

/// Parses a reference such as `B3` into `(row, col)` = `(2, 1)`.
pub(crate) fn reference_to_index(reference: &str) -> Option<(usize, usize)> {
    let split = reference.find(|char: char| char.is_ascii_digit())?;
    let col = col_to_index(&reference[..split])?;
    let row = reference[split..]
        .parse::<usize>()
        .ok()
        .filter(|row| (1..=MAX_ROWS).contains(row))?;
    Some((row - 1, col))
}

/// Formats `(row, col)` as a reference such as `B3`.
pub(crate) fn index_to_reference(row: usize, col: usize) -> String {
    format!("{}{}", index_to_col(col), row + 1)
}
