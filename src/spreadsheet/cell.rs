use crate::error::RustyTableError;
use chrono::Duration;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use serde_json::Number;
use serde_json::Value;

/// Types of cell data found in a worksheet.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub(crate) enum CellType {
    #[default]
    Empty,
    /// Boolean values stored as 0/1
    Boolean,
    /// Plain numeric values
    Number,
    /// Date/time serials counted from the 1900 epoch
    NumberDateTime1900,
    NumberDate1900,
    NumberTime1900,
    /// Date/time serials counted from the 1904 epoch
    NumberDateTime1904,
    NumberDate1904,
    NumberTime1904,
    /// ISO 8601 date/time strings
    IsoDateTime,
    /// Inline string values
    InlineString,
    /// Shared string table references
    SharedString,
    /// Formula error values such as `#N/A`
    Error,
}

impl CellType {
    /// Maps a built-in number format id to a date/time cell type.
    pub(crate) fn parse_builtin_number_format_id(id: &str, is_1904: bool) -> Option<Self> {
        match id {
            "22" => Some(Self::date_time(true, true, is_1904)),
            "14" | "15" | "16" | "17" => Some(Self::date_time(true, false, is_1904)),
            "18" | "19" | "20" | "21" | "45" | "46" | "47" => Some(Self::date_time(false, true, is_1904)),
            _ => None,
        }
    }

    /// Scans a custom format code for date and time placeholders.
    /// Quoted literals, escaped characters and bracketed sections such as colors are ignored.
    pub(crate) fn parse_custom_number_format(format: &str, is_1904: bool) -> Self {
        let mut is_escaped = false;
        let mut is_literal = false;
        let mut is_bracket = false;
        let mut is_date = false;
        let mut is_time = false;
        for character in format.chars() {
            match character {
                _ if is_escaped => is_escaped = false,
                '_' | '\\' => is_escaped = true,
                '"' if !is_bracket => is_literal = !is_literal,
                _ if is_literal => (),
                '[' => is_bracket = true,
                ']' => is_bracket = false,
                _ if is_bracket => (),
                'Y' | 'y' | 'D' | 'd' => is_date = true,
                'H' | 'h' | 'S' | 's' => is_time = true,
                _ => (),
            }
        }
        if is_date || is_time {
            Self::date_time(is_date, is_time, is_1904)
        } else {
            Self::Number
        }
    }

    fn date_time(is_date: bool, is_time: bool, is_1904: bool) -> Self {
        match (is_date, is_time, is_1904) {
            (true, true, false) => Self::NumberDateTime1900,
            (true, true, true) => Self::NumberDateTime1904,
            (true, false, false) => Self::NumberDate1900,
            (true, false, true) => Self::NumberDate1904,
            (false, _, false) => Self::NumberTime1900,
            (false, _, true) => Self::NumberTime1904,
        }
    }
}

/// A single non-empty cell: position, type and raw text as stored in the sheet XML.
#[derive(Clone, Debug)]
pub(crate) struct Cell {
    /// Row index (0-based)
    pub(crate) row: usize,
    /// Column index (0-based)
    pub(crate) col: usize,
    pub(crate) kind: CellType,
    /// Raw value text (shared string index for `SharedString`)
    pub(crate) value: String,
}

impl Cell {
    /// Converts the cell to the JSON value stored in a record payload.
    ///
    /// Numbers keep integer form when they have no fraction, date and time
    /// serials become ISO text and error cells become null.
    pub(crate) fn to_json(&self, shared_strings: &[String]) -> Result<Value, RustyTableError> {
        let value = match self.kind {
            CellType::Empty | CellType::Error => Value::Null,
            CellType::Boolean => Value::Bool(self.value.trim() == "1"),
            CellType::Number => number_value(self.value.trim().parse::<f64>()?),
            CellType::SharedString => {
                let index = self.value.trim().parse::<usize>()?;
                Value::String(shared_strings.get(index).cloned().unwrap_or_default())
            }
            CellType::InlineString => Value::String(self.value.to_owned()),
            CellType::IsoDateTime => Value::String(self.value.replace('T', " ")),
            CellType::NumberDateTime1900 => self.serial_value(false, "%Y-%m-%d %H:%M:%S")?,
            CellType::NumberDateTime1904 => self.serial_value(true, "%Y-%m-%d %H:%M:%S")?,
            CellType::NumberDate1900 => self.serial_value(false, "%Y-%m-%d")?,
            CellType::NumberDate1904 => self.serial_value(true, "%Y-%m-%d")?,
            CellType::NumberTime1900 | CellType::NumberTime1904 => self.serial_value(false, "%H:%M:%S")?,
        };
        Ok(value)
    }

    fn serial_value(&self, is_1904: bool, format: &str) -> Result<Value, RustyTableError> {
        let serial = self.value.trim().parse::<f64>()?;
        Ok(match serial_to_datetime(serial, is_1904) {
            Some(datetime) => Value::String(datetime.format(format).to_string()),
            None => number_value(serial),
        })
    }
}

/// JSON number for a cell value; integral values are stored as integers.
pub(crate) fn number_value(number: f64) -> Value {
    if number.fract() == 0.0 && number.abs() < 9_007_199_254_740_992f64 {
        Value::from(number as i64)
    } else {
        Number::from_f64(number).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Converts a spreadsheet serial to a timestamp, rounded to the second.
/// The 1900 system counts the nonexistent 1900-02-29, so serials before it shift by a day.
fn serial_to_datetime(serial: f64, is_1904: bool) -> Option<NaiveDateTime> {
    let (epoch, mut days) = if is_1904 {
        (NaiveDate::from_ymd_opt(1904, 1, 1)?, serial.trunc() as i64)
    } else {
        (NaiveDate::from_ymd_opt(1899, 12, 30)?, serial.trunc() as i64)
    };
    if !is_1904 && days < 60 {
        days += 1;
    }
    let seconds = (serial.fract() * 86_400f64).round() as i64;
    let midnight = epoch.and_hms_opt(0, 0, 0)?;
    midnight
        .checked_add_signed(Duration::try_days(days)?)?
        .checked_add_signed(Duration::try_seconds(seconds)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cell(kind: CellType, value: &str) -> Cell {
        Cell {
            row: 0,
            col: 0,
            kind,
            value: value.to_owned(),
        }
    }

    #[test]
    fn custom_formats() {
        assert_eq!(CellType::parse_custom_number_format("yyyy-mm-dd", false), CellType::NumberDate1900);
        assert_eq!(CellType::parse_custom_number_format("yyyy-mm-dd hh:mm", true), CellType::NumberDateTime1904);
        assert_eq!(CellType::parse_custom_number_format("hh:mm:ss", false), CellType::NumberTime1900);
        assert_eq!(CellType::parse_custom_number_format("[Red]0.00", false), CellType::Number);
        assert_eq!(CellType::parse_custom_number_format("0.00\" days\"", false), CellType::Number);
        assert_eq!(CellType::parse_custom_number_format("#,##0_);\\(#,##0\\)", false), CellType::Number);
    }

    #[test]
    fn builtin_formats() {
        assert_eq!(CellType::parse_builtin_number_format_id("14", false), Some(CellType::NumberDate1900));
        assert_eq!(CellType::parse_builtin_number_format_id("22", true), Some(CellType::NumberDateTime1904));
        assert_eq!(CellType::parse_builtin_number_format_id("2", false), None);
    }

    #[test]
    fn numbers_keep_integer_form() {
        let strings = Vec::new();
        assert_eq!(cell(CellType::Number, "42").to_json(&strings).unwrap(), json!(42));
        assert_eq!(cell(CellType::Number, "42.0").to_json(&strings).unwrap(), json!(42));
        assert_eq!(cell(CellType::Number, "0.25").to_json(&strings).unwrap(), json!(0.25));
        assert!(cell(CellType::Number, "abc").to_json(&strings).is_err());
    }

    #[test]
    fn strings_booleans_and_errors() {
        let strings = vec!["zero".to_owned(), "one".to_owned()];
        assert_eq!(cell(CellType::SharedString, "1").to_json(&strings).unwrap(), json!("one"));
        assert_eq!(cell(CellType::InlineString, " padded ").to_json(&strings).unwrap(), json!(" padded "));
        assert_eq!(cell(CellType::Boolean, "1").to_json(&strings).unwrap(), json!(true));
        assert_eq!(cell(CellType::Boolean, "0").to_json(&strings).unwrap(), json!(false));
        assert_eq!(cell(CellType::Error, "#N/A").to_json(&strings).unwrap(), Value::Null);
    }

    #[test]
    fn date_serials() {
        let strings = Vec::new();
        assert_eq!(cell(CellType::NumberDate1900, "1").to_json(&strings).unwrap(), json!("1900-01-01"));
        assert_eq!(cell(CellType::NumberDate1900, "61").to_json(&strings).unwrap(), json!("1900-03-01"));
        assert_eq!(cell(CellType::NumberDate1900, "45292").to_json(&strings).unwrap(), json!("2024-01-01"));
        assert_eq!(cell(CellType::NumberDate1904, "0").to_json(&strings).unwrap(), json!("1904-01-01"));
        assert_eq!(
            cell(CellType::NumberDateTime1900, "45292.75").to_json(&strings).unwrap(),
            json!("2024-01-01 18:00:00")
        );
        assert_eq!(cell(CellType::NumberTime1900, "0.5").to_json(&strings).unwrap(), json!("12:00:00"));
        assert_eq!(
            cell(CellType::IsoDateTime, "2024-01-01T08:30:00").to_json(&strings).unwrap(),
            json!("2024-01-01 08:30:00")
        );
    }
}
