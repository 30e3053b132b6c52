use crate::database::batch::Batch;
use crate::error::RustyTableError;
use csv::ReaderBuilder;
use encoding_rs::Encoding;
use encoding_rs::WINDOWS_1252;
use serde_json::Number;
use serde_json::Value;
use std::borrow::Cow;
use tracing::debug;

/// Parses CSV bytes into a batch; the first record is the header.
/// Returns `None` when the file has no header or no data rows.
pub(crate) fn read_batch(bytes: &[u8]) -> Result<Option<Batch>, RustyTableError> {
    let text = decode(bytes);
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    if headers.iter().all(str::is_empty) {
        return Ok(None);
    }
    let columns = headers
        .iter()
        .enumerate()
        .map(|(position, name)| match name.trim() {
            "" => format!("Unnamed: {position}"),
            _ => name.to_owned(),
        })
        .collect::<Vec<_>>();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        rows.push(record.iter().map(infer_value).collect::<Vec<_>>());
    }
    if rows.is_empty() {
        return Ok(None);
    }
    Ok(Some(Batch::new(columns, rows)))
}

/// Decodes by BOM, then as UTF-8, falling back to Windows-1252.
fn decode(bytes: &[u8]) -> Cow<'_, str> {
    if let Some((encoding, bom_length)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_length..]);
        return text;
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => {
            debug!("CSV is not valid UTF-8, decoding as Windows-1252");
            let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
            text
        }
    }
}

/// Infers a JSON value from a CSV field.
pub(crate) fn infer_value(field: &str) -> Value {
    let trimmed = field.trim();
    if field.is_empty() {
        Value::Null
    } else if let Ok(integer) = trimmed.parse::<i64>() {
        Value::from(integer)
    } else if let Some(number) = trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
        Value::Number(number)
    } else if trimmed.eq_ignore_ascii_case("true") {
        Value::Bool(true)
    } else if trimmed.eq_ignore_ascii_case("false") {
        Value::Bool(false)
    } else {
        Value::String(field.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn values_are_inferred() {
        assert_eq!(infer_value(""), Value::Null);
        assert_eq!(infer_value("42"), json!(42));
        assert_eq!(infer_value("-7"), json!(-7));
        assert_eq!(infer_value("2.5"), json!(2.5));
        assert_eq!(infer_value("TRUE"), json!(true));
        assert_eq!(infer_value("False"), json!(false));
        assert_eq!(infer_value("NaN"), json!("NaN"));
        assert_eq!(infer_value("007abc"), json!("007abc"));
        assert_eq!(infer_value(" padded "), json!(" padded "));
    }

    #[test]
    fn header_and_rows() {
        let batch = read_batch(b"First Name,Age\nAnn,31\n\nBob\n").unwrap().unwrap();
        assert_eq!(batch.columns(), ["First Name", "Age"]);
        assert_eq!(batch.rows(), [vec![json!("Ann"), json!(31)], vec![json!("Bob")]]);
    }

    #[test]
    fn bom_is_stripped() {
        let batch = read_batch("\u{feff}name\nZoë\n".as_bytes()).unwrap().unwrap();
        assert_eq!(batch.columns(), ["name"]);
        assert_eq!(batch.rows(), [vec![json!("Zoë")]]);
    }

    #[test]
    fn legacy_encoding_falls_back_to_windows_1252() {
        let batch = read_batch(b"name\ncaf\xe9\n").unwrap().unwrap();
        assert_eq!(batch.rows(), [vec![json!("café")]]);
    }

    #[test]
    fn files_without_data_have_no_batch() {
        assert!(read_batch(b"").unwrap().is_none());
        assert!(read_batch(b"a,b\n").unwrap().is_none());
        assert!(read_batch(b"a,b\n,\n").unwrap().is_none());
    }
}
