use crate::database::record::Payload;
use crate::database::record::Record;
use crate::database::timestamp_from_micros;
use crate::database::timestamp_param;
use crate::error::RustyTableError;
use chrono::Utc;
use duckdb::params;
use duckdb::Connection;
use duckdb::Params;
use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::Serializer;
use std::io;

/// Record operations over one connection (usually an open transaction).
///
/// Search always matches a case-sensitive substring of the whole serialized
/// payload, never an individual field: `"a": 1` finds `{"a": 1, "b": 2}`.
pub(crate) struct RecordStore<'a> {
    connection: &'a Connection,
}

impl<'a> RecordStore<'a> {
    pub(crate) fn new(connection: &'a Connection) -> Self {
        RecordStore { connection }
    }

    /// Appends one record per payload, all tagged with `table_name`.
    pub(crate) fn append(&self, table_name: &str, rows: &[Payload]) -> Result<(), RustyTableError> {
        let created_at = timestamp_param(&Utc::now());
        let mut statement = self.connection.prepare(
            "INSERT INTO data_records (table_name, data, created_at) VALUES (?, ?, ?::TIMESTAMP)",
        )?;
        for row in rows {
            statement.execute(params![table_name, payload_text(row)?, created_at])?;
        }
        Ok(())
    }

    /// Inserts a single record and returns its id.
    pub(crate) fn insert(&self, table_name: &str, payload: &Payload) -> Result<i64, RustyTableError> {
        let id = self.connection.query_row(
            "INSERT INTO data_records (table_name, data, created_at) VALUES (?, ?, ?::TIMESTAMP) RETURNING id",
            params![table_name, payload_text(payload)?, timestamp_param(&Utc::now())],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(id)
    }

    /// Counts the records of a table, optionally only those matching `search`.
    pub(crate) fn count(&self, table_name: &str, search: Option<&str>) -> Result<u64, RustyTableError> {
        let count: i64 = match search {
            Some(term) => self.connection.query_row(
                "SELECT count(*) FROM data_records WHERE table_name = ? AND contains(data, ?)",
                params![table_name, term],
                |row| row.get(0),
            )?,
            None => self.connection.query_row(
                "SELECT count(*) FROM data_records WHERE table_name = ?",
                [table_name],
                |row| row.get(0),
            )?,
        };
        Ok(count as u64)
    }

    /// Returns up to `limit` records of a table in id order, skipping the first `offset`.
    pub(crate) fn slice(
        &self,
        table_name: &str,
        search: Option<&str>,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Record>, RustyTableError> {
        let limit = sql_bound(limit);
        let offset = sql_bound(offset);
        match search {
            Some(term) => self.query(
                "SELECT id, table_name, data, epoch_us(created_at) FROM data_records \
                 WHERE table_name = ? AND contains(data, ?) ORDER BY id LIMIT ? OFFSET ?",
                params![table_name, term, limit, offset],
            ),
            None => self.query(
                "SELECT id, table_name, data, epoch_us(created_at) FROM data_records \
                 WHERE table_name = ? ORDER BY id LIMIT ? OFFSET ?",
                params![table_name, limit, offset],
            ),
        }
    }

    /// Every record of a table in insertion order.
    pub(crate) fn all(&self, table_name: &str) -> Result<Vec<Record>, RustyTableError> {
        self.query(
            "SELECT id, table_name, data, epoch_us(created_at) FROM data_records \
             WHERE table_name = ? ORDER BY id",
            [table_name],
        )
    }

    /// Replaces the payload of the record with this id, provided it belongs to `table_name`.
    pub(crate) fn update(&self, id: i64, table_name: &str, payload: &Payload) -> Result<(), RustyTableError> {
        let matching: i64 = self.connection.query_row(
            "SELECT count(*) FROM data_records WHERE id = ? AND table_name = ?",
            params![id, table_name],
            |row| row.get(0),
        )?;
        if matching == 0 {
            Err(RustyTableError::RowNotFound {
                id,
                table: table_name.to_owned(),
            })?
        }
        self.connection.execute(
            "UPDATE data_records SET data = ? WHERE id = ? AND table_name = ?",
            params![payload_text(payload)?, id, table_name],
        )?;
        Ok(())
    }

    /// Moves every record tagged `old_name` to `new_name`, returning how many moved.
    pub(crate) fn retag(&self, old_name: &str, new_name: &str) -> Result<usize, RustyTableError> {
        let moved = self.connection.execute(
            "UPDATE data_records SET table_name = ? WHERE table_name = ?",
            params![new_name, old_name],
        )?;
        Ok(moved)
    }

    /// Deletes every record tagged `table_name`, returning how many were removed.
    pub(crate) fn delete_all(&self, table_name: &str) -> Result<usize, RustyTableError> {
        let removed = self
            .connection
            .execute("DELETE FROM data_records WHERE table_name = ?", [table_name])?;
        Ok(removed)
    }

    fn query<P: Params>(&self, sql: &str, params: P) -> Result<Vec<Record>, RustyTableError> {
        let mut statement = self.connection.prepare(sql)?;
        let rows = statement.query_map(params, |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;
        let mut records = Vec::new();
        for row in rows {
            let (id, table_name, data, created_at) = row?;
            records.push(Record {
                id,
                table_name,
                payload: serde_json::from_str(&data)?,
                created_at: timestamp_from_micros(created_at),
            });
        }
        Ok(records)
    }
}

/// Writes `", "` between entries and `": "` after keys, the layout search terms are written against.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}

/// Serialized form of a payload as stored in `data_records.data`.
fn payload_text(payload: &Payload) -> Result<String, RustyTableError> {
    let mut buffer = Vec::new();
    payload.serialize(&mut Serializer::with_formatter(&mut buffer, SpacedFormatter))?;
    Ok(String::from_utf8(buffer).map_err(|error| error.utf8_error())?)
}

/// Largest LIMIT/OFFSET DuckDB binds; no table holds more rows, so clamping keeps results exact.
const MAX_SQL_BOUND: u64 = (1 << 62) - 1;

fn sql_bound(value: u64) -> i64 {
    value.min(MAX_SQL_BOUND) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::database::open_connection;
    use crate::error::ErrorKind;
    use serde_json::json;
    use serde_json::Value;

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn append_assigns_increasing_ids() {
        let connection = open_connection(&Config::default()).unwrap();
        let store = RecordStore::new(&connection);
        store
            .append("t", &[payload(json!({"a": 1})), payload(json!({"a": 2}))])
            .unwrap();
        store.append("u", &[payload(json!({"a": 3}))]).unwrap();

        let records = store.all("t").unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].id < records[1].id);
        assert_eq!(records[1].payload, payload(json!({"a": 2})));
        assert_eq!(store.count("u", None).unwrap(), 1);
    }

    #[test]
    fn search_is_a_case_sensitive_substring_of_the_row() {
        let connection = open_connection(&Config::default()).unwrap();
        let store = RecordStore::new(&connection);
        store
            .append(
                "t",
                &[
                    payload(json!({"name": "Ada", "city": "London"})),
                    payload(json!({"name": "Alan", "city": "Wilmslow"})),
                ],
            )
            .unwrap();

        assert_eq!(store.count("t", Some("London")).unwrap(), 1);
        assert_eq!(store.count("t", Some("london")).unwrap(), 0);
        // field names are part of the serialized row
        assert_eq!(store.count("t", Some("city")).unwrap(), 2);
        assert_eq!(store.count("t", Some("%")).unwrap(), 0);
        assert_eq!(store.count("t", Some(r#""name": "Ada""#)).unwrap(), 1);
        assert_eq!(store.count("t", Some(r#""name":"Ada""#)).unwrap(), 0);
        let records = store.slice("t", Some("Al"), 10, 0).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload["name"], json!("Alan"));
    }

    #[test]
    fn payload_text_spaces_separators() {
        let row = payload(json!({"name": "Zoë", "tags": [1, 2], "nested": {"a": null}}));
        assert_eq!(
            payload_text(&row).unwrap(),
            r#"{"name": "Zoë", "tags": [1, 2], "nested": {"a": null}}"#
        );
        assert_eq!(payload_text(&Payload::new()).unwrap(), "{}");
    }

    #[test]
    fn slice_pages_in_id_order() {
        let connection = open_connection(&Config::default()).unwrap();
        let store = RecordStore::new(&connection);
        let rows: Vec<Payload> = (0..7).map(|n| payload(json!({"n": n}))).collect();
        store.append("t", &rows).unwrap();

        let page = store.slice("t", None, 3, 3).unwrap();
        let numbers: Vec<&Value> = page.iter().map(|record| &record.payload["n"]).collect();
        assert_eq!(numbers, vec![&json!(3), &json!(4), &json!(5)]);
        assert!(store.slice("t", None, 3, 9).unwrap().is_empty());
        assert!(store.slice("t", None, 3, u64::MAX).unwrap().is_empty());
        assert_eq!(store.slice("t", None, u64::MAX, 5).unwrap().len(), 2);
        assert_eq!(store.slice("t", Some("n"), u64::MAX, 0).unwrap().len(), 7);
    }

    #[test]
    fn update_requires_matching_table() {
        let connection = open_connection(&Config::default()).unwrap();
        let store = RecordStore::new(&connection);
        let id = store.insert("y", &payload(json!({"a": 1}))).unwrap();

        let error = store.update(id, "x", &payload(json!({"a": 2}))).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotFound);

        store.update(id, "y", &payload(json!({"b": 2}))).unwrap();
        assert_eq!(store.all("y").unwrap()[0].payload, payload(json!({"b": 2})));
    }

    #[test]
    fn retag_and_delete_touch_only_one_tag() {
        let connection = open_connection(&Config::default()).unwrap();
        let store = RecordStore::new(&connection);
        store.append("a", &[payload(json!({"x": 1})), payload(json!({"x": 2}))]).unwrap();
        store.append("c", &[payload(json!({"x": 3}))]).unwrap();

        assert_eq!(store.retag("a", "b").unwrap(), 2);
        assert_eq!(store.count("a", None).unwrap(), 0);
        assert_eq!(store.count("b", None).unwrap(), 2);

        assert_eq!(store.delete_all("b").unwrap(), 2);
        assert_eq!(store.count("b", None).unwrap(), 0);
        assert_eq!(store.count("c", None).unwrap(), 1);
    }
}
