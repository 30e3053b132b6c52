//! # Database Module
//!
//! Persistent layout of the dynamic tables. Two relations live in DuckDB:
//!
//! - `dynamic_tables`: one row per table descriptor, keyed by its unique name,
//!   with the ordered column list serialized as JSON text.
//! - `data_records`: one row per record, tagged with the owning table name and
//!   carrying the payload as JSON text. Records reach their descriptor only
//!   through the indexed `table_name` tag.
use crate::config::Config;
use crate::error::RustyTableError;
use chrono::DateTime;
use chrono::Utc;
use duckdb::Connection;
use tracing::debug;

pub(crate) mod batch;
pub(crate) mod descriptor;
pub(crate) mod page;
pub(crate) mod record;
pub(crate) mod registry;
pub(crate) mod store;

/// Statements creating the two relations; safe to run on every open.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS dynamic_tables (
    name VARCHAR PRIMARY KEY,
    columns VARCHAR NOT NULL,
    created_at TIMESTAMP NOT NULL
);
CREATE SEQUENCE IF NOT EXISTS data_records_id_seq START 1;
CREATE TABLE IF NOT EXISTS data_records (
    id BIGINT NOT NULL DEFAULT nextval('data_records_id_seq'),
    table_name VARCHAR NOT NULL,
    data VARCHAR NOT NULL,
    created_at TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS data_records_table_name_idx ON data_records (table_name);
"#;

/// Opens the configured database and makes sure both relations exist.
pub(crate) fn open_connection(config: &Config) -> Result<Connection, RustyTableError> {
    let connection = match &config.database {
        Some(path) => Connection::open(path)?,
        None => Connection::open_in_memory()?,
    };
    connection.execute_batch(SCHEMA)?;
    debug!(database = ?config.database, "schema ready");
    Ok(connection)
}

/// Formats a timestamp the way it is bound into a `?::TIMESTAMP` parameter.
pub(crate) fn timestamp_param(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

/// Rebuilds a timestamp selected through `epoch_us(created_at)`.
pub(crate) fn timestamp_from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}
