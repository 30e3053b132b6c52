//! # Workspace
//!
//! The entry point of the crate. A [`Workspace`] owns one DuckDB connection and
//! runs every operation as a single transaction over the schema registry and
//! the record store, so each call is either fully applied or not at all.
//!
//! Writers that pick the same new table name at the same time are serialized by
//! the unique constraint on descriptor names: the loser's transaction fails,
//! and the whole operation is replayed from a fresh snapshot.
use crate::config::Config;
use crate::database::batch::Batch;
use crate::database::descriptor::TableDescriptor;
use crate::database::descriptor::TableSummary;
use crate::database::open_connection;
use crate::database::page::total_pages;
use crate::database::page::Page;
use crate::database::page::PageRequest;
use crate::database::record::Payload;
use crate::database::record::SearchHit;
use crate::database::registry::SchemaRegistry;
use crate::database::store::RecordStore;
use crate::error::ResultMessage;
use crate::error::RustyTableError;
use crate::export::widen_header;
use crate::export::write_table;
use crate::export::ExportFormat;
use crate::sample::sample_batch;
use crate::sample::SAMPLE_TABLE;
use crate::spreadsheet::read_file;
use duckdb::Connection;
use duckdb::Transaction;
use std::io::Seek;
use std::io::Write;
use std::path::Path;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// A handle on the dynamic tables stored in one database.
///
/// Each handle owns its own connection. Use [`Workspace::try_clone`] to get a
/// handle for another thread on the same database.
pub struct Workspace {
    connection: Connection,
    config: Config,
}

impl Workspace {
    /// Opens the database named by `config`, creating the relations on first use.
    pub fn open(config: Config) -> Result<Self, RustyTableError> {
        let connection = open_connection(&config).with_prefix("Open database")?;
        info!(database = ?config.database, "Opened workspace");
        Ok(Workspace { connection, config })
    }

    /// Opens a private in-memory database with default settings.
    pub fn open_in_memory() -> Result<Self, RustyTableError> {
        Self::open(Config::default())
    }

    /// Returns a new handle on the same database, for use from another thread.
    pub fn try_clone(&self) -> Result<Self, RustyTableError> {
        Ok(Workspace {
            connection: self.connection.try_clone()?,
            config: self.config.clone(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs `body` in a transaction and commits it.
    ///
    /// A write conflict or a lost name race replays `body` from a fresh transaction,
    /// up to `conflict_retries` attempts in total. Any other error rolls back.
    fn transact<T, F>(&mut self, operation: &str, mut body: F) -> Result<T, RustyTableError>
    where
        F: FnMut(&Transaction) -> Result<T, RustyTableError>,
    {
        let attempts = self.config.conflict_retries.max(1);
        let mut attempt = 1usize;
        loop {
            let transaction = self.connection.transaction()?;
            let result = body(&transaction).and_then(|value| {
                transaction.commit()?;
                Ok(value)
            });
            match result {
                Err(error) if error.is_write_conflict() && attempt < attempts => {
                    warn!(operation, attempt, %error, "Write conflict, retrying");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Resolves which table a header belongs to, registering a new descriptor when needed.
    ///
    /// Returns `proposed_name` when it is new or already holds the same column
    /// set, otherwise the lowest free `{proposed_name}_{n}`.
    pub fn reconcile<S: AsRef<str>>(&mut self, proposed_name: &str, columns: &[S]) -> Result<String, RustyTableError> {
        check_table_name("name", proposed_name)?;
        let columns = columns.iter().map(|column| column.as_ref().to_owned()).collect::<Vec<_>>();
        self.transact("reconcile", |transaction| {
            SchemaRegistry::new(transaction).reconcile(proposed_name, &columns)
        })
    }

    /// Reconciles the batch header and appends every row to the resulting table.
    ///
    /// A batch without rows still registers its descriptor.
    pub fn ingest(&mut self, proposed_name: &str, batch: &Batch) -> Result<String, RustyTableError> {
        check_table_name("name", proposed_name)?;
        let (columns, payloads) = batch.normalize()?;
        let table = self.transact("ingest", |transaction| {
            let table = SchemaRegistry::new(transaction).reconcile(proposed_name, &columns)?;
            RecordStore::new(transaction).append(&table, &payloads)?;
            Ok(table)
        })?;
        info!(proposed = proposed_name, table = table.as_str(), rows = payloads.len(), "Ingested batch");
        Ok(table)
    }

    /// Ingests a `.csv`, `.xls`, `.xlsx` or `.xlsm` file and returns the target table names.
    ///
    /// A CSV file becomes one table named after the file stem; every non-empty
    /// sheet of a workbook becomes `{stem}_{sheet}`. All tables are written in
    /// one transaction.
    pub fn ingest_file<P: AsRef<Path>>(&mut self, path: P) -> Result<Vec<String>, RustyTableError> {
        let path = path.as_ref();
        let prefix = format!("Ingest '{}'", path.display());
        let batches = read_file(path, self.config.max_upload_bytes).with_prefix(&prefix)?;
        let mut normalized = Vec::with_capacity(batches.len());
        for (name, batch) in &batches {
            check_table_name("name", name)?;
            normalized.push((name.as_str(), batch.normalize().with_prefix(&prefix)?));
        }
        let tables = self.transact("ingest_file", |transaction| {
            let registry = SchemaRegistry::new(transaction);
            let store = RecordStore::new(transaction);
            let mut tables = Vec::with_capacity(normalized.len());
            for (name, (columns, payloads)) in &normalized {
                let table = registry.reconcile(name, columns)?;
                store.append(&table, payloads)?;
                tables.push(table);
            }
            Ok(tables)
        })?;
        info!(file = %path.display(), tables = ?tables, "Ingested file");
        Ok(tables)
    }

    /// Appends rows to a registered table, returning how many were stored.
    pub fn append(&mut self, table_name: &str, rows: &[Payload]) -> Result<usize, RustyTableError> {
        self.transact("append", |transaction| {
            SchemaRegistry::new(transaction).claim(table_name)?;
            RecordStore::new(transaction).append(table_name, rows)
        })?;
        debug!(table = table_name, rows = rows.len(), "Appended rows");
        Ok(rows.len())
    }

    /// Inserts a single row into a registered table and returns its id.
    pub fn insert_row(&mut self, table_name: &str, payload: &Payload) -> Result<i64, RustyTableError> {
        let id = self.transact("insert_row", |transaction| {
            SchemaRegistry::new(transaction).claim(table_name)?;
            RecordStore::new(transaction).insert(table_name, payload)
        })?;
        info!(table = table_name, id, "Inserted row");
        Ok(id)
    }

    /// Returns one page of a table in id order, filtered by the request's search term.
    ///
    /// A page past the end is empty; the totals still describe the whole result.
    pub fn page(&mut self, table_name: &str, request: &PageRequest) -> Result<Page, RustyTableError> {
        let (limit, offset) = request.window(self.config.page_size as u64)?;
        let search = request.search_term();
        self.transact("page", |transaction| {
            let descriptor = SchemaRegistry::new(transaction).require(table_name)?;
            let store = RecordStore::new(transaction);
            let total = store.count(table_name, search)?;
            let records = if offset < total {
                store.slice(table_name, search, limit, offset)?
            } else {
                Vec::new()
            };
            Ok(Page {
                table_name: descriptor.name,
                columns: descriptor.columns,
                records,
                total,
                pages: total_pages(total, limit),
                current_page: request.page,
            })
        })
    }

    /// Finds records containing `term` in every table; each table contributes at most
    /// `limit` matches (the configured search limit when `None`).
    ///
    /// An empty term matches nothing.
    pub fn search_all(&mut self, term: &str, limit: Option<usize>) -> Result<Vec<SearchHit>, RustyTableError> {
        let limit = limit.unwrap_or(self.config.search_limit);
        if limit == 0 {
            Err(RustyTableError::InvalidParameter {
                name: "limit".to_owned(),
                message: "must be greater than zero".to_owned(),
            })?
        }
        if term.is_empty() {
            return Ok(Vec::new());
        }
        self.transact("search_all", |transaction| {
            let store = RecordStore::new(transaction);
            let mut hits = Vec::new();
            for descriptor in SchemaRegistry::new(transaction).list()? {
                for record in store.slice(&descriptor.name, Some(term), limit as u64, 0)? {
                    hits.push(SearchHit {
                        table: record.table_name,
                        payload: record.payload,
                    });
                }
            }
            Ok(hits)
        })
    }

    /// Replaces the payload of record `id`, which must belong to `table_name`.
    pub fn update_row(&mut self, id: i64, table_name: &str, payload: &Payload) -> Result<(), RustyTableError> {
        self.transact("update_row", |transaction| {
            SchemaRegistry::new(transaction).claim(table_name)?;
            RecordStore::new(transaction).update(id, table_name, payload)
        })?;
        info!(table = table_name, id, "Updated row");
        Ok(())
    }

    /// Renames a table and retags all of its records; ids and payloads are kept.
    pub fn rename(&mut self, old_name: &str, new_name: &str) -> Result<(), RustyTableError> {
        check_table_name("new_name", new_name)?;
        let moved = self.transact("rename", |transaction| {
            SchemaRegistry::new(transaction).rename(old_name, new_name)?;
            RecordStore::new(transaction).retag(old_name, new_name)
        })?;
        info!(from = old_name, to = new_name, records = moved, "Renamed table");
        Ok(())
    }

    /// Deletes a table together with all of its records.
    pub fn delete(&mut self, table_name: &str) -> Result<(), RustyTableError> {
        let removed = self.transact("delete", |transaction| {
            SchemaRegistry::new(transaction).remove(table_name)?;
            RecordStore::new(transaction).delete_all(table_name)
        })?;
        info!(table = table_name, records = removed, "Deleted table");
        Ok(())
    }

    /// Returns the descriptor of a registered table.
    pub fn describe(&self, table_name: &str) -> Result<TableDescriptor, RustyTableError> {
        SchemaRegistry::new(&self.connection).require(table_name)
    }

    /// All tables, oldest first, with their current record counts.
    pub fn list_tables(&mut self) -> Result<Vec<TableSummary>, RustyTableError> {
        self.transact("list_tables", |transaction| {
            let store = RecordStore::new(transaction);
            let mut summaries = Vec::new();
            for descriptor in SchemaRegistry::new(transaction).list()? {
                let record_count = store.count(&descriptor.name, None)?;
                summaries.push(TableSummary { descriptor, record_count });
            }
            Ok(summaries)
        })
    }

    /// Number of records in a table, optionally only those containing `search`.
    pub fn count(&mut self, table_name: &str, search: Option<&str>) -> Result<u64, RustyTableError> {
        let search = search.filter(|term| !term.is_empty());
        self.transact("count", |transaction| {
            SchemaRegistry::new(transaction).require(table_name)?;
            RecordStore::new(transaction).count(table_name, search)
        })
    }

    /// Returns the export header and every payload of a table in id order.
    ///
    /// The header lists the descriptor's columns, then any other payload keys in
    /// first-seen order.
    pub fn export_rows(&mut self, table_name: &str) -> Result<(Vec<String>, Vec<Payload>), RustyTableError> {
        self.transact("export_rows", |transaction| {
            let descriptor = SchemaRegistry::new(transaction).require(table_name)?;
            let payloads = RecordStore::new(transaction)
                .all(table_name)?
                .into_iter()
                .map(|record| record.payload)
                .collect::<Vec<_>>();
            let header = widen_header(&descriptor.columns, &payloads);
            Ok((header, payloads))
        })
    }

    /// Writes a table as CSV or XLSX into `writer`.
    pub fn export_table<W: Write + Seek>(
        &mut self,
        table_name: &str,
        format: ExportFormat,
        writer: W,
    ) -> Result<(), RustyTableError> {
        let (header, payloads) = self.export_rows(table_name)?;
        write_table(format, table_name, &header, &payloads, writer)
            .with_prefix(&format!("Export '{table_name}' as {format}"))?;
        info!(table = table_name, %format, rows = payloads.len(), "Exported table");
        Ok(())
    }

    /// Installs the `sample_data` table when no table exists yet.
    /// Returns whether anything was created.
    pub fn seed_sample_data(&mut self) -> Result<bool, RustyTableError> {
        let (columns, payloads) = sample_batch().normalize()?;
        let seeded = self.transact("seed_sample_data", |transaction| {
            let registry = SchemaRegistry::new(transaction);
            if !registry.list()?.is_empty() {
                return Ok(false);
            }
            registry.create(SAMPLE_TABLE, &columns)?;
            RecordStore::new(transaction).append(SAMPLE_TABLE, &payloads)?;
            Ok(true)
        })?;
        if seeded {
            info!(table = SAMPLE_TABLE, rows = payloads.len(), "Seeded sample data");
        }
        Ok(seeded)
    }
}

/// Rejects blank table names.
fn check_table_name(parameter: &str, name: &str) -> Result<(), RustyTableError> {
    if name.trim().is_empty() {
        Err(RustyTableError::InvalidParameter {
            name: parameter.to_owned(),
            message: "table name must not be blank".to_owned(),
        })?
    }
    Ok(())
}
