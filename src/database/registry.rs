use crate::database::descriptor::normalize_columns;
use crate::database::descriptor::TableDescriptor;
use crate::database::timestamp_from_micros;
use crate::database::timestamp_param;
use crate::error::RustyTableError;
use chrono::Utc;
use duckdb::params;
use duckdb::Connection;
use duckdb::Params;
use tracing::info;

/// Descriptor operations over one connection (usually an open transaction).
///
/// Existence checks made here are only advisory. The primary key on
/// `dynamic_tables.name` is what rejects a concurrent writer that picked the
/// same new name, and the caller replays its transaction when that happens.
pub(crate) struct SchemaRegistry<'a> {
    connection: &'a Connection,
}

impl<'a> SchemaRegistry<'a> {
    pub(crate) fn new(connection: &'a Connection) -> Self {
        SchemaRegistry { connection }
    }

    /// Looks up a descriptor by name.
    pub(crate) fn get(&self, name: &str) -> Result<Option<TableDescriptor>, RustyTableError> {
        let descriptors = self.query(
            "SELECT name, columns, epoch_us(created_at) FROM dynamic_tables WHERE name = ?",
            [name],
        )?;
        Ok(descriptors.into_iter().next())
    }

    /// Looks up a descriptor that must exist.
    pub(crate) fn require(&self, name: &str) -> Result<TableDescriptor, RustyTableError> {
        self.get(name)?
            .ok_or_else(|| RustyTableError::TableNotFound(name.to_owned()))
    }

    /// Rewrites a descriptor in place before records are added under it.
    ///
    /// The row is deleted and inserted again unchanged, so a concurrent rename or
    /// delete of the same descriptor fails one of the two transactions with a
    /// tuple deletion conflict instead of leaving records tagged with a name that
    /// no longer exists.
    pub(crate) fn claim(&self, name: &str) -> Result<TableDescriptor, RustyTableError> {
        let descriptor = self.require(name)?;
        self.connection
            .execute("DELETE FROM dynamic_tables WHERE name = ?", [name])?;
        self.insert(&descriptor)?;
        Ok(descriptor)
    }

    pub(crate) fn exists(&self, name: &str) -> Result<bool, RustyTableError> {
        let count: i64 = self.connection.query_row(
            "SELECT count(*) FROM dynamic_tables WHERE name = ?",
            [name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// All descriptors, oldest first.
    pub(crate) fn list(&self) -> Result<Vec<TableDescriptor>, RustyTableError> {
        self.query(
            "SELECT name, columns, epoch_us(created_at) FROM dynamic_tables ORDER BY created_at, name",
            [],
        )
    }

    fn query<P: Params>(&self, sql: &str, params: P) -> Result<Vec<TableDescriptor>, RustyTableError> {
        let mut statement = self.connection.prepare(sql)?;
        let rows = statement.query_map(params, |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
        })?;
        let mut descriptors = Vec::new();
        for row in rows {
            let (name, columns, created_at) = row?;
            descriptors.push(TableDescriptor {
                name,
                columns: serde_json::from_str(&columns)?,
                created_at: timestamp_from_micros(created_at),
            });
        }
        Ok(descriptors)
    }

    /// Inserts a new descriptor; fails on the unique name constraint if it already exists.
    pub(crate) fn create(&self, name: &str, columns: &[String]) -> Result<TableDescriptor, RustyTableError> {
        let descriptor = TableDescriptor {
            name: name.to_owned(),
            columns: columns.to_vec(),
            created_at: timestamp_from_micros(Utc::now().timestamp_micros()),
        };
        self.insert(&descriptor)?;
        Ok(descriptor)
    }

    fn insert(&self, descriptor: &TableDescriptor) -> Result<(), RustyTableError> {
        self.connection.execute(
            "INSERT INTO dynamic_tables (name, columns, created_at) VALUES (?, ?, ?::TIMESTAMP)",
            params![
                descriptor.name,
                serde_json::to_string(&descriptor.columns)?,
                timestamp_param(&descriptor.created_at)
            ],
        )?;
        Ok(())
    }

    /// Decides which table an incoming header belongs to, creating it when needed.
    ///
    /// The same column set (in any order) reuses `proposed_name`; any other set
    /// forks into the lowest free `{proposed_name}_{n}`.
    pub(crate) fn reconcile(&self, proposed_name: &str, columns: &[String]) -> Result<String, RustyTableError> {
        let columns = normalize_columns(columns)?;
        match self.get(proposed_name)? {
            None => {
                self.create(proposed_name, &columns)?;
                info!(table = proposed_name, columns = columns.len(), "created table");
                Ok(proposed_name.to_owned())
            }
            Some(existing) if existing.has_column_set(&columns) => {
                self.claim(&existing.name)?;
                Ok(existing.name)
            }
            Some(existing) => {
                let name = self.next_fork_name(proposed_name)?;
                self.create(&name, &columns)?;
                info!(
                    table = proposed_name,
                    fork = name.as_str(),
                    existing_columns = ?existing.columns,
                    incoming_columns = ?columns,
                    "column set differs, forked table"
                );
                Ok(name)
            }
        }
    }

    /// Lowest `{base}_{counter}` (counter from 1) not registered yet.
    fn next_fork_name(&self, base: &str) -> Result<String, RustyTableError> {
        let mut counter = 1usize;
        loop {
            let name = format!("{base}_{counter}");
            if !self.exists(&name)? {
                return Ok(name);
            }
            counter += 1;
        }
    }

    /// Renames a descriptor. Records are retagged separately by the caller, in the same transaction.
    pub(crate) fn rename(&self, old_name: &str, new_name: &str) -> Result<(), RustyTableError> {
        if !self.exists(old_name)? {
            Err(RustyTableError::TableNotFound(old_name.to_owned()))?
        }
        if self.exists(new_name)? {
            Err(RustyTableError::TableConflict(new_name.to_owned()))?
        }
        self.connection.execute(
            "UPDATE dynamic_tables SET name = ? WHERE name = ?",
            params![new_name, old_name],
        )?;
        Ok(())
    }

    /// Removes a descriptor. Records are deleted separately by the caller, in the same transaction.
    pub(crate) fn remove(&self, name: &str) -> Result<(), RustyTableError> {
        let removed = self
            .connection
            .execute("DELETE FROM dynamic_tables WHERE name = ?", [name])?;
        if removed == 0 {
            Err(RustyTableError::TableNotFound(name.to_owned()))?
        }
        Ok(())
    }
}
