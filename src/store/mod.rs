//! Relational loader over an embedded SQLite store.
//!
//! A *database* is the file `<data_dir>/<database>.db`. Every *schema* is a sibling file
//! `<data_dir>/<database>.<schema>.db`, attached under the schema name whenever a [`Session`]
//! opens, so schema-qualified SQL (`"schema"."table"`) reads the same as on a server.
//!
//! DDL is idempotent: creating an object that exists (including one a concurrent worker created
//! a moment earlier) yields [`DdlOutcome::AlreadyExists`] instead of an error.
//!
//! ```no_run
//! use tabular_ingest::config::StoreConfig;
//! use tabular_ingest::store::Datastore;
//!
//! # fn main() -> Result<(), tabular_ingest::StoreError> {
//! let store = Datastore::new(StoreConfig::new("/var/lib/ingest"))?;
//! store.ensure_database("oberon")?;
//! let store = store.with_database("oberon")?;
//! store.ensure_schema("source_files")?;
//! # Ok(())
//! # }
//! ```

mod audit;
mod convert;
mod identifier;
mod session;
mod typemap;

use std::fmt;
use std::fs;
use std::path::PathBuf;

use rusqlite::Connection;

use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::types::DataSet;

pub use audit::{AuditEntry, AuditRecord, RawDatasetAudit};
pub use identifier::{quote_ident, sanitize_table_name};
pub use session::{Session, TableShape};
pub use typemap::{
    TypeDirection, align_types, native_type, normalize_native_label, relational_type,
};

use identifier::validate_name;

/// Whether a [`Session`] can still run statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Result of an idempotent DDL statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DdlOutcome {
    Created,
    AlreadyExists,
}

impl fmt::Display for DdlOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DdlOutcome::Created => f.write_str("created"),
            DdlOutcome::AlreadyExists => f.write_str("already exists"),
        }
    }
}

/// Handle on one database of the store. Cheap to clone; holds no connection.
#[derive(Debug, Clone)]
pub struct Datastore {
    config: StoreConfig,
}

impl Datastore {
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        validate_name("database", &config.database)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn database(&self) -> &str {
        &self.config.database
    }

    /// The same store, pointed at another database.
    pub fn with_database(&self, database: &str) -> StoreResult<Self> {
        Self::new(self.config.with_database(database))
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_file(&self.config.database)
    }

    pub(crate) fn database_file(&self, database: &str) -> PathBuf {
        self.config.data_dir.join(format!("{database}.db"))
    }

    pub(crate) fn schema_path(&self, schema: &str) -> PathBuf {
        self.config
            .data_dir
            .join(format!("{}.{schema}.db", self.config.database))
    }

    /// Schemas present on disk for this database, sorted by name.
    pub(crate) fn schema_names(&self) -> StoreResult<Vec<String>> {
        let prefix = format!("{}.", self.config.database);
        let mut names = Vec::new();
        let entries = match fs::read_dir(&self.config.data_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let file_name = entry?.file_name();
            let Some(name) = file_name.to_str() else { continue };
            let Some(schema) = name
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_suffix(".db"))
            else {
                continue;
            };
            if validate_name("schema", schema).is_ok() {
                names.push(schema.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Open a session on this database, attaching every existing schema.
    pub fn connect(&self) -> StoreResult<Session> {
        fs::create_dir_all(&self.config.data_dir)?;
        let conn = Connection::open(self.database_path())?;
        Session::open(self.clone(), conn)
    }

    /// Run `f` on a fresh session that is closed on every exit path.
    pub fn with_session<T>(&self, f: impl FnOnce(&mut Session) -> StoreResult<T>) -> StoreResult<T> {
        let mut session = self.connect()?;
        f(&mut session)
    }

    pub fn ensure_database(&self, name: &str) -> StoreResult<DdlOutcome> {
        self.with_session(|s| s.ensure_database(name))
    }

    pub fn ensure_schema(&self, schema: &str) -> StoreResult<DdlOutcome> {
        self.with_session(|s| s.ensure_schema(schema))
    }

    pub fn ensure_table(
        &self,
        schema: &str,
        table: &str,
        columns: &[(String, String)],
    ) -> StoreResult<DdlOutcome> {
        self.with_session(|s| s.ensure_table(schema, table, columns))
    }

    pub fn bulk_load(&self, schema: &str, table: &str, data: &DataSet) -> StoreResult<usize> {
        self.with_session(|s| s.bulk_load(schema, table, data))
    }

    pub fn record_audit<A: AuditEntry>(&self, schema: &str, entry: &A) -> StoreResult<()> {
        self.with_session(|s| s.record_audit(schema, entry))
    }

    pub fn query(&self, sql: &str) -> StoreResult<DataSet> {
        self.with_session(|s| s.query(sql))
    }
}
