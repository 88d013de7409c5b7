use std::fs::OpenOptions;
use std::io::ErrorKind;

use rusqlite::{Connection, params_from_iter};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::ingestion::frame::unify;
use crate::types::{DataSet, Field, Schema, Value};

use super::audit::AuditEntry;
use super::convert::{from_sql, to_sql};
use super::identifier::{quote_ident, validate_name};
use super::typemap::native_type;
use super::{ConnectionState, Datastore, DdlOutcome};

/// Row and column count of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableShape {
    pub rows: usize,
    pub columns: usize,
}

/// A scoped connection to one database.
///
/// Connected from [`Datastore::connect`] until [`Session::close`] or drop. Every operation on a
/// closed session fails with [`StoreError::NotConnected`].
pub struct Session {
    store: Datastore,
    conn: Option<Connection>,
}

impl Session {
    pub(crate) fn open(store: Datastore, conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(store.config().busy_timeout())?;
        enable_wal(&conn, "main")?;
        let session = Self {
            store,
            conn: Some(conn),
        };
        for schema in session.store.schema_names()? {
            session.attach(&schema)?;
        }
        debug!(database = %session.store.database(), "session opened");
        Ok(session)
    }

    pub fn state(&self) -> ConnectionState {
        if self.conn.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn datastore(&self) -> &Datastore {
        &self.store
    }

    /// Close the connection. Closing twice is a no-op.
    pub fn close(&mut self) -> StoreResult<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| e)?;
            debug!(database = %self.store.database(), "session closed");
        }
        Ok(())
    }

    fn conn(&self, operation: &'static str) -> StoreResult<&Connection> {
        self.conn
            .as_ref()
            .ok_or(StoreError::NotConnected { operation })
    }

    fn is_attached(&self, schema: &str) -> StoreResult<bool> {
        let conn = self.conn("attach")?;
        let mut stmt = conn.prepare("SELECT 1 FROM pragma_database_list WHERE name = ?1")?;
        Ok(stmt.exists([schema])?)
    }

    fn attach(&self, schema: &str) -> StoreResult<()> {
        let conn = self.conn("attach")?;
        let path = self.store.schema_path(schema);
        conn.execute(
            &format!("ATTACH DATABASE ?1 AS {}", quote_ident(schema)),
            [path.to_string_lossy().into_owned()],
        )?;
        enable_wal(conn, schema)
    }

    /// Attach `schema` if another session created it after this one opened.
    fn ensure_attached(&self, schema: &str) -> StoreResult<()> {
        validate_name("schema", schema)?;
        if self.is_attached(schema)? {
            return Ok(());
        }
        if self.store.schema_path(schema).exists() {
            return self.attach(schema);
        }
        Err(StoreError::MissingSchema {
            schema: schema.to_string(),
        })
    }

    /// Create the database `name` next to the current one.
    pub fn ensure_database(&self, name: &str) -> StoreResult<DdlOutcome> {
        self.conn("ensure_database")?;
        validate_name("database", name)?;

        let path = self.store.database_file(name);
        let outcome = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => {
                let conn = Connection::open(&path)?;
                enable_wal(&conn, "main")?;
                DdlOutcome::Created
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => DdlOutcome::AlreadyExists,
            Err(e) => return Err(e.into()),
        };
        info!(database = %name, outcome = %outcome, "ensure database");
        Ok(outcome)
    }

    pub fn ensure_schema(&self, schema: &str) -> StoreResult<DdlOutcome> {
        self.conn("ensure_schema")?;
        validate_name("schema", schema)?;

        let outcome = if self.is_attached(schema)? {
            DdlOutcome::AlreadyExists
        } else {
            let path = self.store.schema_path(schema);
            let outcome = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => DdlOutcome::Created,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => DdlOutcome::AlreadyExists,
                Err(e) => return Err(e.into()),
            };
            self.attach(schema)?;
            outcome
        };
        info!(database = %self.store.database(), schema = %schema, outcome = %outcome, "ensure schema");
        Ok(outcome)
    }

    /// Create `schema.table` with `(column, relational type)` pairs unless it exists.
    pub fn ensure_table(
        &self,
        schema: &str,
        table: &str,
        columns: &[(String, String)],
    ) -> StoreResult<DdlOutcome> {
        self.ensure_attached(schema)?;
        let outcome = if self.table_exists(schema, table)? {
            DdlOutcome::AlreadyExists
        } else {
            let cols = columns
                .iter()
                .map(|(c, t)| format!("{} {t}", quote_ident(c)))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "CREATE TABLE {}.{} ({cols})",
                quote_ident(schema),
                quote_ident(table)
            );
            match self.conn("ensure_table")?.execute(&sql, []) {
                Ok(_) => DdlOutcome::Created,
                Err(e) if failure_mentions(&e, "already exists") => DdlOutcome::AlreadyExists,
                Err(e) => return Err(e.into()),
            }
        };
        info!(schema = %schema, table = %table, outcome = %outcome, "ensure table");
        Ok(outcome)
    }

    /// Add the columns of `columns` that `schema.table` lacks. Returns the added names.
    pub fn ensure_columns(
        &self,
        schema: &str,
        table: &str,
        columns: &[(String, String)],
    ) -> StoreResult<Vec<String>> {
        if !self.table_exists(schema, table)? {
            return Err(missing_table(schema, table));
        }
        let existing = self.inspect_table(schema, table)?;
        let conn = self.conn("ensure_columns")?;

        let mut added = Vec::new();
        for (column, ty) in columns {
            if existing.iter().any(|(name, _)| name == column) {
                continue;
            }
            let sql = format!(
                "ALTER TABLE {}.{} ADD COLUMN {} {ty}",
                quote_ident(schema),
                quote_ident(table),
                quote_ident(column)
            );
            match conn.execute(&sql, []) {
                Ok(_) => added.push(column.clone()),
                Err(e) if failure_mentions(&e, "duplicate column") => {}
                Err(e) => return Err(e.into()),
            }
        }
        if !added.is_empty() {
            info!(schema = %schema, table = %table, columns = ?added, "columns added");
        }
        Ok(added)
    }

    /// Insert every row of `data` in one transaction.
    ///
    /// Rows go in as multi-row `INSERT ... VALUES (..), (..)` statements, each holding as many
    /// rows as SQLite's bound-parameter limit allows. Columns are matched by name. Either all
    /// rows are committed or none.
    pub fn bulk_load(&mut self, schema: &str, table: &str, data: &DataSet) -> StoreResult<usize> {
        if !self.table_exists(schema, table)? {
            return Err(missing_table(schema, table));
        }
        if data.column_count() == 0 || data.row_count() == 0 {
            return Ok(0);
        }

        let target = format!(
            "INSERT INTO {}.{} ({})",
            quote_ident(schema),
            quote_ident(table),
            data.schema
                .fields
                .iter()
                .map(|f| quote_ident(&f.name))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let width = data.column_count();
        let per_statement = rows_per_insert(width);

        let conn = self
            .conn
            .as_mut()
            .ok_or(StoreError::NotConnected { operation: "bulk_load" })?;
        let tx = conn.transaction()?;
        let mut statements = 0;
        for chunk in data.rows.chunks(per_statement) {
            let sql = format!("{target} VALUES {}", value_rows(width, chunk.len()));
            // Every full chunk has the same text, so the cache prepares it once.
            let mut stmt = tx.prepare_cached(&sql)?;
            stmt.execute(params_from_iter(chunk.iter().flatten().map(to_sql)))?;
            statements += 1;
        }
        tx.commit()?;

        info!(
            schema = %schema,
            table = %table,
            rows = data.row_count(),
            columns = width,
            statements,
            "bulk load committed"
        );
        Ok(data.row_count())
    }

    /// Create the audit table of `A` in `schema` (all columns text).
    pub fn ensure_audit_table<A: AuditEntry>(&self, schema: &str) -> StoreResult<DdlOutcome> {
        let columns: Vec<(String, String)> = A::COLUMNS
            .iter()
            .map(|c| (c.to_string(), "text".to_string()))
            .collect();
        self.ensure_table(schema, A::TABLE, &columns)
    }

    /// Append one audit row. Existing rows are never touched.
    pub fn record_audit<A: AuditEntry>(&self, schema: &str, entry: &A) -> StoreResult<()> {
        self.ensure_attached(schema)?;
        let columns = A::COLUMNS
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {}.{} ({columns}) VALUES ({})",
            quote_ident(schema),
            quote_ident(A::TABLE),
            placeholders(A::COLUMNS.len())
        );
        self.conn("record_audit")?
            .execute(&sql, params_from_iter(entry.values()))?;
        debug!(schema = %schema, table = A::TABLE, "audit row appended");
        Ok(())
    }

    /// Run a query and collect the result as a [`DataSet`].
    ///
    /// Column types come from the declared relational types through the type map; expression
    /// columns are typed from their values.
    pub fn query(&self, sql: &str) -> StoreResult<DataSet> {
        let conn = self.conn("query")?;
        let mut stmt = conn.prepare(sql)?;
        let declared: Vec<(String, Option<_>)> = stmt
            .columns()
            .iter()
            .map(|c| (c.name().to_string(), c.decl_type().and_then(native_type)))
            .collect();

        let mut rows: Vec<Vec<Value>> = Vec::new();
        let mut cursor = stmt.query([])?;
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(declared.len());
            for (i, (_, dtype)) in declared.iter().enumerate() {
                values.push(from_sql(row.get_ref(i)?, *dtype));
            }
            rows.push(values);
        }

        let mut fields = Vec::with_capacity(declared.len());
        for (i, (name, dtype)) in declared.into_iter().enumerate() {
            let consistent = dtype.is_some_and(|dt| {
                rows.iter()
                    .all(|r| r[i].data_type().is_none_or(|vt| vt == dt))
            });
            match dtype {
                Some(dt) if consistent => fields.push(Field::new(name, dt)),
                _ => {
                    let column: Vec<Value> = rows.iter().map(|r| r[i].clone()).collect();
                    let (dt, settled) = unify(column, false);
                    for (row, v) in rows.iter_mut().zip(settled) {
                        row[i] = v;
                    }
                    fields.push(Field::new(name, dt));
                }
            }
        }
        Ok(DataSet::new(Schema::new(fields), rows))
    }

    /// `(column, declared relational type)` pairs; empty when the table does not exist.
    pub fn inspect_table(&self, schema: &str, table: &str) -> StoreResult<Vec<(String, String)>> {
        self.ensure_attached(schema)?;
        let conn = self.conn("inspect_table")?;
        let mut stmt = conn.prepare(&format!(
            "PRAGMA {}.table_info({})",
            quote_ident(schema),
            quote_ident(table)
        ))?;
        let columns = stmt
            .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    pub fn schema_exists(&self, schema: &str) -> StoreResult<bool> {
        self.conn("schema_exists")?;
        validate_name("schema", schema)?;
        Ok(self.is_attached(schema)? || self.store.schema_path(schema).exists())
    }

    pub fn table_exists(&self, schema: &str, table: &str) -> StoreResult<bool> {
        if !self.schema_exists(schema)? {
            return Ok(false);
        }
        self.ensure_attached(schema)?;
        let conn = self.conn("table_exists")?;
        let mut stmt = conn.prepare(&format!(
            "SELECT 1 FROM {}.sqlite_master WHERE type = 'table' AND name = ?1",
            quote_ident(schema)
        ))?;
        Ok(stmt.exists([table])?)
    }

    pub fn table_shape(&self, schema: &str, table: &str) -> StoreResult<TableShape> {
        if !self.table_exists(schema, table)? {
            return Err(missing_table(schema, table));
        }
        let rows: i64 = self.conn("table_shape")?.query_row(
            &format!(
                "SELECT count(*) FROM {}.{}",
                quote_ident(schema),
                quote_ident(table)
            ),
            [],
            |r| r.get(0),
        )?;
        Ok(TableShape {
            rows: usize::try_from(rows).unwrap_or(0),
            columns: self.inspect_table(schema, table)?.len(),
        })
    }

    /// Table names in `schema`, sorted. A schema that does not exist has no tables.
    pub fn list_tables(&self, schema: &str) -> StoreResult<Vec<String>> {
        if !self.schema_exists(schema)? {
            return Ok(Vec::new());
        }
        self.ensure_attached(schema)?;
        let conn = self.conn("list_tables")?;
        let mut stmt = conn.prepare(&format!(
            "SELECT name FROM {}.sqlite_master WHERE type = 'table' ORDER BY name",
            quote_ident(schema)
        ))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }
}

fn enable_wal(conn: &Connection, schema: &str) -> StoreResult<()> {
    let _mode: String = conn.query_row(
        &format!("PRAGMA {}.journal_mode=WAL", quote_ident(schema)),
        [],
        |r| r.get(0),
    )?;
    Ok(())
}

/// Host parameters one statement may bind (`SQLITE_MAX_VARIABLE_NUMBER` of the bundled SQLite).
const MAX_BOUND_PARAMS: usize = 32_766;

/// Rows of `width` columns that fit in one insert statement; at least one.
pub(crate) fn rows_per_insert(width: usize) -> usize {
    (MAX_BOUND_PARAMS / width.max(1)).max(1)
}

/// `(?, ?), (?, ?)` for `rows` rows of `width` columns.
fn value_rows(width: usize, rows: usize) -> String {
    let row = format!("({})", vec!["?"; width].join(", "));
    vec![row; rows].join(", ")
}

fn placeholders(n: usize) -> String {
    (1..=n)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn failure_mentions(e: &rusqlite::Error, needle: &str) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains(needle))
}

fn missing_table(schema: &str, table: &str) -> StoreError {
    StoreError::MissingTable {
        schema: schema.to_string(),
        table: table.to_string(),
    }
}
