/*!
The SQL back-end.

Every table uses the standard layout `(the_key BLOB PRIMARY KEY,
the_data BLOB)`, with the reserved `META_DATA_TABLES` table listing
the tables this store manages. The database file is created on first
connect; optional pre- and post-creation SQL scripts run around the
standard schema, and manual transactions only start after schema
creation has completed.

Auxiliary-table mode projects caller-designated fields into typed SQL
columns for external read-only inspection. Rows in an auxiliary table
are created by triggers installed by the post-creation script, never
by a put, so `aux_put` only updates. All statements go through the
prepared-statement cache; `rusqlite` resets a cached statement and
clears its bindings as the handle drops, which is what keeps stale
parameter bindings from leaking into the next use.
*/

use drift_store::config::Config;
use drift_store::storage::*;
use parking_lot::Mutex;
use rusqlite::OptionalExtension;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

const META_TABLE: &str = "META_DATA_TABLES";

pub fn new(config: &Config) -> Result<Box<dyn StoreImpl>> {
    open(config).map(|s| Box::new(s) as Box<dyn StoreImpl>)
}

/// Opens the store, returning the concrete type so callers can reach
/// the auxiliary-table interface.
pub fn open(config: &Config) -> Result<Storage> {
    Storage::init(config)
}

fn log_sql_err(context: &str, e: rusqlite::Error) -> StoreError {
    // Driver errors are logged verbatim, code and message both
    error!("{context}: {e}");
    StoreError::Err
}

/// Types an auxiliary column can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailKind {
    Char,
    Short,
    UShort,
    Long,
    ULong,
    LongLong,
    ULongLong,
    Float,
    Double,
    DateTime,
    Varchar,
    Blob,
}

impl DetailKind {
    fn sql_type(&self) -> &'static str {
        match self {
            DetailKind::Char => "CHAR",
            DetailKind::Short => "SMALLINT",
            DetailKind::UShort => "SMALLINT UNSIGNED",
            DetailKind::Long => "INTEGER",
            DetailKind::ULong => "INTEGER UNSIGNED",
            DetailKind::LongLong => "BIGINT",
            DetailKind::ULongLong => "BIGINT UNSIGNED",
            DetailKind::Float => "FLOAT",
            DetailKind::Double => "DOUBLE",
            DetailKind::DateTime => "DATE",
            DetailKind::Varchar => "VARCHAR(2000)",
            DetailKind::Blob => "BLOB",
        }
    }
}

/// One projected value.
#[derive(Debug, Clone, PartialEq)]
pub enum DetailValue {
    Char(u8),
    Short(i16),
    UShort(u16),
    Long(i32),
    ULong(u32),
    LongLong(i64),
    ULongLong(u64),
    Float(f32),
    Double(f64),
    /// Seconds since the Unix epoch.
    DateTime(i64),
    Varchar(String),
    Blob(Vec<u8>),
}

impl DetailValue {
    fn to_sql(&self) -> rusqlite::types::Value {
        use rusqlite::types::Value;
        match self {
            DetailValue::Char(v) => Value::Integer(*v as i64),
            DetailValue::Short(v) => Value::Integer(*v as i64),
            DetailValue::UShort(v) => Value::Integer(*v as i64),
            DetailValue::Long(v) => Value::Integer(*v as i64),
            DetailValue::ULong(v) => Value::Integer(*v as i64),
            DetailValue::LongLong(v) => Value::Integer(*v),
            DetailValue::ULongLong(v) => Value::Integer(*v as i64),
            DetailValue::Float(v) => Value::Real(*v as f64),
            DetailValue::Double(v) => Value::Real(*v),
            DetailValue::DateTime(v) => Value::Integer(*v),
            DetailValue::Varchar(v) => Value::Text(v.clone()),
            DetailValue::Blob(v) => Value::Blob(v.clone()),
        }
    }
}

/// A named, typed auxiliary column value.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailItem {
    pub column: String,
    pub value: DetailValue,
}

struct Inner {
    connection: Mutex<rusqlite::Connection>,
    iter_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    aux_tables: bool,
}

#[derive(Clone)]
pub struct Storage(Arc<Inner>);

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl Storage {
    fn init(config: &Config) -> Result<Storage> {
        let dir = &config.db_dir;
        if !dir.exists() {
            if !config.init {
                error!("Datastore directory {} does not exist", dir.display());
                return Err(StoreError::NotFound);
            }
            std::fs::create_dir_all(dir).map_err(|e| {
                error!("Failed to create datastore directory {}: {e}", dir.display());
                StoreError::Err
            })?;
        }
        let file_path = dir.join(format!("{}.db", config.db_name));

        let connection = rusqlite::Connection::open(&file_path)
            .map_err(|e| log_sql_err("Failed to open database", e))?;
        info!("Using database {}", file_path.display());

        // journal_mode reports the resulting mode as a row
        connection
            .query_row("PRAGMA journal_mode = WAL;", [], |_| Ok(()))
            .map_err(|e| log_sql_err("Failed to configure database", e))?;
        connection
            .execute_batch("PRAGMA synchronous = NORMAL;")
            .map_err(|e| log_sql_err("Failed to configure database", e))?;

        // Schema creation happens entirely in auto-commit mode; some
        // embedded engines forbid DDL inside an open transaction that
        // spans external scripts
        if let Some(script) = &config.sqlite.schema_pre_creation {
            run_script(&connection, script)?;
        }

        connection
            .execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {META_TABLE} (the_table TEXT PRIMARY KEY);"
            ))
            .map_err(|e| log_sql_err("Failed to create metatable", e))?;

        if let Some(script) = &config.sqlite.schema_post_creation {
            run_script(&connection, script)?;
        }

        Ok(Storage(Arc::new(Inner {
            connection: Mutex::new(connection),
            iter_locks: Mutex::new(HashMap::new()),
            aux_tables: config.sqlite.use_aux_tables,
        })))
    }

    fn iter_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.0
            .iter_locks
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn table_known(&self, connection: &rusqlite::Connection, name: &str) -> Result<bool> {
        connection
            .prepare_cached(&format!(
                "SELECT 1 FROM {META_TABLE} WHERE the_table = ?1 LIMIT 1;"
            ))
            .map_err(|e| log_sql_err("Metatable lookup", e))?
            .query_row([name], |_| Ok(()))
            .optional()
            .map(|r| r.is_some())
            .map_err(|e| log_sql_err("Metatable lookup", e))
    }

    /// Creates an auxiliary table whose columns mirror `columns`, plus
    /// the key column. Available only when aux tables are configured.
    pub fn create_aux_table(&self, name: &str, columns: &[(String, DetailKind)]) -> Result<()> {
        if !self.0.aux_tables {
            return Err(StoreError::Err);
        }
        let connection = self.0.connection.lock();
        if self.table_known(&connection, name)? {
            return Err(StoreError::Exists);
        }

        let mut ddl = format!(
            "CREATE TABLE {} (the_key VARBINARY(255) PRIMARY KEY",
            quote_ident(name)
        );
        for (column, kind) in columns {
            ddl.push_str(&format!(", {} {}", quote_ident(column), kind.sql_type()));
        }
        ddl.push_str(");");

        // Table creation and the metatable entry commit together
        connection
            .execute_batch(&format!(
                "BEGIN IMMEDIATE; {ddl} INSERT INTO {META_TABLE} (the_table) VALUES ({}); COMMIT;",
                sql_quote_str(name)
            ))
            .map_err(|e| log_sql_err("Auxiliary table creation", e))
    }

    /// Projects `details` into the columns of an auxiliary table row.
    /// The row must already exist: creation is delegated to the
    /// triggers installed by the post-creation script.
    pub fn aux_put(&self, table: &str, key: &[u8], details: &[DetailItem]) -> Result<()> {
        if details.is_empty() {
            return Ok(());
        }
        let connection = self.0.connection.lock();

        let assignments: Vec<String> = details
            .iter()
            .enumerate()
            .map(|(i, d)| format!("{} = ?{}", quote_ident(&d.column), i + 1))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE the_key = ?{};",
            quote_ident(table),
            assignments.join(", "),
            details.len() + 1
        );

        let mut stmt = connection
            .prepare_cached(&sql)
            .map_err(|e| log_sql_err("Auxiliary put prepare", e))?;
        let mut params: Vec<rusqlite::types::Value> =
            details.iter().map(|d| d.value.to_sql()).collect();
        params.push(rusqlite::types::Value::Blob(key.to_vec()));

        let rows = stmt
            .execute(rusqlite::params_from_iter(params))
            .map_err(|e| log_sql_err("Auxiliary put", e))?;
        if rows == 0 {
            // No trigger created the row; auxiliary tables are never
            // written into empty
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Reads the designated columns of an auxiliary table row back as
    /// typed values.
    pub fn aux_get(
        &self,
        table: &str,
        key: &[u8],
        columns: &[(String, DetailKind)],
    ) -> Result<Vec<DetailItem>> {
        let connection = self.0.connection.lock();

        let column_list: Vec<String> = columns
            .iter()
            .map(|(name, _)| quote_ident(name))
            .collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE the_key = ?1;",
            column_list.join(", "),
            quote_ident(table)
        );

        let mut stmt = connection
            .prepare_cached(&sql)
            .map_err(|e| log_sql_err("Auxiliary get prepare", e))?;
        stmt.query_row([key], |row| {
            let mut items = Vec::with_capacity(columns.len());
            for (i, (name, kind)) in columns.iter().enumerate() {
                let value = match kind {
                    DetailKind::Char => DetailValue::Char(row.get::<_, i64>(i)? as u8),
                    DetailKind::Short => DetailValue::Short(row.get::<_, i64>(i)? as i16),
                    DetailKind::UShort => DetailValue::UShort(row.get::<_, i64>(i)? as u16),
                    DetailKind::Long => DetailValue::Long(row.get::<_, i64>(i)? as i32),
                    DetailKind::ULong => DetailValue::ULong(row.get::<_, i64>(i)? as u32),
                    DetailKind::LongLong => DetailValue::LongLong(row.get(i)?),
                    DetailKind::ULongLong => DetailValue::ULongLong(row.get::<_, i64>(i)? as u64),
                    DetailKind::Float => DetailValue::Float(row.get::<_, f64>(i)? as f32),
                    DetailKind::Double => DetailValue::Double(row.get(i)?),
                    DetailKind::DateTime => DetailValue::DateTime(row.get(i)?),
                    DetailKind::Varchar => DetailValue::Varchar(row.get(i)?),
                    DetailKind::Blob => DetailValue::Blob(row.get(i)?),
                };
                items.push(DetailItem {
                    column: name.clone(),
                    value,
                });
            }
            Ok(items)
        })
        .optional()
        .map_err(|e| log_sql_err("Auxiliary get", e))?
        .ok_or(StoreError::NotFound)
    }
}

fn sql_quote_str(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn run_script(connection: &rusqlite::Connection, path: &std::path::Path) -> Result<()> {
    let script = std::fs::read_to_string(path).map_err(|e| {
        error!("Failed to read schema script {}: {e}", path.display());
        StoreError::Err
    })?;
    connection
        .execute_batch(&script)
        .map_err(|e| log_sql_err("Schema script", e))
}

impl StoreImpl for Storage {
    fn get_table(&self, name: &str, flags: &TableFlags) -> Result<Box<dyn TableImpl>> {
        if name == META_TABLE {
            error!("Table name '{name}' is reserved");
            return Err(StoreError::Err);
        }

        {
            let connection = self.0.connection.lock();
            let known = self.table_known(&connection, name)?;
            if known {
                if flags.create && flags.exclusive {
                    return Err(StoreError::Exists);
                }
            } else {
                if !flags.create {
                    return Err(StoreError::NotFound);
                }
                // Standard layout; the metatable entry commits with it
                connection
                    .execute_batch(&format!(
                        "BEGIN IMMEDIATE; \
                         CREATE TABLE {} (the_key BLOB PRIMARY KEY, the_data BLOB); \
                         INSERT INTO {META_TABLE} (the_table) VALUES ({}); \
                         COMMIT;",
                        quote_ident(name),
                        sql_quote_str(name)
                    ))
                    .map_err(|e| log_sql_err("Table creation", e))?;
            }
        }

        Ok(Box::new(SqlTable {
            inner: self.0.clone(),
            name: name.to_string(),
            iter_lock: self.iter_lock(name),
        }))
    }

    fn del_table(&self, name: &str) -> Result<()> {
        let connection = self.0.connection.lock();
        if !self.table_known(&connection, name)? {
            return Err(StoreError::NotFound);
        }
        connection
            .execute_batch(&format!(
                "BEGIN IMMEDIATE; \
                 DROP TABLE IF EXISTS {}; \
                 DELETE FROM {META_TABLE} WHERE the_table = {}; \
                 COMMIT;",
                quote_ident(name),
                sql_quote_str(name)
            ))
            .map_err(|e| log_sql_err("Table deletion", e))
    }

    fn get_table_names(&self) -> Result<Vec<String>> {
        let connection = self.0.connection.lock();
        let mut stmt = connection
            .prepare_cached(&format!(
                "SELECT the_table FROM {META_TABLE} ORDER BY the_table;"
            ))
            .map_err(|e| log_sql_err("Metatable scan", e))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| log_sql_err("Metatable scan", e))?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(|e| log_sql_err("Metatable scan", e))?;
        Ok(names)
    }

    fn begin_transaction(&self) -> Result<()> {
        self.0
            .connection
            .lock()
            .execute_batch("BEGIN IMMEDIATE;")
            .map_err(|e| log_sql_err("Transaction open", e))
    }

    fn end_transaction(&self, durable: bool) -> Result<()> {
        let connection = self.0.connection.lock();
        connection
            .execute_batch("COMMIT;")
            .map_err(|e| log_sql_err("Transaction commit", e))?;
        if durable {
            // The checkpoint pragma reports its progress as a row
            connection
                .query_row("PRAGMA wal_checkpoint(FULL);", [], |_| Ok(()))
                .map_err(|e| log_sql_err("Durable checkpoint", e))?;
        }
        Ok(())
    }

    fn aux_tables_available(&self) -> bool {
        self.0.aux_tables
    }
}

struct SqlTable {
    inner: Arc<Inner>,
    name: String,
    iter_lock: Arc<Mutex<()>>,
}

impl TableImpl for SqlTable {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let connection = self.inner.connection.lock();
        connection
            .prepare_cached(&format!(
                "SELECT the_data FROM {} WHERE the_key = ?1;",
                quote_ident(&self.name)
            ))
            .map_err(|e| log_sql_err("Get prepare", e))?
            .query_row([key], |row| row.get::<_, Vec<u8>>(0))
            .optional()
            .map_err(|e| log_sql_err("Get", e))?
            .ok_or(StoreError::NotFound)
    }

    fn put(&self, key: &[u8], value: &[u8], flags: &PutFlags) -> Result<()> {
        let connection = self.inner.connection.lock();
        if flags.create && flags.exclusive {
            let result = connection
                .prepare_cached(&format!(
                    "INSERT INTO {} (the_key, the_data) VALUES (?1, ?2);",
                    quote_ident(&self.name)
                ))
                .map_err(|e| log_sql_err("Put prepare", e))?
                .execute(rusqlite::params![key, value]);
            match result {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ffi::ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::Exists)
                }
                Err(e) => Err(log_sql_err("Put", e)),
            }
        } else if flags.create {
            connection
                .prepare_cached(&format!(
                    "INSERT INTO {} (the_key, the_data) VALUES (?1, ?2) \
                     ON CONFLICT(the_key) DO UPDATE SET the_data = excluded.the_data;",
                    quote_ident(&self.name)
                ))
                .map_err(|e| log_sql_err("Put prepare", e))?
                .execute(rusqlite::params![key, value])
                .map(|_| ())
                .map_err(|e| log_sql_err("Put", e))
        } else {
            let rows = connection
                .prepare_cached(&format!(
                    "UPDATE {} SET the_data = ?2 WHERE the_key = ?1;",
                    quote_ident(&self.name)
                ))
                .map_err(|e| log_sql_err("Put prepare", e))?
                .execute(rusqlite::params![key, value])
                .map_err(|e| log_sql_err("Put", e))?;
            if rows == 0 {
                Err(StoreError::NotFound)
            } else {
                Ok(())
            }
        }
    }

    fn del(&self, key: &[u8]) -> Result<()> {
        let rows = self
            .inner
            .connection
            .lock()
            .prepare_cached(&format!(
                "DELETE FROM {} WHERE the_key = ?1;",
                quote_ident(&self.name)
            ))
            .map_err(|e| log_sql_err("Delete prepare", e))?
            .execute([key])
            .map_err(|e| log_sql_err("Delete", e))?;
        if rows == 0 {
            Err(StoreError::NotFound)
        } else {
            Ok(())
        }
    }

    fn size(&self) -> Result<usize> {
        self.inner
            .connection
            .lock()
            .prepare_cached(&format!("SELECT COUNT(*) FROM {};", quote_ident(&self.name)))
            .map_err(|e| log_sql_err("Count prepare", e))?
            .query_row([], |row| row.get::<_, i64>(0))
            .map(|n| n as usize)
            .map_err(|e| log_sql_err("Count", e))
    }

    fn iter(&self) -> Result<Box<dyn TableIterImpl>> {
        // Hold the table's iteration lock for the cursor's lifetime;
        // keyset pagination keeps each step a bounded query
        Ok(Box::new(SqlTableIter {
            _guard: self.iter_lock.lock_arc(),
            inner: self.inner.clone(),
            name: self.name.clone(),
            cursor: None,
        }))
    }
}

struct SqlTableIter {
    _guard: parking_lot::lock_api::ArcMutexGuard<parking_lot::RawMutex, ()>,
    inner: Arc<Inner>,
    name: String,
    cursor: Option<Vec<u8>>,
}

impl TableIterImpl for SqlTableIter {
    fn next_key(&mut self) -> Result<Option<Vec<u8>>> {
        let connection = self.inner.connection.lock();
        let next = match &self.cursor {
            None => connection
                .prepare_cached(&format!(
                    "SELECT the_key FROM {} ORDER BY the_key LIMIT 1;",
                    quote_ident(&self.name)
                ))
                .map_err(|e| log_sql_err("Cursor prepare", e))?
                .query_row([], |row| row.get::<_, Vec<u8>>(0))
                .optional()
                .map_err(|e| log_sql_err("Cursor", e))?,
            Some(last) => connection
                .prepare_cached(&format!(
                    "SELECT the_key FROM {} WHERE the_key > ?1 ORDER BY the_key LIMIT 1;",
                    quote_ident(&self.name)
                ))
                .map_err(|e| log_sql_err("Cursor prepare", e))?
                .query_row([last], |row| row.get::<_, Vec<u8>>(0))
                .optional()
                .map_err(|e| log_sql_err("Cursor", e))?,
        };
        self.cursor = next.clone();
        Ok(next)
    }
}
