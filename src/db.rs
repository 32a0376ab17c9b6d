//! # Database Module (Cache Store)
//!
//! Owns the single SQLite connection backing the cache. The handle is created
//! by the composition root, passed explicitly to every component, and closed
//! on shutdown. All statements run on the connection's dedicated thread via
//! `tokio-rusqlite`, so callers never block the async runtime.

use crate::error::{CacheError, CacheResult};
use rusqlite::config::DbConfig;
use rusqlite::types::ValueRef;
use rusqlite::TransactionBehavior;
use serde_json::Value;
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

/// One result row as ordered `(column, value)` pairs
pub type RowData = Vec<(String, Value)>;

/// Handle to the local cache database
pub struct CacheStore {
    conn: Connection,
    path: String,
}

impl CacheStore {
    /// Opens (or creates) the cache database at `path` with WAL mode enabled
    pub async fn open<P: AsRef<Path>>(path: P) -> CacheResult<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        info!("Opening cache database at: {}", path_str);

        let conn = Connection::open(&path_str)
            .await
            .map_err(|e| CacheError::Storage(format!("Failed to open database: {}", e)))?;

        Self::initialize_pragmas(&conn).await?;

        Ok(Self {
            conn,
            path: path_str,
        })
    }

    /// Creates an in-memory cache (contents are lost on exit)
    pub async fn in_memory() -> CacheResult<Self> {
        info!("Opening in-memory cache database");

        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| CacheError::Storage(format!("Failed to create database: {}", e)))?;

        Self::initialize_pragmas(&conn).await?;

        Ok(Self {
            conn,
            path: ":memory:".to_string(),
        })
    }

    async fn initialize_pragmas(conn: &Connection) -> CacheResult<()> {
        debug!("Setting up database pragmas...");

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;
                 PRAGMA synchronous=NORMAL;
                 PRAGMA busy_timeout=5000;",
            )?;
            // A quoted name that matches no column must be an error, not a string literal
            conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DQS_DML, false)?;
            Ok(())
        })
        .await
        .map_err(|e| CacheError::Storage(format!("Failed to set pragmas: {}", e)))?;

        Ok(())
    }

    /// Execute a write statement with bound parameters
    pub async fn execute(&self, sql: String, params: Vec<SqlValue>) -> CacheResult<u64> {
        self.conn
            .call(move |conn| {
                let affected = conn.execute(&sql, rusqlite::params_from_iter(params.iter()))?;
                Ok(affected as u64)
            })
            .await
            .map_err(|e| CacheError::Storage(format!("Execute failed: {}", e)))
    }

    /// Execute batch SQL
    pub async fn execute_batch(&self, sql: String) -> CacheResult<()> {
        self.conn
            .call(move |conn| {
                conn.execute_batch(&sql)?;
                Ok(())
            })
            .await
            .map_err(|e| CacheError::Storage(format!("Batch execution failed: {}", e)))
    }

    /// Run a query and return every row as ordered `(column, value)` pairs.
    /// Row order is whatever SQLite yields.
    pub async fn query(&self, sql: String, params: Vec<SqlValue>) -> CacheResult<Vec<RowData>> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let column_names: Vec<String> = stmt
                    .column_names()
                    .iter()
                    .map(|s| s.to_string())
                    .collect();

                let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
                let mut result = Vec::new();

                while let Some(row) = rows.next()? {
                    let mut row_data = Vec::with_capacity(column_names.len());
                    for (i, name) in column_names.iter().enumerate() {
                        row_data.push((name.clone(), Self::value_at(row, i)?));
                    }
                    result.push(row_data);
                }

                Ok(result)
            })
            .await
            .map_err(|e| CacheError::Storage(format!("Query failed: {}", e)))
    }

    fn value_at(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Value> {
        Ok(match row.get_ref(idx)? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::from(i),
            ValueRef::Real(f) => Value::from(f),
            ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::String(format!("<blob:{} bytes>", b.len())),
        })
    }

    /// Check if database is in-memory
    pub fn is_in_memory(&self) -> bool {
        self.path == ":memory:"
    }

    /// Get all user table names in the database
    pub async fn list_tables(&self) -> CacheResult<Vec<String>> {
        let rows = self
            .query(
                "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'"
                    .to_string(),
                vec![],
            )
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| row.first().and_then(|(_, v)| v.as_str().map(str::to_string)))
            .collect())
    }

    /// Whether a table with exactly this name exists
    pub async fn table_exists(&self, table: &str) -> CacheResult<bool> {
        let rows = self
            .query(
                "SELECT 1 FROM sqlite_master WHERE type='table' AND name = ?1".to_string(),
                vec![SqlValue::Text(table.to_string())],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    /// Run `f` inside an immediate transaction. Commits when `f` returns Ok;
    /// any error drops the transaction, which rolls everything back.
    pub async fn with_transaction<F, T>(&self, f: F) -> CacheResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let result = f(&tx)?;
                tx.commit()?;
                Ok(result)
            })
            .await
            .map_err(|e| CacheError::Storage(format!("Transaction failed: {}", e)))
    }

    /// Close the connection, flushing outstanding work
    pub async fn close(self) -> CacheResult<()> {
        info!("Closing cache database: {}", self.path);
        self.conn
            .close()
            .await
            .map_err(|e| CacheError::Storage(format!("Failed to close database: {}", e)))
    }
}

/// SQL Value wrapper for parameters. Cache columns are text, so the
/// only bound values are text, integers (identity) and NULL.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Text(String),
}

impl rusqlite::ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, ValueRef};
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            SqlValue::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl From<Option<String>> for SqlValue {
    fn from(value: Option<String>) -> Self {
        value.map(SqlValue::Text).unwrap_or(SqlValue::Null)
    }
}
