//! # Table Materializer
//!
//! Turns an inferred field set into a local cache table:
//! 1. **Plan**: drop unusable field names, dedupe case-insensitively (SQLite
//!    column names are case-insensitive)
//! 2. **Create**: `CREATE TABLE IF NOT EXISTS` with a synthetic `id` identity
//!    column plus one nullable TEXT column per field
//! 3. **Cache**: remember each table's columns in a DashMap, refreshed from
//!    `PRAGMA table_info` on a miss
//! 4. **Evolve** (additive policy only): `ALTER TABLE ... ADD COLUMN` for new
//!    fields inside one transaction. Columns are never dropped or altered.

use crate::db::CacheStore;
use crate::error::{CacheError, CacheResult};
use crate::ident;
use crate::inference::FieldSet;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name of the synthetic identity column
pub const IDENTITY_COLUMN: &str = "id";

/// SQLite's compiled default is 2000; stay well below it
const MAX_COLUMNS_PER_TABLE: usize = 1000;

/// Creates cache tables and tracks their columns
pub struct TableMaterializer {
    /// table name -> user columns in table order (identity column excluded)
    columns: DashMap<String, Vec<String>>,
    store: Arc<CacheStore>,
}

impl TableMaterializer {
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self {
            columns: DashMap::new(),
            store,
        }
    }

    /// Validated, case-insensitively distinct column names for `fields`
    pub fn plan_columns(table: &str, fields: &FieldSet) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut planned = Vec::with_capacity(fields.len());

        for field in fields {
            if let Err(e) = ident::validate_column_name(field) {
                warn!("Skipping field on table {}: {}", table, e);
                continue;
            }
            if !seen.insert(field.to_lowercase()) {
                warn!(
                    "Skipping field '{}' on table {}: differs from another field only by case",
                    field, table
                );
                continue;
            }
            planned.push(field.clone());
        }

        planned
    }

    /// Creates `table` if absent with one TEXT column per field. Idempotent;
    /// an existing table is left untouched. Returns the table's user columns.
    pub async fn ensure_table(&self, table: &str, fields: &FieldSet) -> CacheResult<Vec<String>> {
        let quoted_table = ident::quote_table(table)?;
        let planned = Self::plan_columns(table, fields);
        Self::check_column_limit(table, planned.len())?;

        let mut create_sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({} INTEGER PRIMARY KEY AUTOINCREMENT",
            quoted_table,
            ident::quote(IDENTITY_COLUMN)
        );
        for column in &planned {
            create_sql.push_str(&format!(", {} TEXT", ident::quote_column(column)?));
        }
        create_sql.push(')');

        debug!("Ensuring table: {}", create_sql);
        self.store.execute_batch(create_sql).await?;
        self.columns.remove(table);

        let columns = self.table_columns(table).await?;
        debug!("Table '{}' has {} columns", table, columns.len());
        Ok(columns)
    }

    /// Adds a TEXT column for every field the table does not have yet.
    /// Returns the names of the columns that were added.
    pub async fn add_missing_columns(
        &self,
        table: &str,
        fields: &FieldSet,
    ) -> CacheResult<Vec<String>> {
        let quoted_table = ident::quote_table(table)?;
        let existing = self.table_columns(table).await?;
        let existing_lower: HashSet<String> = existing.iter().map(|c| c.to_lowercase()).collect();

        let new_columns: Vec<String> = Self::plan_columns(table, fields)
            .into_iter()
            .filter(|c| !existing_lower.contains(&c.to_lowercase()))
            .collect();

        if new_columns.is_empty() {
            return Ok(new_columns);
        }
        Self::check_column_limit(table, existing.len() + new_columns.len())?;

        let mut migrations = Vec::with_capacity(new_columns.len());
        for column in &new_columns {
            migrations.push(format!(
                "ALTER TABLE {} ADD COLUMN {} TEXT DEFAULT NULL",
                quoted_table,
                ident::quote_column(column)?
            ));
        }

        self.store
            .with_transaction(move |conn| {
                for sql in migrations {
                    debug!("Executing migration: {}", sql);
                    conn.execute(&sql, [])?;
                }
                Ok(())
            })
            .await?;

        self.columns.remove(table);
        for column in &new_columns {
            info!("Added column {}.{}", table, column);
        }

        Ok(new_columns)
    }

    /// User columns of `table` in table order, from cache or PRAGMA
    pub async fn table_columns(&self, table: &str) -> CacheResult<Vec<String>> {
        if let Some(cached) = self.columns.get(table) {
            return Ok(cached.clone());
        }

        let sql = format!("PRAGMA table_info({})", ident::quote_table(table)?);
        let rows = self.store.query(sql, vec![]).await?;

        let columns: Vec<String> = rows
            .iter()
            .filter(|row| {
                row.iter()
                    .find(|(k, _)| k == "pk")
                    .and_then(|(_, v)| v.as_i64())
                    .unwrap_or(0)
                    == 0
            })
            .filter_map(|row| {
                row.iter()
                    .find(|(k, _)| k == "name")
                    .and_then(|(_, v)| v.as_str())
                    .map(str::to_string)
            })
            .collect();

        if !rows.is_empty() {
            self.columns.insert(table.to_string(), columns.clone());
        }

        Ok(columns)
    }

    /// Drops `table` if present so the next `ensure_table` starts from scratch
    pub async fn drop_table(&self, table: &str) -> CacheResult<()> {
        let sql = format!("DROP TABLE IF EXISTS {}", ident::quote_table(table)?);
        self.store.execute_batch(sql).await?;
        self.columns.remove(table);
        Ok(())
    }

    /// Forget cached column lists
    pub fn clear_cache(&self) {
        self.columns.clear();
    }

    fn check_column_limit(table: &str, count: usize) -> CacheResult<()> {
        if count > MAX_COLUMNS_PER_TABLE {
            return Err(CacheError::Storage(format!(
                "Table '{}' would have {} columns, limit is {}",
                table, count, MAX_COLUMNS_PER_TABLE
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(names: &[&str]) -> FieldSet {
        names.iter().map(|s| s.to_string()).collect()
    }

    async fn pragma_columns(store: &CacheStore, table: &str) -> Vec<(String, String, i64)> {
        store
            .query(format!("PRAGMA table_info(\"{}\")", table), vec![])
            .await
            .unwrap()
            .into_iter()
            .map(|row| {
                let get = |key: &str| row.iter().find(|(k, _)| k == key).unwrap().1.clone();
                (
                    get("name").as_str().unwrap().to_string(),
                    get("type").as_str().unwrap().to_string(),
                    get("pk").as_i64().unwrap(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_ensure_table_is_idempotent() {
        let store = Arc::new(CacheStore::in_memory().await.unwrap());
        let materializer = TableMaterializer::new(store.clone());
        let fieldset = fields(&["Student Number", "Name", "Active Member"]);

        materializer.ensure_table("Users", &fieldset).await.unwrap();
        materializer.clear_cache();
        let columns = materializer.ensure_table("Users", &fieldset).await.unwrap();
        assert_eq!(columns, vec!["Active Member", "Name", "Student Number"]);

        let described = pragma_columns(&store, "Users").await;
        assert_eq!(described.len(), 4);
        assert_eq!(described.iter().filter(|(_, _, pk)| *pk == 1).count(), 1);
        assert_eq!(described[0], ("id".to_string(), "INTEGER".to_string(), 1));
        assert!(described[1..].iter().all(|(_, ty, pk)| ty == "TEXT" && *pk == 0));
    }

    #[tokio::test]
    async fn test_existing_table_is_not_altered_by_ensure() {
        let store = Arc::new(CacheStore::in_memory().await.unwrap());
        let materializer = TableMaterializer::new(store.clone());

        materializer.ensure_table("Films", &fields(&["Title"])).await.unwrap();
        let columns = materializer
            .ensure_table("Films", &fields(&["Title", "Year"]))
            .await
            .unwrap();
        assert_eq!(columns, vec!["Title"]);
    }

    #[tokio::test]
    async fn test_add_missing_columns() {
        let store = Arc::new(CacheStore::in_memory().await.unwrap());
        let materializer = TableMaterializer::new(store.clone());

        materializer.ensure_table("Films", &fields(&["Title"])).await.unwrap();
        let added = materializer
            .add_missing_columns("Films", &fields(&["title", "Year"]))
            .await
            .unwrap();
        assert_eq!(added, vec!["Year"]);

        let columns = materializer.table_columns("Films").await.unwrap();
        assert_eq!(columns, vec!["Title", "Year"]);

        let again = materializer
            .add_missing_columns("Films", &fields(&["Year"]))
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_hostile_field_names_are_quoted() {
        let store = Arc::new(CacheStore::in_memory().await.unwrap());
        let materializer = TableMaterializer::new(store.clone());

        let hostile = fields(&["a\" TEXT); DROP TABLE Films; --", "Start Date"]);
        let columns = materializer.ensure_table("Assets", &hostile).await.unwrap();
        assert_eq!(columns.len(), 2);
        assert!(columns.contains(&"a\" TEXT); DROP TABLE Films; --".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_table_name_rejected() {
        let store = Arc::new(CacheStore::in_memory().await.unwrap());
        let materializer = TableMaterializer::new(store);

        let err = materializer
            .ensure_table("Films; DROP", &fields(&["Title"]))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidIdentifier(_)));
    }

    #[tokio::test]
    async fn test_drop_table_forgets_columns() {
        let store = Arc::new(CacheStore::in_memory().await.unwrap());
        let materializer = TableMaterializer::new(store.clone());

        materializer.ensure_table("Films", &fields(&["Title"])).await.unwrap();
        materializer.drop_table("Films").await.unwrap();
        assert!(!store.table_exists("Films").await.unwrap());
        materializer.drop_table("Films").await.unwrap();

        let columns = materializer
            .ensure_table("Films", &fields(&["Title", "Year"]))
            .await
            .unwrap();
        assert_eq!(columns, vec!["Title", "Year"]);
    }

    #[test]
    fn test_plan_columns_dedupes_case_and_drops_invalid() {
        let planned = TableMaterializer::plan_columns("T", &fields(&["Name", "name", "bad\tname"]));
        assert_eq!(planned, vec!["Name"]);
    }
}
