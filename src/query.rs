//! # Query Surface
//!
//! Generic reads over any cache table. Rows come back as ordered
//! `{column -> value}` mappings in SQLite's natural row order; there is no
//! ORDER BY, so callers must not rely on a particular order.

use crate::db::{CacheStore, RowData, SqlValue};
use crate::error::CacheResult;
use crate::ident;
use serde_json::{Map, Value};
use tracing::debug;

/// One result row, keys in column order
pub type Row = Map<String, Value>;

fn into_row(row: RowData) -> Row {
    row.into_iter().collect()
}

/// `SELECT *` over `table`
pub async fn select_all(store: &CacheStore, table: &str) -> CacheResult<Vec<Row>> {
    let sql = format!("SELECT * FROM {}", ident::quote_table(table)?);
    debug!("Querying {}", table);

    let rows = store.query(sql, vec![]).await?;
    Ok(rows.into_iter().map(into_row).collect())
}

/// `SELECT *` over `table` where `column` equals `value` (text equality)
pub async fn select_filtered(
    store: &CacheStore,
    table: &str,
    column: &str,
    value: &str,
) -> CacheResult<Vec<Row>> {
    let sql = format!(
        "SELECT * FROM {} WHERE {} = ?1",
        ident::quote_table(table)?,
        ident::quote_column(column)?
    );
    debug!("Querying {} where {} = {:?}", table, column, value);

    let rows = store
        .query(sql, vec![SqlValue::Text(value.to_string())])
        .await?;
    Ok(rows.into_iter().map(into_row).collect())
}
