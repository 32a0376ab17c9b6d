//! # Refresh Engine
//!
//! Full-refresh replacement of every bound cache table:
//! fetch -> infer fields -> ensure table -> delete + bulk insert.
//!
//! The delete and the inserts share one transaction: a failed refresh leaves
//! the previous snapshot in place. Bindings are fetched concurrently and fail
//! independently; writes serialize on the single connection. There is no
//! cross-table atomicity.

use crate::config::{SchemaPolicy, SyncConfig, TableBinding};
use crate::db::{CacheStore, SqlValue};
use crate::error::{CacheError, CacheResult};
use crate::ident;
use crate::inference::{infer_fields, stringify, Record};
use crate::materialize::TableMaterializer;
use crate::remote::RemoteSource;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Result of refreshing one binding
#[derive(Debug)]
pub enum RefreshOutcome {
    /// Table replaced with `rows` fresh rows
    Refreshed { rows: usize },
    /// Binding not attempted
    Skipped { reason: String },
    /// Refresh failed; the table keeps its previous contents
    Failed { error: CacheError },
}

/// Per-table refresh report
#[derive(Debug)]
pub struct RefreshReport {
    pub table: String,
    pub outcome: RefreshOutcome,
}

/// Drives refresh cycles for all configured bindings
pub struct RefreshEngine {
    store: Arc<CacheStore>,
    materializer: Arc<TableMaterializer>,
    source: Arc<dyn RemoteSource>,
    bindings: Vec<TableBinding>,
    credential: Option<String>,
    schema_policy: SchemaPolicy,
}

impl RefreshEngine {
    pub fn new(
        store: Arc<CacheStore>,
        materializer: Arc<TableMaterializer>,
        source: Arc<dyn RemoteSource>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            store,
            materializer,
            source,
            bindings: config.bindings.clone(),
            credential: config.credential.clone(),
            schema_policy: config.schema_policy,
        }
    }

    pub fn bindings(&self) -> &[TableBinding] {
        &self.bindings
    }

    /// Startup load: rebuilds every bound table from scratch, so a cache file
    /// left by an earlier run never pins old columns, then refreshes every
    /// binding. Fails only on a storage error, since the cache cannot serve
    /// without working tables.
    pub async fn initialize(&self) -> CacheResult<Vec<RefreshReport>> {
        for binding in &self.bindings {
            self.materializer.drop_table(&binding.logical_name).await?;
        }
        let reports = self.refresh_all().await;

        for report in &reports {
            if let RefreshOutcome::Failed { error } = &report.outcome {
                if error.is_storage() {
                    return Err(CacheError::Storage(format!(
                        "Initial load of table {} failed: {}",
                        report.table, error
                    )));
                }
            }
        }

        Ok(reports)
    }

    /// Refreshes every binding. Partial success is normal: failures are
    /// logged and reported, never propagated.
    pub async fn refresh_all(&self) -> Vec<RefreshReport> {
        let started = Instant::now();
        let reports = join_all(self.bindings.iter().map(|binding| async move {
            let outcome = match self.refresh_one(binding).await {
                Ok(rows) => RefreshOutcome::Refreshed { rows },
                Err(CacheError::MissingCredential(table)) => {
                    warn!("No credential configured, skipping table {}", table);
                    RefreshOutcome::Skipped {
                        reason: "no credential configured".to_string(),
                    }
                }
                Err(error) => {
                    error!("Refresh of table {} failed: {}", binding.logical_name, error);
                    RefreshOutcome::Failed { error }
                }
            };
            RefreshReport {
                table: binding.logical_name.clone(),
                outcome,
            }
        }))
        .await;

        let refreshed = reports
            .iter()
            .filter(|r| matches!(r.outcome, RefreshOutcome::Refreshed { .. }))
            .count();
        info!(
            "Refresh cycle finished: {}/{} tables refreshed in {:?}",
            refreshed,
            reports.len(),
            started.elapsed()
        );

        reports
    }

    /// Refreshes one binding and returns the number of rows now cached
    pub async fn refresh_one(&self, binding: &TableBinding) -> CacheResult<usize> {
        let table = binding.logical_name.as_str();
        let credential = self
            .credential
            .as_deref()
            .ok_or_else(|| CacheError::MissingCredential(table.to_string()))?;

        info!("Refreshing table {}", table);
        let records = self.source.fetch(&binding.remote_id, credential).await?;
        let fields = infer_fields(&records);

        let mut columns = self.materializer.ensure_table(table, &fields).await?;
        if self.schema_policy == SchemaPolicy::Additive {
            let added = self.materializer.add_missing_columns(table, &fields).await?;
            if !added.is_empty() {
                columns = self.materializer.table_columns(table).await?;
            }
        }

        let known: HashSet<&str> = columns.iter().map(String::as_str).collect();
        let dropped: Vec<&String> = fields.iter().filter(|f| !known.contains(f.as_str())).collect();
        if !dropped.is_empty() {
            warn!(
                "Table {} has no column for fields {:?}; their values are not cached",
                table, dropped
            );
        }

        let rows = self.replace_rows(table, &columns, &records).await?;
        info!("Data refresh complete for table {} ({} rows)", table, rows);
        Ok(rows)
    }

    /// Replaces the table's contents with `records` in a single transaction
    async fn replace_rows(
        &self,
        table: &str,
        columns: &[String],
        records: &[Record],
    ) -> CacheResult<usize> {
        let quoted_table = ident::quote_table(table)?;
        let delete_sql = format!("DELETE FROM {}", quoted_table);
        let insert_sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", quoted_table)
        } else {
            let quoted: Vec<String> = columns
                .iter()
                .map(|c| ident::quote_column(c))
                .collect::<CacheResult<_>>()?;
            let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quoted_table,
                quoted.join(", "),
                placeholders.join(", ")
            )
        };

        let rows: Vec<Vec<SqlValue>> = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|column| SqlValue::from(record.get(column).and_then(stringify)))
                    .collect()
            })
            .collect();

        self.store
            .with_transaction(move |conn| {
                conn.execute(&delete_sql, [])?;
                let mut stmt = conn.prepare(&insert_sql)?;
                for row in &rows {
                    stmt.execute(rusqlite::params_from_iter(row.iter()))?;
                }
                Ok(rows.len())
            })
            .await
    }
}
