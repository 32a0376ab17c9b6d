//! # Configuration
//!
//! Table bindings, provider selection and the remote credential. Every value
//! comes from the environment (or CLI flags in the binaries); bindings are
//! fixed for the lifetime of the process.

use crate::error::{CacheError, CacheResult};
use crate::ident;
use clap::ValueEnum;

/// Local table names served by the API
pub const COMMITTEE_TABLE: &str = "Committee";
pub const ANNOUNCEMENTS_TABLE: &str = "Announcements";
pub const YEARS_TABLE: &str = "Years";
pub const FILMS_TABLE: &str = "Films";
pub const ASSETS_TABLE: &str = "Assets";
pub const USERS_TABLE: &str = "Users";

/// Logical table name and the environment variable holding its remote id
const DECLARED_BINDINGS: &[(&str, &str)] = &[
    (COMMITTEE_TABLE, "NOCODB_TABLE_COMMITTEE"),
    (ANNOUNCEMENTS_TABLE, "NOCODB_TABLE_ANNOUNCEMENTS"),
    (YEARS_TABLE, "NOCODB_TABLE_YEARS"),
    (FILMS_TABLE, "NOCODB_TABLE_FILMS"),
    (ASSETS_TABLE, "NOCODB_TABLE_ASSETS"),
    (USERS_TABLE, "NOCODB_TABLE_USERS"),
];

pub const DEFAULT_NOCODB_URL: &str = "https://app.nocodb.com";
pub const DEFAULT_AIRTABLE_URL: &str = "https://api.airtable.com";

/// Upstream data service
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    Nocodb,
    Airtable,
}

impl Provider {
    /// Environment variable holding the shared credential
    pub fn credential_var(&self) -> &'static str {
        match self {
            Provider::Nocodb => "NOCODB_API_TOKEN",
            Provider::Airtable => "AIRTABLE_PAT",
        }
    }
}

/// What happens when a refresh sees fields the cache table lacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SchemaPolicy {
    /// Columns are fixed when the table is created; new fields are not stored
    #[default]
    Fixed,
    /// Missing columns are added before each refresh; columns are never dropped
    Additive,
}

/// Pairing of a remote table with its local cache table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableBinding {
    pub logical_name: String,
    pub remote_id: String,
}

impl TableBinding {
    pub fn new(logical_name: impl Into<String>, remote_id: impl Into<String>) -> Self {
        Self {
            logical_name: logical_name.into(),
            remote_id: remote_id.into(),
        }
    }
}

/// Everything the refresh engine needs to reach the upstream service
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub provider: Provider,
    pub remote_url: String,
    pub credential: Option<String>,
    pub bindings: Vec<TableBinding>,
    pub schema_policy: SchemaPolicy,
}

impl SyncConfig {
    /// Builds the configuration from the process environment
    pub fn from_env(
        provider: Provider,
        remote_url: Option<String>,
        schema_policy: SchemaPolicy,
    ) -> CacheResult<Self> {
        Self::from_lookup(provider, remote_url, schema_policy, |key| {
            std::env::var(key).ok()
        })
    }

    /// Builds the configuration from an arbitrary variable lookup.
    /// A missing table id is an error; a missing credential is not.
    pub fn from_lookup<F>(
        provider: Provider,
        remote_url: Option<String>,
        schema_policy: SchemaPolicy,
        lookup: F,
    ) -> CacheResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut bindings = Vec::with_capacity(DECLARED_BINDINGS.len());
        for (table, var) in DECLARED_BINDINGS {
            ident::validate_table_name(table)?;
            let remote_id = lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    CacheError::Config(format!(
                        "Environment variable {} not set (table {})",
                        var, table
                    ))
                })?;
            bindings.push(TableBinding::new(*table, remote_id));
        }

        let credential = lookup(provider.credential_var())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let remote_url = remote_url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| match provider {
                Provider::Nocodb => DEFAULT_NOCODB_URL.to_string(),
                Provider::Airtable => DEFAULT_AIRTABLE_URL.to_string(),
            })
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            provider,
            remote_url,
            credential,
            bindings,
            schema_policy,
        })
    }
}
