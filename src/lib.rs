//! # sheetcache
//!
//! Mirrors tables from a spreadsheet-like data service (NocoDB or Airtable)
//! into a local SQLite cache and serves them over HTTP.
//!
//! ## Core Components
//!
//! - **Remote Fetcher** (`remote`): pages through the upstream list API
//! - **Schema Inference** (`inference`): unions field names across records
//! - **Table Materializer** (`materialize`): creates one TEXT column per field
//! - **Refresh Engine** (`refresh`): transactional delete-and-reload per table
//! - **Query Surface** (`query`): generic select / select-where over any table
//! - **HTTP API** (`api`): read endpoints, kit checkout, refresh trigger
//! - **Cron Pinger** (`pinger`): schedule-file driven webhook caller

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod ident;
pub mod inference;
pub mod materialize;
pub mod pinger;
pub mod query;
pub mod refresh;
pub mod remote;
pub mod shutdown;

pub use error::{CacheError, CacheResult};
