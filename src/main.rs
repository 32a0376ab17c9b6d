//! # sheetcache
//!
//! Local cache and read API over NocoDB (or Airtable) tables.
//!
//! ## Quick Start
//!
//! ```bash
//! export NOCODB_API_TOKEN=...
//! export NOCODB_TABLE_COMMITTEE=m1... NOCODB_TABLE_ANNOUNCEMENTS=m2... \
//!        NOCODB_TABLE_YEARS=m3... NOCODB_TABLE_FILMS=m4... \
//!        NOCODB_TABLE_ASSETS=m5... NOCODB_TABLE_USERS=m6...
//!
//! # Run with default settings (sheetcache.db, port 8080)
//! sheetcache
//!
//! # In-memory cache, additive schema evolution
//! sheetcache --memory --schema-policy additive
//! ```
//!
//! ## API Usage
//!
//! ```bash
//! curl http://localhost:8080/api/v1/http/atvas/films/2020
//! curl http://localhost:8080/api/v1/internal/refreshData
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sheetcache::api::{create_router, ensure_checkout_table, AppState};
use sheetcache::config::{Provider, SchemaPolicy, SyncConfig};
use sheetcache::db::CacheStore;
use sheetcache::materialize::TableMaterializer;
use sheetcache::refresh::RefreshEngine;
use sheetcache::remote;
use sheetcache::shutdown::shutdown_signal;

/// Local cache and read API over NocoDB/Airtable tables
#[derive(Debug, Parser)]
#[command(name = "sheetcache", version)]
struct Args {
    /// Database file path
    #[arg(short, long, env = "SHEETCACHE_DB", default_value = "sheetcache.db")]
    db: String,

    /// Use an in-memory database
    #[arg(short, long, env = "SHEETCACHE_MEMORY")]
    memory: bool,

    /// Host to bind to
    #[arg(long, env = "SHEETCACHE_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Server port
    #[arg(short, long, env = "SHEETCACHE_PORT", default_value_t = 8080)]
    port: u16,

    /// Upstream data service
    #[arg(long, env = "SHEETCACHE_PROVIDER", value_enum, default_value = "nocodb")]
    provider: Provider,

    /// Upstream base URL (defaults to the provider's public API)
    #[arg(long, env = "NOCODB_URL")]
    remote_url: Option<String>,

    /// How to handle fields that appear after a table was created
    #[arg(long, env = "SHEETCACHE_SCHEMA_POLICY", value_enum, default_value = "fixed")]
    schema_policy: SchemaPolicy,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();

    let config = SyncConfig::from_env(args.provider, args.remote_url.clone(), args.schema_policy)
        .context("Invalid configuration")?;
    if config.credential.is_none() {
        warn!(
            "{} not set; refreshes will be skipped until it is configured",
            args.provider.credential_var()
        );
    }

    let store = if args.memory {
        Arc::new(CacheStore::in_memory().await?)
    } else {
        Arc::new(CacheStore::open(&args.db).await?)
    };

    let materializer = Arc::new(TableMaterializer::new(Arc::clone(&store)));
    let source = remote::source_for(&config)?;
    let engine = Arc::new(RefreshEngine::new(
        Arc::clone(&store),
        Arc::clone(&materializer),
        source,
        &config,
    ));

    ensure_checkout_table(&materializer)
        .await
        .context("Failed to create checkouts table")?;
    engine
        .initialize()
        .await
        .context("Initial cache load failed")?;

    let app = create_router(AppState::new(Arc::clone(&store), Arc::clone(&engine)));

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("Invalid address {}:{}", args.host, args.port))?;
    info!("sheetcache listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    drop(engine);
    drop(materializer);
    match Arc::try_unwrap(store) {
        Ok(store) => store.close().await?,
        Err(_) => warn!("Cache database still in use at shutdown; leaving it to drop"),
    }

    Ok(())
}
