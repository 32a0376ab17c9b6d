//! # Remote Fetcher
//!
//! Pages through an upstream list endpoint until exhausted and returns every
//! record in one flat sequence. No retries happen here: a failed page aborts
//! the whole fetch and the next refresh cycle is the retry.

use crate::config::{Provider, SyncConfig};
use crate::error::{CacheError, CacheResult};
use crate::inference::Record;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Records requested per page
const DEFAULT_PAGE_SIZE: usize = 100;

/// Transport timeout for a single page request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A paginated source of loosely-typed records
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch every record of the remote table identified by `remote_id`
    async fn fetch(&self, remote_id: &str, credential: &str) -> CacheResult<Vec<Record>>;
}

/// Builds the source matching the configured provider
pub fn source_for(config: &SyncConfig) -> CacheResult<Arc<dyn RemoteSource>> {
    let client = Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| CacheError::Config(format!("Failed to build HTTP client: {}", e)))?;

    Ok(match config.provider {
        Provider::Nocodb => Arc::new(NocoDbSource::new(client, &config.remote_url)),
        Provider::Airtable => Arc::new(AirtableSource::new(client, &config.remote_url)),
    })
}

fn endpoint(base_url: &str, segments: &[&str]) -> CacheResult<Url> {
    let mut url = Url::parse(base_url)
        .map_err(|e| CacheError::Config(format!("Invalid remote URL '{}': {}", base_url, e)))?;
    url.path_segments_mut()
        .map_err(|_| CacheError::Config(format!("Remote URL '{}' cannot be a base", base_url)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

async fn read_page<T: serde::de::DeserializeOwned>(
    request: reqwest::RequestBuilder,
) -> CacheResult<T> {
    let response = request.send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(CacheError::Network(format!(
            "{} returned status {}",
            response.url(),
            status
        )));
    }

    let body = response.bytes().await?;

    Ok(serde_json::from_slice(&body)?)
}

// ============================================================================
// NocoDB
// ============================================================================

#[derive(Debug, Deserialize)]
struct NocoDbPage {
    list: Vec<Record>,
    #[serde(rename = "pageInfo", default)]
    page_info: NocoDbPageInfo,
}

#[derive(Debug, Default, Deserialize)]
struct NocoDbPageInfo {
    #[serde(rename = "isLastPage", default)]
    is_last_page: Option<bool>,
}

/// NocoDB v2 records API (`xc-token` auth, limit/offset paging)
pub struct NocoDbSource {
    client: Client,
    base_url: String,
    page_size: usize,
}

impl NocoDbSource {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

#[async_trait]
impl RemoteSource for NocoDbSource {
    async fn fetch(&self, remote_id: &str, credential: &str) -> CacheResult<Vec<Record>> {
        let url = endpoint(&self.base_url, &["api", "v2", "tables", remote_id, "records"])?;
        let mut records = Vec::new();
        let mut offset = 0usize;

        loop {
            let request = self
                .client
                .get(url.clone())
                .header("xc-token", credential)
                .query(&[("limit", self.page_size), ("offset", offset)]);

            let page: NocoDbPage = read_page(request).await?;
            let count = page.list.len();
            debug!("Fetched {} records from {} at offset {}", count, remote_id, offset);

            records.extend(page.list);

            if count == 0 || page.page_info.is_last_page.unwrap_or(false) {
                break;
            }
            offset += count;
        }

        Ok(records)
    }
}

// ============================================================================
// Airtable
// ============================================================================

#[derive(Debug, Deserialize)]
struct AirtablePage {
    records: Vec<AirtableRecord>,
    #[serde(default)]
    offset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AirtableRecord {
    #[serde(default)]
    fields: Record,
}

/// Airtable REST API (bearer auth, opaque offset cursor).
/// The remote id has the form `<baseId>/<tableName>`.
pub struct AirtableSource {
    client: Client,
    base_url: String,
}

impl AirtableSource {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl RemoteSource for AirtableSource {
    async fn fetch(&self, remote_id: &str, credential: &str) -> CacheResult<Vec<Record>> {
        let (base_id, table) = remote_id.split_once('/').ok_or_else(|| {
            CacheError::Config(format!(
                "Airtable table id '{}' must look like <baseId>/<tableName>",
                remote_id
            ))
        })?;
        let url = endpoint(&self.base_url, &["v0", base_id, table])?;
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut request = self.client.get(url.clone()).bearer_auth(credential);
            if let Some(offset) = &cursor {
                request = request.query(&[("offset", offset)]);
            }

            let page: AirtablePage = read_page(request).await?;
            debug!("Fetched {} records from {}", page.records.len(), remote_id);
            records.extend(page.records.into_iter().map(|r| r.fields));

            match page.offset.filter(|o| !o.is_empty()) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(records)
    }
}
