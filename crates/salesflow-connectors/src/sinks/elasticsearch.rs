//! Elasticsearch document index.
//!
//! Submits documents through the Bulk API as NDJSON. Every document carries an
//! explicit `_id`, so re-indexing the same transaction overwrites the earlier
//! document instead of adding a second one.
//!
//! ## Configuration
//!
//! | Key                  | Description                        | Default                 |
//! |----------------------|------------------------------------|-------------------------|
//! | `connection.url`     | Elasticsearch base URL             | `http://localhost:9200` |
//! | `index.name`         | Target index name                  | `transactions`          |
//! | `request.timeout.ms` | Per-request timeout                | `30000`                 |

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::parse_opt;
use crate::error::{ConnectorError, Result};

pub const DEFAULT_URL: &str = "http://localhost:9200";
pub const DEFAULT_INDEX: &str = "transactions";

/// One document ready for indexing. `body` is a serialized JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDocument {
    pub id: String,
    pub body: String,
}

/// Result of one bulk request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    pub indexed: usize,
    pub failed: usize,
}

/// Trait implemented by every search-index backend.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Index (create or overwrite) every document in `docs` under `index`.
    ///
    /// Request-level failures are returned as errors; rejections of single
    /// documents are reported in [`BulkOutcome::failed`].
    async fn bulk_index(&self, index: &str, docs: &[IndexDocument]) -> Result<BulkOutcome>;
}

/// Parsed configuration for the Elasticsearch index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElasticsearchConfig {
    pub connection_url: String,
    pub index_name: String,
    pub request_timeout: Duration,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            connection_url: DEFAULT_URL.to_string(),
            index_name: DEFAULT_INDEX.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ElasticsearchConfig {
    /// Parse an ElasticsearchConfig from a string key-value map.
    pub fn from_config_map(config: &HashMap<String, String>) -> Result<Self> {
        let connection_url = config
            .get("connection.url")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_URL.to_string());
        if !connection_url.starts_with("http://") && !connection_url.starts_with("https://") {
            return Err(ConnectorError::ConfigError(format!(
                "connection.url must be an http(s) URL, got '{}'",
                connection_url
            )));
        }

        let index_name = config
            .get("index.name")
            .cloned()
            .unwrap_or_else(|| DEFAULT_INDEX.to_string());
        if index_name.is_empty() {
            return Err(ConnectorError::ConfigError(
                "index.name must not be empty".to_string(),
            ));
        }

        let request_timeout = parse_opt::<u64>(config, "request.timeout.ms")?
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(30));

        Ok(Self {
            connection_url,
            index_name,
            request_timeout,
        })
    }
}

/// Build the NDJSON body for a Bulk API request.
///
/// ```text
/// {"index":{"_index":"transactions","_id":"a1"}}
/// {"transaction_id":"a1",...}
/// ```
pub fn build_bulk_body(index: &str, docs: &[IndexDocument]) -> Result<String> {
    let mut body = String::new();
    for doc in docs {
        let action = serde_json::json!({"index": {"_index": index, "_id": doc.id}});
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&doc.body);
        body.push('\n');
    }
    Ok(body)
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    #[serde(rename = "_id", default)]
    id: Option<String>,
    #[serde(default)]
    status: u16,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Count per-item failures in a Bulk API response, logging each one.
fn summarize_bulk_response(response: &BulkResponse, submitted: usize) -> BulkOutcome {
    if !response.errors {
        return BulkOutcome {
            indexed: submitted,
            failed: 0,
        };
    }

    let mut failed = 0;
    for item in response.items.iter().flat_map(|m| m.values()) {
        if item.error.is_some() || item.status >= 300 {
            failed += 1;
            tracing::warn!(
                document_id = item.id.as_deref().unwrap_or("<none>"),
                status = item.status,
                error = %item.error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
                "document rejected by Elasticsearch"
            );
        }
    }
    BulkOutcome {
        indexed: submitted.saturating_sub(failed),
        failed,
    }
}

/// [`DocumentIndex`] speaking the Elasticsearch Bulk API over HTTP.
#[derive(Debug, Clone)]
pub struct HttpDocumentIndex {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDocumentIndex {
    pub fn new(config: &ElasticsearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(config, client))
    }

    /// Create with an injected reqwest client.
    pub fn with_client(config: &ElasticsearchConfig, client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: config.connection_url.clone(),
        }
    }
}

#[async_trait]
impl DocumentIndex for HttpDocumentIndex {
    async fn bulk_index(&self, index: &str, docs: &[IndexDocument]) -> Result<BulkOutcome> {
        if docs.is_empty() {
            return Ok(BulkOutcome::default());
        }

        let body = build_bulk_body(index, docs)?;
        let url = format!("{}/_bulk", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let msg = format!("Elasticsearch bulk API returned {}: {}", status, body_text);
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(ConnectorError::ConnectionError(msg))
            } else {
                Err(ConnectorError::SinkError(msg))
            };
        }

        let parsed: BulkResponse = response.json().await?;
        Ok(summarize_bulk_response(&parsed, docs.len()))
    }
}

/// In-process [`DocumentIndex`]; documents are kept per index by id.
///
/// Cloning shares the documents. [`MemoryDocumentIndex::set_unavailable`]
/// makes every request fail with a retryable error.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentIndex {
    inner: Arc<Mutex<MemoryIndexInner>>,
}

#[derive(Debug, Default)]
struct MemoryIndexInner {
    indices: HashMap<String, HashMap<String, serde_json::Value>>,
    unavailable: bool,
    requests: u64,
}

impl MemoryDocumentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    pub fn document(&self, index: &str, id: &str) -> Option<serde_json::Value> {
        self.lock().indices.get(index)?.get(id).cloned()
    }

    /// Sorted ids of every document in `index`.
    pub fn ids(&self, index: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .lock()
            .indices
            .get(index)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn requests(&self) -> u64 {
        self.lock().requests
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryIndexInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl DocumentIndex for MemoryDocumentIndex {
    async fn bulk_index(&self, index: &str, docs: &[IndexDocument]) -> Result<BulkOutcome> {
        let mut inner = self.lock();
        inner.requests += 1;
        if inner.unavailable {
            return Err(ConnectorError::ConnectionError(
                "search index unavailable".to_string(),
            ));
        }

        let mut outcome = BulkOutcome::default();
        let target = inner.indices.entry(index.to_string()).or_default();
        for doc in docs {
            match serde_json::from_str::<serde_json::Value>(&doc.body) {
                Ok(value) if value.is_object() => {
                    target.insert(doc.id.clone(), value);
                    outcome.indexed += 1;
                }
                _ => outcome.failed += 1,
            }
        }
        Ok(outcome)
    }
}
