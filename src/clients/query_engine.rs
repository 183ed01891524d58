//! Query engine client - Presto-compatible REST protocol
//!
//! Statements are submitted with `POST /v1/statement` (plain-text SQL body)
//! and the `nextUri` chain is followed until the engine stops returning one.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::PrestoConfig;
use crate::error::{IngestError, Result};

pub type QueryRows = Vec<Vec<serde_json::Value>>;

#[async_trait]
pub trait QueryEngineClient: Send + Sync {
    /// Prepare the client. Callers guarantee this runs once.
    async fn init(&self) -> Result<()>;

    /// Run one statement to completion and return its rows.
    async fn run_query(&self, sql: &str) -> Result<QueryRows>;
}

#[derive(Debug, Deserialize)]
struct StatementResponse {
    id: Option<String>,
    #[serde(rename = "nextUri")]
    next_uri: Option<String>,
    data: Option<QueryRows>,
    stats: Option<StatementStats>,
    error: Option<StatementError>,
}

#[derive(Debug, Deserialize)]
struct StatementStats {
    state: String,
}

#[derive(Debug, Deserialize)]
struct StatementError {
    message: String,
    #[serde(rename = "errorCode")]
    error_code: Option<u32>,
}

pub struct PrestoClient {
    coordinator_url: String,
    catalog: String,
    schema: String,
    user: String,
    header_prefix: String,
    client: Client,
}

impl PrestoClient {
    pub fn new(config: &PrestoConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| IngestError::QueryEngine(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            coordinator_url: config.coordinator_url.trim_end_matches('/').to_string(),
            catalog: config.catalog.clone(),
            schema: config.schema.clone(),
            user: config.user.clone(),
            header_prefix: config.header_prefix.clone(),
            client,
        })
    }

    /// Build from `PRESTO_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(&PrestoConfig::from_env()?)
    }

    fn header(&self, name: &str) -> String {
        format!("{}-{}", self.header_prefix, name)
    }

    fn absolute(&self, uri: &str) -> String {
        if uri.starts_with("http") {
            uri.to_string()
        } else {
            format!("{}{}", self.coordinator_url, uri)
        }
    }

    async fn submit(&self, sql: &str) -> Result<StatementResponse> {
        let url = format!("{}/v1/statement", self.coordinator_url);
        let response = self
            .client
            .post(&url)
            .header(self.header("User"), &self.user)
            .header(self.header("Catalog"), &self.catalog)
            .header(self.header("Schema"), &self.schema)
            .header("Content-Type", "text/plain")
            .body(sql.to_string())
            .send()
            .await
            .map_err(|e| IngestError::QueryEngine(format!("failed to submit statement: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(IngestError::QueryEngine(format!(
                "statement rejected with status {}: {}",
                status, text
            )));
        }

        let body: StatementResponse = response
            .json()
            .await
            .map_err(|e| IngestError::QueryEngine(format!("failed to parse response: {}", e)))?;
        check_error(&body)?;
        Ok(body)
    }

    async fn advance(&self, next_uri: &str) -> Result<StatementResponse> {
        let url = self.absolute(next_uri);
        let mut retries = 3;
        loop {
            let response = match self
                .client
                .get(&url)
                .header(self.header("User"), &self.user)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) if e.is_timeout() && retries > 0 => {
                    retries -= 1;
                    warn!("statement poll timed out, retrying ({} left)", retries);
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    continue;
                }
                Err(e) => {
                    return Err(IngestError::QueryEngine(format!(
                        "failed to fetch results: {}",
                        e
                    )))
                }
            };

            let status = response.status();
            if status.is_server_error() && retries > 0 {
                retries -= 1;
                warn!("query engine returned {}, retrying ({} left)", status, retries);
                tokio::time::sleep(Duration::from_millis(1000)).await;
                continue;
            }
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(IngestError::QueryEngine(format!(
                    "result fetch failed with status {}: {}",
                    status, text
                )));
            }

            let body: StatementResponse = response
                .json()
                .await
                .map_err(|e| IngestError::QueryEngine(format!("failed to parse results: {}", e)))?;
            check_error(&body)?;
            return Ok(body);
        }
    }
}

fn check_error(body: &StatementResponse) -> Result<()> {
    match &body.error {
        Some(err) => Err(IngestError::QueryEngine(format!(
            "{} (code: {:?})",
            err.message, err.error_code
        ))),
        None => Ok(()),
    }
}

#[async_trait]
impl QueryEngineClient for PrestoClient {
    async fn init(&self) -> Result<()> {
        let url = format!("{}/v1/info", self.coordinator_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| IngestError::QueryEngine(format!("coordinator unreachable: {}", e)))?;
        if !response.status().is_success() {
            return Err(IngestError::QueryEngine(format!(
                "coordinator health check failed with status {}",
                response.status()
            )));
        }
        info!(coordinator = %self.coordinator_url, catalog = %self.catalog, "query engine ready");
        Ok(())
    }

    async fn run_query(&self, sql: &str) -> Result<QueryRows> {
        debug!(sql, "submitting statement");
        let mut response = self.submit(sql).await?;
        let query_id = response.id.clone().unwrap_or_default();
        let mut rows = Vec::new();

        loop {
            if let Some(data) = response.data.take() {
                rows.extend(data);
            }
            match response.next_uri.take() {
                Some(next) => response = self.advance(&next).await?,
                None => break,
            }
        }

        let state = response
            .stats
            .as_ref()
            .map(|s| s.state.as_str())
            .unwrap_or("FINISHED");
        debug!(query_id = %query_id, state, rows = rows.len(), "statement complete");
        Ok(rows)
    }
}

/// Query engine that records statements without running them.
///
/// Used for dry-run planning. `fail_on` makes any statement containing
/// the given text fail, which lets callers observe partial DDL runs.
#[derive(Default)]
pub struct RecordingQueryEngine {
    statements: Mutex<Vec<String>>,
    init_calls: AtomicUsize,
    fail_on: Option<String>,
}

impl RecordingQueryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(pattern: impl Into<String>) -> Self {
        Self {
            fail_on: Some(pattern.into()),
            ..Self::default()
        }
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryEngineClient for RecordingQueryEngine {
    async fn init(&self) -> Result<()> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn run_query(&self, sql: &str) -> Result<QueryRows> {
        if let Some(pattern) = &self.fail_on {
            if sql.contains(pattern.as_str()) {
                return Err(IngestError::QueryEngine(format!("rejected: {}", sql)));
            }
        }
        self.statements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(sql.to_string());
        Ok(Vec::new())
    }
}
