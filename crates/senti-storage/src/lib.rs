//! Record store + object storage clients for the senti worker.
//!
//! Rows are read from and written to a hosted relational store through the
//! [`RecordStore`] trait; word cloud images go to object storage through
//! [`ArtifactUploader`]. Both are thin contracts so the pipeline can run
//! against Supabase REST, plain Postgres, or the in-memory store in tests.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{StatusCode, Url};
use senti_core::{AnalysisResult, RecordId, SourceRecord};
use thiserror::Error;
use tokio::sync::Mutex;

mod bucket;
mod postgres;
mod postgrest;

pub use bucket::{resolve_signed_url, SupabaseStorage, SIGNED_URL_TTL_SECS};
pub use postgres::{PgRecordStore, MIGRATOR};
pub use postgrest::PostgrestRecordStore;

pub const CRATE_NAME: &str = "senti-storage";

pub const SOURCE_TABLE: &str = "uploaded_csv_data";
pub const RESULTS_TABLE: &str = "analyzed_results";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("store returned http status {status} for {url}: {body}")]
    HttpStatus {
        status: u16,
        url: String,
        body: String,
    },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("source row {0} not found")]
    MissingSource(RecordId),
}

impl StoreError {
    /// Whether the next poll has a fair chance of succeeding.
    pub fn disposition(&self) -> RetryDisposition {
        match self {
            StoreError::Request(err) => classify_reqwest_error(err),
            StoreError::HttpStatus { status, .. } => StatusCode::from_u16(*status)
                .map(classify_status)
                .unwrap_or(RetryDisposition::NonRetryable),
            StoreError::Database(sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)) => {
                RetryDisposition::Retryable
            }
            StoreError::Database(_) | StoreError::MissingSource(_) => {
                RetryDisposition::NonRetryable
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("storage returned http status {status} for {url}: {body}")]
    HttpStatus {
        status: u16,
        url: String,
        body: String,
    },
    #[error("signing response for {0} carried no signed url")]
    MissingSignedUrl(String),
}

/// Access to source rows and analysis results.
#[async_trait]
pub trait RecordStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Up to `limit` rows still flagged `processed = false`, in store order.
    async fn fetch_unprocessed(&self, limit: usize) -> Result<Vec<SourceRecord>, StoreError>;

    /// Flip the processed flag. Repeated calls leave the row unchanged.
    async fn mark_processed(&self, id: &RecordId) -> Result<(), StoreError>;

    /// Append one result row. Not idempotent: a second call duplicates it.
    async fn insert_result(&self, payload: &AnalysisResult) -> Result<(), StoreError>;

    /// Store the result and consume its source row.
    ///
    /// The default runs the two writes back to back without a transaction. A
    /// crash in between leaves the row unprocessed, so it is analyzed again on
    /// a later pass and a second result row appears.
    async fn commit_result(&self, payload: &AnalysisResult) -> Result<(), StoreError> {
        self.insert_result(payload).await?;
        self.mark_processed(&payload.source_id).await
    }
}

/// Pushes an artifact to object storage and hands back a long-lived link.
#[async_trait]
pub trait ArtifactUploader: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, key: &str) -> Result<String, UploadError>;
}

#[derive(Debug, Clone)]
pub struct SupabaseClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

/// Authenticated HTTP access to a Supabase project (REST + Storage).
#[derive(Debug, Clone)]
pub struct SupabaseClient {
    client: reqwest::Client,
    base_url: Url,
}

impl SupabaseClient {
    pub fn new(config: SupabaseClientConfig) -> anyhow::Result<Self> {
        let base_url = Url::parse(config.base_url.trim())
            .with_context(|| format!("parsing supabase url {}", config.base_url))?;
        if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
            anyhow::bail!("supabase url must be an http(s) url, got {base_url}");
        }

        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .default_headers(auth_headers(&config.api_key)?);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client, base_url })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Base url extended with percent-encoded path segments.
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

/// Headers every Supabase call carries: the project key twice, once as a
/// bearer token.
pub(crate) fn auth_headers(api_key: &str) -> anyhow::Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let key = HeaderValue::from_str(api_key).context("encoding api key header")?;
    let bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
        .context("encoding authorization header")?;
    headers.insert("apikey", key);
    headers.insert(AUTHORIZATION, bearer);
    Ok(headers)
}

/// Reads the body of a non-success response for error reporting.
pub(crate) async fn error_body(resp: reqwest::Response) -> (u16, String, String) {
    let status = resp.status().as_u16();
    let url = resp.url().to_string();
    let body = resp.text().await.unwrap_or_default();
    (status, url, body)
}

#[derive(Debug, Default)]
struct MemoryState {
    records: Vec<SourceRecord>,
    results: Vec<AnalysisResult>,
}

/// Process-local store with the same semantics as the remote ones.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    state: Mutex<MemoryState>,
}

impl MemoryRecordStore {
    pub fn new(records: Vec<SourceRecord>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                records,
                results: Vec::new(),
            }),
        }
    }

    pub async fn records(&self) -> Vec<SourceRecord> {
        self.state.lock().await.records.clone()
    }

    pub async fn results(&self) -> Vec<AnalysisResult> {
        self.state.lock().await.results.clone()
    }

    pub async fn record(&self, id: &RecordId) -> Option<SourceRecord> {
        let state = self.state.lock().await;
        state.records.iter().find(|r| &r.id == id).cloned()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn fetch_unprocessed(&self, limit: usize) -> Result<Vec<SourceRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .iter()
            .filter(|r| !r.processed)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_processed(&self, id: &RecordId) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        for record in state.records.iter_mut().filter(|r| &r.id == id) {
            record.processed = true;
        }
        Ok(())
    }

    async fn insert_result(&self, payload: &AnalysisResult) -> Result<(), StoreError> {
        self.state.lock().await.results.push(payload.clone());
        Ok(())
    }
}
