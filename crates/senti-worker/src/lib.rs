//! Polling batch worker: fetch unprocessed rows, analyze, render + upload a
//! word cloud, persist the result and consume the source row.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use senti_analysis::{select_analyzer, AnalysisError, Analyzer, BackendKind, HostedModelConfig};
use senti_core::{wordcloud_key, Analysis, AnalysisResult, ModelInfo, RecordId, SourceRecord};
use senti_storage::{
    ArtifactUploader, PgRecordStore, PostgrestRecordStore, RecordStore, RetryDisposition,
    StoreError, SupabaseClient, SupabaseClientConfig, SupabaseStorage,
};
use senti_wordcloud::{generate_wordcloud, WordCloudError};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "senti-worker";

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_BUCKET: &str = "wordclouds";
pub const DEFAULT_CLAIM_LEASE_SECS: u64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub supabase_url: String,
    pub supabase_key: String,
    pub bucket: String,
    pub database_url: Option<String>,
    pub backend: BackendKind,
    pub hosted: HostedModelConfig,
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub http_timeout_secs: u64,
    pub claim_lease: Duration,
    pub user_agent: String,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| non_empty(&lookup, key);
        let required = |key: &'static str| var(key).ok_or(ConfigError::Missing(key));
        let number = |key: &'static str, default: u64| -> Result<u64, ConfigError> {
            match var(key) {
                None => Ok(default),
                Some(raw) => raw.parse().map_err(|err: std::num::ParseIntError| {
                    ConfigError::Invalid {
                        key,
                        value: raw,
                        reason: err.to_string(),
                    }
                }),
            }
        };
        let positive = |key: &'static str, default: u64| -> Result<u64, ConfigError> {
            match number(key, default)? {
                0 => Err(ConfigError::Invalid {
                    key,
                    value: "0".into(),
                    reason: "must be greater than zero".into(),
                }),
                n => Ok(n),
            }
        };

        let backend = match var("SENTI_BACKEND") {
            None => BackendKind::default(),
            Some(raw) => raw.parse().map_err(|reason| ConfigError::Invalid {
                key: "SENTI_BACKEND",
                value: raw,
                reason,
            })?,
        };

        let mut hosted = HostedModelConfig {
            api_token: var("HF_API_TOKEN"),
            ..HostedModelConfig::default()
        };
        if let Some(base) = var("HF_API_BASE") {
            hosted.api_base = base;
        }

        let batch_size = positive("SENTI_BATCH_SIZE", DEFAULT_BATCH_SIZE as u64)?;

        Ok(Self {
            supabase_url: required("SUPABASE_URL")?,
            supabase_key: required("SUPABASE_KEY")?,
            bucket: var("WORDCLOUD_BUCKET").unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
            database_url: var("DATABASE_URL"),
            backend,
            hosted,
            poll_interval: Duration::from_secs(positive(
                "SENTI_POLL_INTERVAL_SECS",
                DEFAULT_POLL_INTERVAL_SECS,
            )?),
            batch_size: batch_size as usize,
            http_timeout_secs: number("SENTI_HTTP_TIMEOUT_SECS", 20)?,
            claim_lease: Duration::from_secs(number(
                "SENTI_CLAIM_LEASE_SECS",
                DEFAULT_CLAIM_LEASE_SECS,
            )?),
            user_agent: var("SENTI_USER_AGENT").unwrap_or_else(|| "senti-worker/0.1".to_string()),
        })
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// The only setting schema migration needs. The Supabase credentials are
/// not required for it.
pub fn database_url_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    non_empty(&lookup, "DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))
}

pub fn database_url_from_env() -> Result<String, ConfigError> {
    database_url_from_lookup(|key| std::env::var(key).ok())
}

/// Renders the visual artifact for a row.
pub trait Visualizer: Send + Sync {
    fn render(&self, text: &str) -> Result<Vec<u8>, WordCloudError>;
}

#[derive(Debug, Default)]
pub struct WordCloudVisualizer;

impl Visualizer for WordCloudVisualizer {
    fn render(&self, text: &str) -> Result<Vec<u8>, WordCloudError> {
        generate_wordcloud(text)
    }
}

/// Writes analysis results and consumes their source rows.
pub struct Persister {
    store: Arc<dyn RecordStore>,
    method: &'static str,
}

impl Persister {
    pub fn new(store: Arc<dyn RecordStore>, method: &'static str) -> Self {
        Self { store, method }
    }

    pub async fn persist(
        &self,
        record: &SourceRecord,
        analysis: Analysis,
        wordcloud_url: Option<String>,
    ) -> Result<AnalysisResult, StoreError> {
        let payload = AnalysisResult::from_parts(
            record,
            analysis,
            wordcloud_url,
            ModelInfo {
                method: self.method.to_string(),
                timestamp: Utc::now(),
            },
        );
        self.store.commit_result(&payload).await?;
        Ok(payload)
    }
}

#[derive(Debug, Error)]
pub enum RowError {
    #[error("analysis failed: {0}")]
    Analysis(#[from] AnalysisError),
    #[error("word cloud rendering failed: {0}")]
    Visualize(#[from] WordCloudError),
    #[error("store write failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    SkippedEmpty,
    Analyzed(AnalysisResult),
}

#[derive(Debug, Clone, Serialize)]
pub struct RowFailure {
    pub id: RecordId,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PassReport {
    pub fetched: usize,
    pub analyzed: usize,
    pub skipped_empty: usize,
    pub failed: Vec<RowFailure>,
}

#[derive(Debug, Clone, Copy)]
pub struct PassSettings {
    pub batch_size: usize,
    pub poll_interval: Duration,
}

impl Default for PassSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }
}

pub struct BatchWorker {
    store: Arc<dyn RecordStore>,
    analyzer: Arc<dyn Analyzer>,
    visualizer: Box<dyn Visualizer>,
    uploader: Arc<dyn ArtifactUploader>,
    persister: Persister,
    settings: PassSettings,
}

impl BatchWorker {
    pub fn new(
        store: Arc<dyn RecordStore>,
        analyzer: Arc<dyn Analyzer>,
        uploader: Arc<dyn ArtifactUploader>,
        settings: PassSettings,
    ) -> Self {
        let persister = Persister::new(store.clone(), analyzer.name());
        Self {
            store,
            analyzer,
            visualizer: Box::<WordCloudVisualizer>::default(),
            uploader,
            persister,
            settings,
        }
    }

    pub fn with_visualizer(mut self, visualizer: Box<dyn Visualizer>) -> Self {
        self.visualizer = visualizer;
        self
    }

    pub fn settings(&self) -> PassSettings {
        self.settings
    }

    /// One fetch + process cycle. Store and row failures are logged and
    /// reported; they never abort the pass.
    pub async fn run_pass(&self) -> PassReport {
        let mut report = PassReport::default();

        let records = match self.store.fetch_unprocessed(self.settings.batch_size).await {
            Ok(records) => records,
            Err(err) => {
                error!(
                    store = self.store.backend_name(),
                    retryable = err.disposition() == RetryDisposition::Retryable,
                    error = %err,
                    "fetching unprocessed rows failed"
                );
                return report;
            }
        };
        report.fetched = records.len();
        if records.is_empty() {
            info!("no unprocessed rows");
            return report;
        }

        for record in &records {
            info!(id = %record.id, "analyzing row");
            match self.process_row(record).await {
                Ok(RowOutcome::SkippedEmpty) => {
                    info!(id = %record.id, "empty text, marked processed");
                    report.skipped_empty += 1;
                }
                Ok(RowOutcome::Analyzed(result)) => {
                    info!(
                        id = %record.id,
                        label = %result.sentiment_label,
                        score = result.sentiment_score,
                        wordcloud = result.wordcloud_url.is_some(),
                        "row processed"
                    );
                    report.analyzed += 1;
                }
                Err(err) => {
                    error!(id = %record.id, error = %err, "row failed, continuing with batch");
                    report.failed.push(RowFailure {
                        id: record.id.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            fetched = report.fetched,
            analyzed = report.analyzed,
            skipped_empty = report.skipped_empty,
            failed = report.failed.len(),
            "pass complete"
        );
        report
    }

    pub async fn process_row(&self, record: &SourceRecord) -> Result<RowOutcome, RowError> {
        let text = record.trimmed_text();
        if text.is_empty() {
            self.store.mark_processed(&record.id).await?;
            return Ok(RowOutcome::SkippedEmpty);
        }

        let analysis = self.analyzer.analyze(text).await?;
        let png = self.visualizer.render(text)?;

        let key = wordcloud_key(&record.id);
        let wordcloud_url = match self.uploader.upload(png, &key).await {
            Ok(url) => Some(url),
            Err(err) => {
                warn!(id = %record.id, key = %key, error = %err, "word cloud upload failed, persisting without url");
                None
            }
        };

        let result = self.persister.persist(record, analysis, wordcloud_url).await?;
        Ok(RowOutcome::Analyzed(result))
    }

    /// Pass, sleep, repeat until `shutdown` resolves. Shutdown is only
    /// observed between passes.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            self.run_pass().await;
            info!(
                secs = self.settings.poll_interval.as_secs(),
                "sleeping until next pass"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                _ = &mut shutdown => {
                    info!("shutdown requested, worker stopping");
                    return;
                }
            }
        }
    }

    pub async fn run_forever(&self) {
        self.run_until(std::future::pending()).await
    }
}

/// Wire the collaborators named by `config`.
pub async fn build_worker(config: &WorkerConfig) -> anyhow::Result<BatchWorker> {
    let client = SupabaseClient::new(SupabaseClientConfig {
        base_url: config.supabase_url.clone(),
        api_key: config.supabase_key.clone(),
        timeout: Duration::from_secs(config.http_timeout_secs),
        user_agent: Some(config.user_agent.clone()),
    })
    .context("building supabase client")?;

    let store: Arc<dyn RecordStore> = match &config.database_url {
        Some(url) => Arc::new(PgRecordStore::connect(url, config.claim_lease).await?),
        None => Arc::new(PostgrestRecordStore::new(client.clone())),
    };
    let uploader = Arc::new(SupabaseStorage::new(client, config.bucket.clone()));
    let analyzer = select_analyzer(config.backend, config.hosted.clone()).await;

    info!(
        store = store.backend_name(),
        analyzer = analyzer.name(),
        bucket = %config.bucket,
        batch_size = config.batch_size,
        poll_secs = config.poll_interval.as_secs(),
        "worker configured"
    );

    Ok(BatchWorker::new(
        store,
        analyzer,
        uploader,
        PassSettings {
            batch_size: config.batch_size,
            poll_interval: config.poll_interval,
        },
    ))
}
