//! Sentiment + summary analyzers.
//!
//! Two interchangeable backends sit behind [`Analyzer`]: a lexicon scorer
//! that runs in-process and a hosted-model backend that calls remote
//! classification and summarization models. The backend is chosen once at
//! startup by [`select_analyzer`].

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use senti_core::Analysis;
use thiserror::Error;
use tracing::{info, warn};

mod hosted;
mod lexicon;
mod summarize;

pub use hosted::{HostedModelAnalyzer, HostedModelConfig, CLASSIFIER_MAX_CHARS};
pub use lexicon::{label_for_compound, LexiconAnalyzer, NEGATIVE_THRESHOLD, POSITIVE_THRESHOLD};
pub use summarize::{extractive_summary, fallback_summary, SummaryError, FALLBACK_MAX_CHARS};

pub const CRATE_NAME: &str = "senti-analysis";

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("nothing to analyze: input is empty")]
    EmptyInput,
    #[error("model request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("model endpoint returned http status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("unexpected model response: {0}")]
    UnexpectedResponse(String),
    #[error("backend not available: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Backend name recorded in result provenance.
    fn name(&self) -> &'static str;

    /// Label, score and summary for a non-empty trimmed text.
    async fn analyze(&self, text: &str) -> Result<Analysis, AnalysisError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Lexicon,
    HostedModel,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lexicon" | "vader" => Ok(BackendKind::Lexicon),
            "hf" | "model" | "hosted" => Ok(BackendKind::HostedModel),
            other => Err(format!("unknown sentiment backend '{other}'")),
        }
    }
}

/// Build the analyzer for this process. A hosted-model request that cannot
/// be satisfied downgrades to the lexicon backend for the process lifetime.
pub async fn select_analyzer(kind: BackendKind, hosted: HostedModelConfig) -> Arc<dyn Analyzer> {
    match kind {
        BackendKind::Lexicon => Arc::new(LexiconAnalyzer::new()),
        BackendKind::HostedModel => match HostedModelAnalyzer::connect(hosted).await {
            Ok(analyzer) => {
                info!(
                    classifier = %analyzer.config().sentiment_model,
                    summarizer = %analyzer.config().summary_model,
                    "hosted model backend ready"
                );
                Arc::new(analyzer)
            }
            Err(err) => {
                warn!(error = %err, "hosted model backend unavailable, switching to lexicon backend");
                Arc::new(LexiconAnalyzer::new())
            }
        },
    }
}
