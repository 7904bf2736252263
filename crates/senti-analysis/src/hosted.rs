//! Hosted-model backend: remote sentiment classifier + abstractive summarizer
//! served by a Hugging Face style inference API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use senti_core::{Analysis, SentimentLabel};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::summarize::fallback_summary;
use crate::{AnalysisError, Analyzer};

/// Classifier input is cut to this many characters.
pub const CLASSIFIER_MAX_CHARS: usize = 512;

const SUMMARY_MIN_LENGTH: u32 = 20;
const SUMMARY_MAX_LENGTH: u32 = 60;

#[derive(Debug, Clone)]
pub struct HostedModelConfig {
    pub api_base: String,
    pub api_token: Option<String>,
    pub sentiment_model: String,
    pub summary_model: String,
    pub timeout: Duration,
}

impl Default for HostedModelConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api-inference.huggingface.co".to_string(),
            api_token: None,
            sentiment_model: "distilbert-base-uncased-finetuned-sst-2-english".to_string(),
            summary_model: "sshleifer/distilbart-cnn-12-6".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    inputs: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<InferenceOptions>,
}

/// Without `wait_for_model` a cold model answers 503 while it loads.
#[derive(Debug, Clone, Copy, Serialize)]
struct InferenceOptions {
    wait_for_model: bool,
}

#[derive(Debug, Serialize)]
struct SummarizeRequest<'a> {
    inputs: &'a str,
    parameters: SummarizeParameters,
}

#[derive(Debug, Serialize)]
struct SummarizeParameters {
    min_length: u32,
    max_length: u32,
    do_sample: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct Prediction {
    label: String,
    score: f64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClassifyResponse {
    Nested(Vec<Vec<Prediction>>),
    Flat(Vec<Prediction>),
}

#[derive(Debug, Deserialize)]
struct SummaryOutput {
    summary_text: String,
}

pub struct HostedModelAnalyzer {
    client: reqwest::Client,
    config: HostedModelConfig,
}

impl HostedModelAnalyzer {
    /// Build the client and make one classification call so a missing token
    /// or unreachable model is caught before the first batch. The call waits
    /// for a cold model to load instead of failing on its 503.
    pub async fn connect(config: HostedModelConfig) -> Result<Self, AnalysisError> {
        let token = config
            .api_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| AnalysisError::Unavailable("no inference api token configured".into()))?;

        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|err| AnalysisError::Unavailable(format!("invalid api token: {err}")))?;
        headers.insert(AUTHORIZATION, bearer);

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        let analyzer = Self { client, config };
        analyzer
            .classify_with("ok", Some(InferenceOptions { wait_for_model: true }))
            .await?;
        Ok(analyzer)
    }

    pub fn config(&self) -> &HostedModelConfig {
        &self.config
    }

    fn model_url(&self, model: &str) -> String {
        format!("{}/models/{}", self.config.api_base.trim_end_matches('/'), model)
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        model: &str,
        body: &T,
    ) -> Result<reqwest::Response, AnalysisError> {
        let resp = self
            .client
            .post(self.model_url(model))
            .json(body)
            .send()
            .await?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(AnalysisError::HttpStatus { status, body })
    }

    async fn classify(&self, text: &str) -> Result<(SentimentLabel, f64), AnalysisError> {
        self.classify_with(text, None).await
    }

    async fn classify_with(
        &self,
        text: &str,
        options: Option<InferenceOptions>,
    ) -> Result<(SentimentLabel, f64), AnalysisError> {
        let inputs = truncate_chars(text, CLASSIFIER_MAX_CHARS);
        let resp: ClassifyResponse = self
            .post(&self.config.sentiment_model, &ClassifyRequest { inputs, options })
            .await?
            .json()
            .await?;
        let best = top_prediction(resp)
            .ok_or_else(|| AnalysisError::UnexpectedResponse("classifier returned no labels".into()))?;
        Ok((SentimentLabel::parse(&best.label), best.score))
    }

    async fn summarize(&self, text: &str) -> Result<String, AnalysisError> {
        let request = SummarizeRequest {
            inputs: text,
            parameters: SummarizeParameters {
                min_length: SUMMARY_MIN_LENGTH,
                max_length: SUMMARY_MAX_LENGTH,
                do_sample: false,
            },
        };
        let outputs: Vec<SummaryOutput> = self
            .post(&self.config.summary_model, &request)
            .await?
            .json()
            .await?;
        outputs
            .into_iter()
            .map(|o| o.summary_text.trim().to_string())
            .find(|s| !s.is_empty())
            .ok_or_else(|| AnalysisError::UnexpectedResponse("summarizer returned no text".into()))
    }
}

fn top_prediction(resp: ClassifyResponse) -> Option<Prediction> {
    let predictions = match resp {
        ClassifyResponse::Nested(batches) => batches.into_iter().next()?,
        ClassifyResponse::Flat(predictions) => predictions,
    };
    predictions
        .into_iter()
        .max_by(|a, b| a.score.total_cmp(&b.score))
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[async_trait]
impl Analyzer for HostedModelAnalyzer {
    fn name(&self) -> &'static str {
        "hf"
    }

    async fn analyze(&self, text: &str) -> Result<Analysis, AnalysisError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AnalysisError::EmptyInput);
        }
        let (label, score) = self.classify(text).await?;
        let summary = match self.summarize(text).await {
            Ok(summary) => summary,
            Err(err) => {
                debug!(reason = %err, "model summary unavailable, using first sentence");
                fallback_summary(text)
            }
        };
        Ok(Analysis {
            label,
            score,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use crate::{select_analyzer, BackendKind};

    const TOKEN: &str = "hf_test";

    type Seen = Arc<Mutex<Vec<Value>>>;

    async fn classifier(
        State(seen): State<Seen>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        let bearer = headers.get("authorization").and_then(|v| v.to_str().ok());
        if bearer != Some("Bearer hf_test") {
            return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "invalid token" })));
        }
        seen.lock().unwrap().push(body);
        (
            StatusCode::OK,
            Json(json!([[
                { "label": "NEGATIVE", "score": 0.97 },
                { "label": "POSITIVE", "score": 0.03 }
            ]])),
        )
    }

    async fn unavailable() -> (StatusCode, Json<Value>) {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "Model is currently loading" })),
        )
    }

    async fn blank_summary() -> Json<Value> {
        Json(json!([{ "summary_text": "   " }]))
    }

    async fn inference_api(seen: Seen) -> String {
        let app = Router::new()
            .route("/models/sst2", post(classifier))
            .route("/models/cold", post(unavailable))
            .route("/models/bart-down", post(unavailable))
            .route("/models/bart-blank", post(blank_summary))
            .with_state(seen);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        format!("http://{addr}")
    }

    fn config(api_base: String, sentiment_model: &str, summary_model: &str) -> HostedModelConfig {
        HostedModelConfig {
            api_base,
            api_token: Some(TOKEN.to_string()),
            sentiment_model: sentiment_model.to_string(),
            summary_model: summary_model.to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn startup_call_waits_for_cold_models() {
        let seen = Seen::default();
        let base = inference_api(seen.clone()).await;
        let analyzer = HostedModelAnalyzer::connect(config(base, "sst2", "bart-down"))
            .await
            .expect("connect");
        analyzer.analyze("Late again.").await.expect("analysis");

        let bodies = seen.lock().unwrap().clone();
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[0]["inputs"], "ok");
        assert_eq!(bodies[0]["options"]["wait_for_model"], true);
        assert!(bodies[1].get("options").is_none());
    }

    #[tokio::test]
    async fn failed_summarizer_falls_back_to_first_sentence() {
        let base = inference_api(Seen::default()).await;
        let analyzer = HostedModelAnalyzer::connect(config(base, "sst2", "bart-down"))
            .await
            .expect("connect");

        let analysis = analyzer
            .analyze("The hinge snapped on day two. I want a refund.")
            .await
            .expect("analysis");
        assert_eq!(analysis.label, SentimentLabel::Negative);
        assert_eq!(analysis.label.as_str(), "negative");
        assert!((analysis.score - 0.97).abs() < 1e-9);
        assert_eq!(analysis.summary, "The hinge snapped on day two");
    }

    #[tokio::test]
    async fn blank_model_summary_falls_back_to_first_sentence() {
        let base = inference_api(Seen::default()).await;
        let analyzer = HostedModelAnalyzer::connect(config(base, "sst2", "bart-blank"))
            .await
            .expect("connect");

        let analysis = analyzer
            .analyze("Arrived broken. Box was crushed.")
            .await
            .expect("analysis");
        assert_eq!(analysis.summary, "Arrived broken");
    }

    #[tokio::test]
    async fn rejected_token_and_failed_model_downgrade_to_lexicon() {
        let base = inference_api(Seen::default()).await;

        let wrong_token = HostedModelConfig {
            api_token: Some("hf_wrong".into()),
            ..config(base.clone(), "sst2", "bart-down")
        };
        let err = HostedModelAnalyzer::connect(wrong_token.clone())
            .await
            .err()
            .expect("rejected token");
        assert!(matches!(err, AnalysisError::HttpStatus { status: 401, .. }));
        assert_eq!(
            select_analyzer(BackendKind::HostedModel, wrong_token).await.name(),
            "lexicon"
        );

        let cold = config(base.clone(), "cold", "bart-down");
        assert_eq!(
            select_analyzer(BackendKind::HostedModel, cold).await.name(),
            "lexicon"
        );

        let healthy = config(base, "sst2", "bart-down");
        assert_eq!(
            select_analyzer(BackendKind::HostedModel, healthy).await.name(),
            "hf"
        );
    }

    #[test]
    fn nested_and_flat_classifier_payloads_pick_best_label() {
        let nested: ClassifyResponse = serde_json::from_str(
            r#"[[{"label":"NEGATIVE","score":0.02},{"label":"POSITIVE","score":0.98}]]"#,
        )
        .unwrap();
        let best = top_prediction(nested).unwrap();
        assert_eq!(SentimentLabel::parse(&best.label), SentimentLabel::Positive);
        assert!((best.score - 0.98).abs() < 1e-9);

        let flat: ClassifyResponse =
            serde_json::from_str(r#"[{"label":"NEGATIVE","score":0.91}]"#).unwrap();
        assert_eq!(top_prediction(flat).unwrap().label, "NEGATIVE");

        let empty: ClassifyResponse = serde_json::from_str("[]").unwrap();
        assert!(top_prediction(empty).is_none());
    }

    #[test]
    fn classifier_input_is_truncated_on_char_boundaries() {
        let text = "é".repeat(600);
        assert_eq!(truncate_chars(&text, CLASSIFIER_MAX_CHARS).chars().count(), 512);
        assert_eq!(truncate_chars("short", CLASSIFIER_MAX_CHARS), "short");
    }

    #[test]
    fn summarize_request_carries_length_bounds() {
        let body = serde_json::to_value(SummarizeRequest {
            inputs: "text",
            parameters: SummarizeParameters {
                min_length: SUMMARY_MIN_LENGTH,
                max_length: SUMMARY_MAX_LENGTH,
                do_sample: false,
            },
        })
        .unwrap();
        assert_eq!(body["parameters"]["min_length"], 20);
        assert_eq!(body["parameters"]["max_length"], 60);
        assert_eq!(body["parameters"]["do_sample"], false);
    }

    #[tokio::test]
    async fn connect_requires_a_token() {
        let err = HostedModelAnalyzer::connect(HostedModelConfig::default())
            .await
            .err()
            .expect("missing token must fail");
        assert!(matches!(err, AnalysisError::Unavailable(_)));
    }
}
