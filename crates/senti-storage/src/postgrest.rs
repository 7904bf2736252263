//! Supabase REST (PostgREST) record store.

use async_trait::async_trait;
use reqwest::RequestBuilder;
use senti_core::{AnalysisResult, RecordId, SourceRecord};
use serde_json::json;

use crate::{error_body, RecordStore, StoreError, SupabaseClient, RESULTS_TABLE, SOURCE_TABLE};

/// Record store backed by `/rest/v1`. Uses the default two-step
/// [`RecordStore::commit_result`]; PostgREST offers no multi-table transaction.
#[derive(Debug, Clone)]
pub struct PostgrestRecordStore {
    client: SupabaseClient,
}

impl PostgrestRecordStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    fn table(&self, name: &str) -> reqwest::Url {
        self.client.endpoint(&["rest", "v1", name])
    }

    pub(crate) fn fetch_request(&self, limit: usize) -> RequestBuilder {
        self.client.http().get(self.table(SOURCE_TABLE)).query(&[
            ("select", "*".to_string()),
            ("processed", "eq.false".to_string()),
            ("limit", limit.to_string()),
        ])
    }

    pub(crate) fn mark_request(&self, id: &RecordId) -> RequestBuilder {
        self.client
            .http()
            .patch(self.table(SOURCE_TABLE))
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=minimal")
            .json(&json!({ "processed": true }))
    }

    pub(crate) fn insert_request(&self, payload: &AnalysisResult) -> RequestBuilder {
        self.client
            .http()
            .post(self.table(RESULTS_TABLE))
            .header("Prefer", "return=minimal")
            .json(payload)
    }
}

async fn send(request: RequestBuilder) -> Result<reqwest::Response, StoreError> {
    let resp = request.send().await?;
    if resp.status().is_success() {
        return Ok(resp);
    }
    let (status, url, body) = error_body(resp).await;
    Err(StoreError::HttpStatus { status, url, body })
}

#[async_trait]
impl RecordStore for PostgrestRecordStore {
    fn backend_name(&self) -> &'static str {
        "postgrest"
    }

    async fn fetch_unprocessed(&self, limit: usize) -> Result<Vec<SourceRecord>, StoreError> {
        let resp = send(self.fetch_request(limit)).await?;
        let rows: Option<Vec<SourceRecord>> = resp.json().await?;
        Ok(rows.unwrap_or_default())
    }

    async fn mark_processed(&self, id: &RecordId) -> Result<(), StoreError> {
        send(self.mark_request(id)).await.map(|_| ())
    }

    async fn insert_result(&self, payload: &AnalysisResult) -> Result<(), StoreError> {
        send(self.insert_request(payload)).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SupabaseClientConfig;
    use chrono::Utc;
    use senti_core::{Analysis, ModelInfo, SentimentLabel};
    use std::time::Duration;

    fn store() -> PostgrestRecordStore {
        PostgrestRecordStore::new(
            SupabaseClient::new(SupabaseClientConfig {
                base_url: "https://demo.supabase.co".into(),
                api_key: "anon-key".into(),
                timeout: Duration::from_secs(5),
                user_agent: Some("senti/0.1".into()),
            })
            .expect("client"),
        )
    }

    #[test]
    fn fetch_filters_unprocessed_rows_with_limit() {
        let req = store().fetch_request(100).build().expect("request");
        assert_eq!(req.method(), reqwest::Method::GET);
        assert_eq!(
            req.url().as_str(),
            "https://demo.supabase.co/rest/v1/uploaded_csv_data?select=*&processed=eq.false&limit=100"
        );
    }

    #[test]
    fn mark_patches_by_id_filter() {
        let req = store()
            .mark_request(&RecordId::Int(42))
            .build()
            .expect("request");
        assert_eq!(req.method(), reqwest::Method::PATCH);
        assert_eq!(req.url().query(), Some("id=eq.42"));
        let body = req.body().and_then(|b| b.as_bytes()).expect("body");
        assert_eq!(body, br#"{"processed":true}"#);
    }

    #[test]
    fn insert_posts_result_payload() {
        let record = SourceRecord::new(3, "Nice.");
        let payload = AnalysisResult::from_parts(
            &record,
            Analysis {
                label: SentimentLabel::Positive,
                score: 0.4,
                summary: "Nice".into(),
            },
            Some("https://demo.supabase.co/storage/v1/object/sign/wordclouds/wc_3.png?token=t".into()),
            ModelInfo {
                method: "lexicon".into(),
                timestamp: Utc::now(),
            },
        );
        let req = store().insert_request(&payload).build().expect("request");
        assert_eq!(req.method(), reqwest::Method::POST);
        assert!(req.url().as_str().ends_with("/rest/v1/analyzed_results"));
        assert_eq!(req.headers()["prefer"], "return=minimal");
        let body: serde_json::Value =
            serde_json::from_slice(req.body().and_then(|b| b.as_bytes()).expect("body")).unwrap();
        assert_eq!(body["source_id"], 3);
        assert_eq!(body["summary"], "Nice");
    }
}
