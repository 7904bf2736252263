//! Supabase Storage uploader for word cloud artifacts.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::{error_body, ArtifactUploader, SupabaseClient, UploadError};

/// Validity of issued links: five years.
pub const SIGNED_URL_TTL_SECS: u64 = 60 * 60 * 24 * 365 * 5;

#[derive(Debug, Deserialize)]
struct SignResponse {
    #[serde(rename = "signedURL", alias = "signedUrl")]
    signed_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SupabaseStorage {
    client: SupabaseClient,
    bucket: String,
}

impl SupabaseStorage {
    pub fn new(client: SupabaseClient, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub(crate) fn upload_request(&self, bytes: Vec<u8>, key: &str) -> RequestBuilder {
        let url = self
            .client
            .endpoint(&["storage", "v1", "object", &self.bucket, key]);
        self.client
            .http()
            .post(url)
            .header(CONTENT_TYPE, "image/png")
            .header("x-upsert", "false")
            .body(bytes)
    }

    pub(crate) fn sign_request(&self, key: &str) -> RequestBuilder {
        let url = self
            .client
            .endpoint(&["storage", "v1", "object", "sign", &self.bucket, key]);
        self.client
            .http()
            .post(url)
            .json(&json!({ "expiresIn": SIGNED_URL_TTL_SECS }))
    }
}

/// The sign endpoint answers with a path relative to `/storage/v1`; newer
/// deployments may already return an absolute url.
pub fn resolve_signed_url(base: &Url, signed: &str) -> Option<String> {
    let signed = signed.trim();
    if signed.is_empty() {
        return None;
    }
    if signed.starts_with("http://") || signed.starts_with("https://") {
        return Some(signed.to_string());
    }
    let root = base.as_str().trim_end_matches('/');
    let path = signed.trim_start_matches('/');
    Some(format!("{root}/storage/v1/{path}"))
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, UploadError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let (status, url, body) = error_body(resp).await;
    Err(UploadError::HttpStatus { status, url, body })
}

#[async_trait]
impl ArtifactUploader for SupabaseStorage {
    async fn upload(&self, bytes: Vec<u8>, key: &str) -> Result<String, UploadError> {
        let size = bytes.len();
        check(self.upload_request(bytes, key).send().await?).await?;
        debug!(bucket = %self.bucket, key, size, "artifact uploaded");

        let signed: SignResponse = check(self.sign_request(key).send().await?)
            .await?
            .json()
            .await?;
        signed
            .signed_url
            .as_deref()
            .and_then(|path| resolve_signed_url(self.client.base_url(), path))
            .ok_or_else(|| UploadError::MissingSignedUrl(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SupabaseClientConfig;
    use std::time::Duration;

    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value;

    fn storage_at(base_url: &str) -> SupabaseStorage {
        let client = SupabaseClient::new(SupabaseClientConfig {
            base_url: base_url.into(),
            api_key: "service-key".into(),
            timeout: Duration::from_secs(5),
            user_agent: None,
        })
        .expect("client");
        SupabaseStorage::new(client, "wordclouds")
    }

    fn storage() -> SupabaseStorage {
        storage_at("https://demo.supabase.co/")
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers.get("apikey").and_then(|v| v.to_str().ok()) == Some("service-key")
            && headers.get("authorization").and_then(|v| v.to_str().ok())
                == Some("Bearer service-key")
    }

    async fn put_object(
        Path(key): Path<String>,
        headers: HeaderMap,
        body: axum::body::Bytes,
    ) -> (StatusCode, Json<Value>) {
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "unauthorized" })));
        }
        if key == "wc_taken.png" {
            return (StatusCode::CONFLICT, Json(json!({ "error": "Duplicate" })));
        }
        assert!(body.starts_with(b"\x89PNG"));
        (StatusCode::OK, Json(json!({ "Key": format!("wordclouds/{key}") })))
    }

    async fn sign_object(
        Path(key): Path<String>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        if !authorized(&headers) || body["expiresIn"] != SIGNED_URL_TTL_SECS {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": "bad sign request" })));
        }
        if key == "wc_unsigned.png" {
            return (StatusCode::OK, Json(json!({})));
        }
        (
            StatusCode::OK,
            Json(json!({ "signedURL": format!("/object/sign/wordclouds/{key}?token=t0k") })),
        )
    }

    async fn storage_api() -> String {
        let app = Router::new()
            .route("/storage/v1/object/wordclouds/{key}", post(put_object))
            .route("/storage/v1/object/sign/wordclouds/{key}", post(sign_object));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        format!("http://{addr}")
    }

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n";

    #[tokio::test]
    async fn upload_returns_absolute_signed_url() {
        let base = storage_api().await;
        let url = storage_at(&base)
            .upload(PNG.to_vec(), "wc_1.png")
            .await
            .expect("upload");
        assert_eq!(
            url,
            format!("{base}/storage/v1/object/sign/wordclouds/wc_1.png?token=t0k")
        );
    }

    #[tokio::test]
    async fn existing_object_and_missing_link_are_upload_errors() {
        let storage = storage_at(&storage_api().await);

        let taken = storage.upload(PNG.to_vec(), "wc_taken.png").await;
        assert!(matches!(taken, Err(UploadError::HttpStatus { status: 409, .. })));

        let unsigned = storage.upload(PNG.to_vec(), "wc_unsigned.png").await;
        assert!(matches!(
            unsigned,
            Err(UploadError::MissingSignedUrl(key)) if key == "wc_unsigned.png"
        ));
    }

    #[test]
    fn upload_targets_bucket_object_path() {
        let req = storage()
            .upload_request(vec![0x89, b'P', b'N', b'G'], "wc_1.png")
            .build()
            .expect("request");
        assert_eq!(
            req.url().as_str(),
            "https://demo.supabase.co/storage/v1/object/wordclouds/wc_1.png"
        );
        assert_eq!(req.headers()[CONTENT_TYPE], "image/png");
        assert_eq!(req.headers()["x-upsert"], "false");
    }

    #[test]
    fn sign_requests_five_year_validity() {
        let req = storage().sign_request("wc_1.png").build().expect("request");
        assert!(req
            .url()
            .as_str()
            .ends_with("/storage/v1/object/sign/wordclouds/wc_1.png"));
        let body: serde_json::Value =
            serde_json::from_slice(req.body().and_then(|b| b.as_bytes()).expect("body")).unwrap();
        assert_eq!(body["expiresIn"], 157_680_000u64);
    }

    #[test]
    fn relative_signed_paths_resolve_against_storage_root() {
        let base = Url::parse("https://demo.supabase.co").unwrap();
        assert_eq!(
            resolve_signed_url(&base, "/object/sign/wordclouds/wc_1.png?token=abc").as_deref(),
            Some("https://demo.supabase.co/storage/v1/object/sign/wordclouds/wc_1.png?token=abc")
        );
        assert_eq!(
            resolve_signed_url(&base, "https://cdn.example.com/x.png").as_deref(),
            Some("https://cdn.example.com/x.png")
        );
        assert_eq!(resolve_signed_url(&base, "  "), None);
    }
}
