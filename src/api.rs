//! Backend client for the collection API
//!
//! Covers the five calls the studio core consumes: per-clip upload
//! credential issuance, the presigned PUT to object storage, recording
//! deletion, batch confirmation and the session-resumption listing, plus
//! the read-only assignment lookup. All calls are bearer-authenticated
//! except the presigned PUT, which carries its credential in the URL.

use crate::auth::TokenProvider;
use crate::capture::CaptureMetadata;
use crate::error::ApiError;
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

/// Byte-level progress observer for a single PUT, receiving 0-100.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Stream the PUT body in slices of this size so progress stays granular.
const PUT_CHUNK_SIZE: usize = 64 * 1024;

/// Progress for bytes handed to the transport. Capped below 100: the
/// final percent is reserved for the storage acknowledgement, so a clip
/// never shows complete before the server has accepted it.
fn chunk_progress(sent: usize, total: usize) -> u8 {
    (((sent as f64 / total as f64) * 100.0).round() as u8).min(99)
}

/// Generic response envelope used by the backend.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    success: bool,
    data: T,
}

/// Body of `POST /recordings/upload-single`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSingleRequest {
    pub assignment_id: i64,
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<CaptureMetadata>,
    pub index: u32,
}

/// Credentials issued for one clip upload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTicket {
    /// Server-assigned recording identity
    pub recording_id: String,
    /// Time-limited write URL
    pub upload_url: String,
    /// Time-limited read URL
    pub download_url: String,
    /// Storage object key
    pub key: String,
}

/// Body of `POST /recordings/confirm-upload`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmUploadRequest<'a> {
    recording_ids: &'a [String],
}

/// One recording row as returned by `my-recordings`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingRecord {
    pub id: String,
    #[serde(default)]
    pub preview_url: Option<String>,
    #[serde(default)]
    pub s3_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MyRecordingsData {
    recordings: Vec<RecordingRecord>,
}

/// Assignment returned by `GET /collect/{slug}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: i64,
    pub slug: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub video_reference_url: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
}

/// Backend contract consumed by the upload manager and session restore.
#[async_trait]
pub trait StudioApi: Send + Sync {
    /// Whether the caller currently holds a usable credential.
    fn ready(&self) -> bool {
        true
    }

    /// Request one-time upload credentials scoped to a specific clip.
    async fn init_upload(&self, request: &UploadSingleRequest) -> Result<UploadTicket, ApiError>;

    /// Stream the clip bytes to object storage, reporting progress.
    async fn put_object(
        &self,
        upload_url: &str,
        content_type: &str,
        blob: Bytes,
        progress: ProgressFn,
    ) -> Result<(), ApiError>;

    /// Remove the storage object and its database record.
    async fn delete_recording(&self, id: &str) -> Result<(), ApiError>;

    /// Mark the given recordings as permanently accepted.
    async fn confirm_uploads(&self, recording_ids: &[String]) -> Result<(), ApiError>;

    /// Fetch recording records with fresh read URLs, for session restore.
    async fn my_recordings(&self, ids: &[String]) -> Result<Vec<RecordingRecord>, ApiError>;

    /// Look up the target assignment by slug.
    async fn assignment(&self, slug: &str) -> Result<Assignment, ApiError>;
}

/// HTTP implementation of the backend contract.
pub struct HttpStudioApi {
    base_url: String,
    client: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpStudioApi {
    pub fn new(base_url: &str, tokens: Arc<dyn TokenProvider>) -> anyhow::Result<Self> {
        url::Url::parse(base_url)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client for HttpStudioApi")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            tokens,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn bearer(&self) -> Result<String, ApiError> {
        Ok(self.tokens.bearer_token()?)
    }

    async fn server_error(response: reqwest::Response) -> ApiError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        ApiError::ServerError { status, message }
    }
}

#[async_trait]
impl StudioApi for HttpStudioApi {
    fn ready(&self) -> bool {
        self.tokens.available()
    }

    #[instrument(skip(self, request), fields(index = request.index))]
    async fn init_upload(&self, request: &UploadSingleRequest) -> Result<UploadTicket, ApiError> {
        let response = self
            .client
            .post(self.endpoint("recordings/upload-single"))
            .bearer_auth(self.bearer()?)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::server_error(response).await);
        }

        let envelope: ApiEnvelope<UploadTicket> = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("upload-single: {}", e)))?;
        if !envelope.success {
            return Err(ApiError::InvalidResponse(
                "upload-single reported failure".into(),
            ));
        }
        Ok(envelope.data)
    }

    #[instrument(skip(self, upload_url, blob, progress), fields(bytes = blob.len()))]
    async fn put_object(
        &self,
        upload_url: &str,
        content_type: &str,
        blob: Bytes,
        progress: ProgressFn,
    ) -> Result<(), ApiError> {
        let total = blob.len();
        let request = self
            .client
            .put(upload_url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header(reqwest::header::CONTENT_LENGTH, total as u64);

        let request = if total == 0 {
            request.body(Vec::new())
        } else {
            let observer = progress.clone();
            let chunks = (0..total).step_by(PUT_CHUNK_SIZE).map(move |offset| {
                let end = (offset + PUT_CHUNK_SIZE).min(total);
                observer(chunk_progress(end, total));
                Ok::<Bytes, std::io::Error>(blob.slice(offset..end))
            });
            request.body(reqwest::Body::wrap_stream(futures_util::stream::iter(
                chunks,
            )))
        };

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Self::server_error(response).await);
        }
        progress(100);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_recording(&self, id: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .delete(self.endpoint(&format!("recordings/{}", id)))
            .bearer_auth(self.bearer()?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::server_error(response).await);
        }
        info!(id, "Recording deleted");
        Ok(())
    }

    #[instrument(skip(self, recording_ids), fields(count = recording_ids.len()))]
    async fn confirm_uploads(&self, recording_ids: &[String]) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.endpoint("recordings/confirm-upload"))
            .bearer_auth(self.bearer()?)
            .json(&ConfirmUploadRequest { recording_ids })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::server_error(response).await);
        }
        Ok(())
    }

    #[instrument(skip(self, ids))]
    async fn my_recordings(&self, ids: &[String]) -> Result<Vec<RecordingRecord>, ApiError> {
        let response = self
            .client
            .get(self.endpoint("recordings/my-recordings"))
            .query(&[("ids", ids.join(","))])
            .bearer_auth(self.bearer()?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::server_error(response).await);
        }

        let envelope: ApiEnvelope<MyRecordingsData> = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("my-recordings: {}", e)))?;
        if !envelope.success {
            return Err(ApiError::InvalidResponse(
                "my-recordings reported failure".into(),
            ));
        }
        Ok(envelope.data.recordings)
    }

    #[instrument(skip(self))]
    async fn assignment(&self, slug: &str) -> Result<Assignment, ApiError> {
        let response = self
            .client
            .get(self.endpoint(&format!("collect/{}", slug)))
            .bearer_auth(self.bearer()?)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(slug.to_string()));
        }
        if !response.status().is_success() {
            return Err(Self::server_error(response).await);
        }

        let envelope: ApiEnvelope<Assignment> = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("collect: {}", e)))?;
        Ok(envelope.data)
    }
}
