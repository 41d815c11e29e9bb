//! Streaming upload manager
//!
//! Every capture is uploaded as soon as it is produced, independent of the
//! recording cycle. Each clip gets a `StreamingRecording` the instant its
//! upload is dispatched: first a local placeholder for immediate display,
//! then the server-assigned identity once credentials are issued. All list
//! mutation goes through stable identities, never positions, since
//! positions shift under concurrent deletion.

use crate::api::{ProgressFn, RecordingRecord, StudioApi, UploadSingleRequest};
use crate::capture::{MetadataSlot, PreviewHandle};
use crate::error::ApiError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Prefix marking a locally generated identity with no server counterpart.
const PLACEHOLDER_PREFIX: &str = "temp-";

/// Whether an identity is a local placeholder (never valid for backend
/// deletion or confirmation).
pub fn is_placeholder_id(id: &str) -> bool {
    id.starts_with(PLACEHOLDER_PREFIX)
}

/// Upload lifecycle of one clip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Completed,
    Error,
}

/// The per-clip upload record, 1:1 with a capture once upload begins.
#[derive(Debug, Clone)]
pub struct StreamingRecording {
    /// Server identity, or a `temp-` placeholder before credentials exist
    pub id: String,
    /// Storage object key, once issued
    pub object_key: Option<String>,
    /// Short-lived write URL
    pub upload_url: Option<String>,
    /// Read URL from the backend; the local preview is the primary source
    pub preview_url: Option<String>,
    /// Retained even after completion so review never flickers
    pub local_preview: Option<PreviewHandle>,
    pub status: UploadStatus,
    /// 0-100, non-decreasing while uploading
    pub progress: u8,
    /// Mirrors the capture's sequence index
    pub index: u32,
    /// Present only when status is `Error`
    pub error: Option<String>,
}

impl StreamingRecording {
    pub fn is_placeholder(&self) -> bool {
        is_placeholder_id(&self.id)
    }
}

/// Manages the set of in-flight and settled clip uploads for one session.
pub struct UploadManager {
    api: Arc<dyn StudioApi>,
    assignment_id: Option<i64>,
    metadata: MetadataSlot,
    recordings: Arc<Mutex<Vec<StreamingRecording>>>,
    uploading: AtomicUsize,
    semaphore: Arc<Semaphore>,
}

impl UploadManager {
    pub fn new(
        api: Arc<dyn StudioApi>,
        assignment_id: Option<i64>,
        metadata: MetadataSlot,
        max_concurrent_uploads: usize,
    ) -> Self {
        Self {
            api,
            assignment_id,
            metadata,
            recordings: Arc::new(Mutex::new(Vec::new())),
            uploading: AtomicUsize::new(0),
            semaphore: Arc::new(Semaphore::new(max_concurrent_uploads.max(1))),
        }
    }

    /// Upload a single clip.
    ///
    /// Rejected without side effects when no assignment identity or
    /// credential exists. Otherwise a placeholder record becomes visible
    /// immediately; failures at any later step mark that record `Error`
    /// and leave it in place so the user can delete and re-record.
    pub async fn upload_recording(
        &self,
        blob: Bytes,
        content_type: &str,
        index: u32,
    ) -> Option<StreamingRecording> {
        let Some(assignment_id) = self.assignment_id else {
            error!("Upload rejected: no assignment identity");
            return None;
        };
        if !self.api.ready() {
            error!("Upload rejected: caller is not authenticated");
            return None;
        }

        let placeholder_id = format!("{}{}", PLACEHOLDER_PREFIX, Uuid::new_v4());
        let preview = PreviewHandle::new(blob.clone());
        {
            let mut recordings = lock(&self.recordings);
            recordings.push(StreamingRecording {
                id: placeholder_id.clone(),
                object_key: None,
                upload_url: None,
                preview_url: None,
                local_preview: Some(preview),
                status: UploadStatus::Pending,
                progress: 0,
                index,
                error: None,
            });
        }

        self.uploading.fetch_add(1, Ordering::SeqCst);
        let result = self
            .run_upload(placeholder_id, assignment_id, blob, content_type, index)
            .await;
        self.uploading.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn run_upload(
        &self,
        placeholder_id: String,
        assignment_id: i64,
        blob: Bytes,
        content_type: &str,
        index: u32,
    ) -> Option<StreamingRecording> {
        // Cap simultaneous transfers so the network stack never saturates
        let _permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.mark_error(&placeholder_id, "upload manager shut down");
                return None;
            }
        };

        self.update(&placeholder_id, |r| r.status = UploadStatus::Uploading);

        // Device metadata rides along on the first upload of the session
        let metadata = lock(&self.metadata).take();
        let request = UploadSingleRequest {
            assignment_id,
            content_type: content_type.to_string(),
            metadata,
            index,
        };

        let ticket = match self.api.init_upload(&request).await {
            Ok(ticket) => ticket,
            Err(e) => {
                warn!(index, "Upload initiation failed: {}", e);
                self.mark_error(&placeholder_id, &e.to_string());
                return None;
            }
        };

        let recording_id = ticket.recording_id.clone();
        self.update(&placeholder_id, |r| {
            r.id = recording_id.clone();
            r.object_key = Some(ticket.key.clone());
            r.upload_url = Some(ticket.upload_url.clone());
            r.preview_url = Some(ticket.download_url.clone());
        });

        let progress: ProgressFn = {
            let recordings = self.recordings.clone();
            let id = ticket.recording_id.clone();
            Arc::new(move |pct| {
                let mut recordings = lock(&recordings);
                if let Some(r) = recordings.iter_mut().find(|r| r.id == id) {
                    // Progress never regresses during a transfer
                    r.progress = r.progress.max(pct.min(100));
                }
            })
        };

        if let Err(e) = self
            .api
            .put_object(&ticket.upload_url, content_type, blob, progress)
            .await
        {
            warn!(index, "Upload transfer failed: {}", e);
            self.mark_error(&ticket.recording_id, &e.to_string());
            return None;
        }

        self.update(&ticket.recording_id, |r| {
            r.status = UploadStatus::Completed;
            r.progress = 100;
            r.error = None;
        });
        info!(index, id = %ticket.recording_id, "Clip upload completed");
        self.find(&ticket.recording_id)
    }

    /// Delete a recording by identity.
    ///
    /// Placeholder identities are removed locally only; server identities
    /// issue a backend delete first, and the record stays in place when
    /// that fails so the caller can surface the error.
    pub async fn delete_recording(&self, id: &str) -> Result<(), ApiError> {
        if !is_placeholder_id(id) {
            self.api.delete_recording(id).await?;
        }

        let mut recordings = lock(&self.recordings);
        if let Some(position) = recordings.iter().position(|r| r.id == id) {
            let removed = recordings.remove(position);
            if let Some(preview) = removed.local_preview {
                preview.revoke();
            }
        }
        Ok(())
    }

    /// Send every completed recording's identity as one batch confirmation.
    ///
    /// Returns `Ok(false)` without calling the backend when nothing is
    /// completed. On failure nothing is cleared, so confirmation can be
    /// retried without re-uploading.
    pub async fn confirm_all_recordings(&self) -> Result<bool, ApiError> {
        let completed = self.completed_ids();
        if completed.is_empty() {
            return Ok(false);
        }
        self.api.confirm_uploads(&completed).await?;
        info!(count = completed.len(), "Recordings confirmed");
        Ok(true)
    }

    /// Rebuild completed records from the backend's session-restore listing.
    pub fn restore_recordings(&self, records: Vec<RecordingRecord>) {
        let mut recordings = lock(&self.recordings);
        *recordings = records
            .into_iter()
            .enumerate()
            .map(|(i, record)| StreamingRecording {
                id: record.id,
                object_key: record.s3_key,
                upload_url: None,
                preview_url: record.preview_url,
                local_preview: None,
                status: UploadStatus::Completed,
                progress: 100,
                index: i as u32,
                error: None,
            })
            .collect();
    }

    /// Drop every record and release all local previews.
    pub fn clear_recordings(&self) {
        let mut recordings = lock(&self.recordings);
        for recording in recordings.iter() {
            if let Some(preview) = &recording.local_preview {
                preview.revoke();
            }
        }
        recordings.clear();
    }

    /// Backend handle, shared with callers that issue their own requests.
    pub fn api(&self) -> &Arc<dyn StudioApi> {
        &self.api
    }

    /// Snapshot of the current set, in insertion order.
    pub fn recordings(&self) -> Vec<StreamingRecording> {
        lock(&self.recordings).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.recordings).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.recordings).is_empty()
    }

    pub fn is_uploading(&self) -> bool {
        self.uploading.load(Ordering::SeqCst) > 0
    }

    /// Mean of all items' individual progress; 0 when the set is empty.
    pub fn overall_progress(&self) -> u8 {
        let recordings = lock(&self.recordings);
        if recordings.is_empty() {
            return 0;
        }
        let sum: u32 = recordings.iter().map(|r| r.progress as u32).sum();
        (sum as f64 / recordings.len() as f64).round() as u8
    }

    /// True iff the set is non-empty and every item completed.
    pub fn all_completed(&self) -> bool {
        let recordings = lock(&self.recordings);
        !recordings.is_empty()
            && recordings
                .iter()
                .all(|r| r.status == UploadStatus::Completed)
    }

    /// Identities of every completed recording.
    pub fn completed_ids(&self) -> Vec<String> {
        lock(&self.recordings)
            .iter()
            .filter(|r| r.status == UploadStatus::Completed)
            .map(|r| r.id.clone())
            .collect()
    }

    fn find(&self, id: &str) -> Option<StreamingRecording> {
        lock(&self.recordings).iter().find(|r| r.id == id).cloned()
    }

    fn update<F: FnOnce(&mut StreamingRecording)>(&self, id: &str, f: F) {
        let mut recordings = lock(&self.recordings);
        if let Some(recording) = recordings.iter_mut().find(|r| r.id == id) {
            f(recording);
        }
    }

    fn mark_error(&self, id: &str, message: &str) {
        self.update(id, |r| {
            r.status = UploadStatus::Error;
            r.error = Some(message.to_string());
        });
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
