//! Capture types and error definitions

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// One flushed fragment of the active media stream.
///
/// Fragments arrive at sub-second intervals so an abrupt stop still
/// retains most of the recorded take.
#[derive(Debug, Clone)]
pub struct MediaChunk {
    pub data: Bytes,
}

/// Negotiated properties of the active video track, reported when the
/// source is opened.
#[derive(Debug, Clone, Default)]
pub struct SourceInfo {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub device_label: Option<String>,
}

/// Platform media stream feeding the capture engine.
///
/// The stream is an exclusive resource: the engine is its only consumer,
/// and the Director is the only caller permitted to start and stop it.
pub trait ChunkSource: Send {
    /// Track properties, for quality-audit metadata.
    fn info(&self) -> SourceInfo;

    /// Container types this source can produce.
    fn supported_mime_types(&self) -> Vec<String>;

    /// Begin producing chunks at the given flush interval.
    fn start(
        &mut self,
        flush_interval: Duration,
    ) -> Result<mpsc::UnboundedReceiver<MediaChunk>, CaptureError>;

    /// Stop producing chunks. The engine drains whatever was flushed.
    fn stop(&mut self);
}

/// Quality-audit metadata attached to the first upload request of a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// Slot the engine fills on first start and the upload manager drains for
/// the first upload request.
pub type MetadataSlot = Arc<Mutex<Option<CaptureMetadata>>>;

/// Revocable handle for local playback of a clip.
///
/// Must be explicitly released once no longer displayed; holding it keeps
/// the clip bytes alive.
#[derive(Debug, Clone)]
pub struct PreviewHandle {
    id: String,
    data: Arc<Mutex<Option<Bytes>>>,
}

impl PreviewHandle {
    pub fn new(blob: Bytes) -> Self {
        Self {
            id: format!("local-{}", Uuid::new_v4()),
            data: Arc::new(Mutex::new(Some(blob))),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The clip bytes, if not yet revoked.
    pub fn bytes(&self) -> Option<Bytes> {
        match self.data.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Release the underlying bytes. Idempotent.
    pub fn revoke(&self) {
        match self.data.lock() {
            Ok(mut guard) => {
                guard.take();
            }
            Err(poisoned) => {
                warn!("Preview handle mutex was poisoned during revoke");
                poisoned.into_inner().take();
            }
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.bytes().is_none()
    }
}

/// One locally recorded clip produced by a single take.
///
/// Never mutated after creation; handed to the upload manager exactly once.
#[derive(Debug, Clone)]
pub struct Capture {
    /// Sequence number within the session, contiguous from 0
    pub index: u32,
    /// Raw media bytes
    pub blob: Bytes,
    /// Negotiated container type of the blob
    pub mime_type: String,
    /// Handle for immediate local playback
    pub preview: PreviewHandle,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a capture engine operation, consumed by the Director over a
/// single channel.
#[derive(Debug)]
pub enum CaptureEvent {
    /// A take finished and produced a clip
    Produced(Capture),
    /// The media stream could not be started
    StartFailed(CaptureError),
}

/// Errors that can occur during capture
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("No media stream available")]
    NoStream,

    #[error("Media source error: {0}")]
    Source(String),
}
