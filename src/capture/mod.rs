//! Capture engine
//!
//! Owns the exclusive media stream, buffers sub-second flushes of the
//! active take and finalizes each take into an addressable `Capture` with
//! a contiguous sequence index. Outcomes are reported as `CaptureEvent`s
//! over a single channel so the Director stays decoupled from low-level
//! media callbacks.

mod types;

pub use types::{
    Capture, CaptureError, CaptureEvent, CaptureMetadata, ChunkSource, MediaChunk, MetadataSlot,
    PreviewHandle, SourceInfo,
};

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Container preference order, most preferred first.
const MIME_PREFERENCE: [&str; 3] = ["video/webm;codecs=vp9", "video/webm", "video/mp4"];

/// Last-resort container when the source declares nothing usable.
const FALLBACK_MIME: &str = "video/mp4";

/// Pick the preferred container type among those the source supports.
pub fn negotiate_mime_type(supported: &[String]) -> String {
    MIME_PREFERENCE
        .iter()
        .find(|preferred| supported.iter().any(|s| s == *preferred))
        .map(|s| s.to_string())
        .unwrap_or_else(|| FALLBACK_MIME.to_string())
}

struct ActiveTake {
    buffer: Arc<Mutex<Vec<Bytes>>>,
    drain: JoinHandle<()>,
    mime_type: String,
}

/// Capture engine driving a single exclusive media stream.
///
/// Captures form an ordered, append-only sequence; they are never
/// reordered or merged, and indices are assigned monotonically at
/// creation.
pub struct CaptureEngine<S: ChunkSource> {
    source: S,
    flush_interval: Duration,
    event_tx: mpsc::UnboundedSender<CaptureEvent>,
    metadata: MetadataSlot,
    next_index: u32,
    active: Option<ActiveTake>,
    produced: Vec<Capture>,
}

impl<S: ChunkSource> CaptureEngine<S> {
    /// Create an engine over the given source.
    ///
    /// Returns the engine together with the receiver for capture outcomes.
    pub fn new(
        source: S,
        flush_interval: Duration,
        metadata: MetadataSlot,
    ) -> (Self, mpsc::UnboundedReceiver<CaptureEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                source,
                flush_interval,
                event_tx,
                metadata,
                next_index: 0,
                active: None,
                produced: Vec::new(),
            },
            event_rx,
        )
    }

    /// Begin writing the active media stream into an in-memory buffer.
    ///
    /// Fails silently when no stream is available: the failure is logged
    /// and reported as a `StartFailed` event, and the caller observes no
    /// new capture.
    pub fn start_recording(&mut self) {
        if self.active.is_some() {
            warn!("start_recording called while a take is active, ignoring");
            return;
        }

        let mime_type = negotiate_mime_type(&self.source.supported_mime_types());

        let chunk_rx = match self.source.start(self.flush_interval) {
            Ok(rx) => rx,
            Err(e) => {
                error!("Failed to start media stream: {}", e);
                let _ = self.event_tx.send(CaptureEvent::StartFailed(e));
                return;
            }
        };

        self.snapshot_metadata(&mime_type);

        let buffer: Arc<Mutex<Vec<Bytes>>> = Arc::new(Mutex::new(Vec::new()));
        let buffer_task = buffer.clone();
        let drain = tokio::spawn(async move {
            let mut chunk_rx = chunk_rx;
            while let Some(chunk) = chunk_rx.recv().await {
                if chunk.data.is_empty() {
                    continue;
                }
                if let Ok(mut guard) = buffer_task.lock() {
                    guard.push(chunk.data);
                }
            }
        });

        self.active = Some(ActiveTake {
            buffer,
            drain,
            mime_type,
        });
        info!("Recording started (take index {})", self.next_index);
    }

    /// Finalize the buffered take into a `Capture`.
    ///
    /// A no-op when not recording. The produced capture is appended to the
    /// engine's sequence and also emitted as a `Produced` event.
    pub async fn stop_recording(&mut self) -> Option<Capture> {
        let take = self.active.take()?;
        self.source.stop();
        // The source closed its sender; the drain task ends once the
        // remaining flushed chunks are consumed.
        if take.drain.await.is_err() {
            warn!("Capture drain task did not shut down cleanly");
        }

        let chunks = match take.buffer.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };

        if chunks.is_empty() {
            warn!("Take produced no media data, discarding");
            return None;
        }

        let mut blob = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
        for chunk in &chunks {
            blob.extend_from_slice(chunk);
        }
        let blob = blob.freeze();

        let capture = Capture {
            index: self.next_index,
            preview: PreviewHandle::new(blob.clone()),
            mime_type: take.mime_type,
            blob,
            created_at: Utc::now(),
        };
        self.next_index += 1;
        self.produced.push(capture.clone());

        info!(
            index = capture.index,
            bytes = capture.blob.len(),
            "Capture produced"
        );
        let _ = self.event_tx.send(CaptureEvent::Produced(capture.clone()));
        Some(capture)
    }

    /// Stop the active take immediately, discarding its buffer.
    ///
    /// Used on cancellation: no capture is produced and no index consumed.
    pub fn abort_recording(&mut self) {
        if let Some(take) = self.active.take() {
            self.source.stop();
            take.drain.abort();
            info!("Active take aborted");
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// All captures produced this session, in index order.
    pub fn captures(&self) -> &[Capture] {
        &self.produced
    }

    /// Continue the capture sequence at the given index.
    ///
    /// Used when a session resumes with recordings already on the server:
    /// new takes must not reuse the indices those recordings occupied.
    pub fn resume_sequence(&mut self, next_index: u32) {
        self.next_index = self.next_index.max(next_index);
    }

    /// Release every retained preview and reset the sequence.
    pub fn clear_captures(&mut self) {
        for capture in &self.produced {
            capture.preview.revoke();
        }
        self.produced.clear();
        self.next_index = 0;
    }

    /// Record track properties once, for the first upload request.
    fn snapshot_metadata(&self, mime_type: &str) {
        let Ok(mut slot) = self.metadata.lock() else {
            return;
        };
        if slot.is_some() {
            return;
        }
        let info = self.source.info();
        *slot = Some(CaptureMetadata {
            fps: info.fps,
            width: info.width,
            height: info.height,
            device_label: info.device_label,
            browser: Some(format!("signstudio/{}", env!("CARGO_PKG_VERSION"))),
            mime_type: Some(mime_type.to_string()),
            user_agent: Some(format!(
                "signstudio/{} ({})",
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS
            )),
        });
    }
}

/// Deterministic chunk source for the headless driver and tests.
///
/// Emits a fixed payload at every flush interval for as long as the
/// stream is running.
pub struct SyntheticSource {
    info: SourceInfo,
    payload: Bytes,
    mime_types: Vec<String>,
    running: Arc<AtomicBool>,
    fail_start: bool,
}

impl SyntheticSource {
    pub fn new() -> Self {
        Self {
            info: SourceInfo {
                width: Some(1280),
                height: Some(720),
                fps: Some(30.0),
                device_label: Some("synthetic".into()),
            },
            payload: Bytes::from_static(&[0u8; 256]),
            mime_types: vec!["video/webm;codecs=vp9".into(), "video/webm".into()],
            running: Arc::new(AtomicBool::new(false)),
            fail_start: false,
        }
    }

    /// A source whose stream never becomes available.
    pub fn unavailable() -> Self {
        Self {
            fail_start: true,
            ..Self::new()
        }
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkSource for SyntheticSource {
    fn info(&self) -> SourceInfo {
        self.info.clone()
    }

    fn supported_mime_types(&self) -> Vec<String> {
        self.mime_types.clone()
    }

    fn start(
        &mut self,
        flush_interval: Duration,
    ) -> Result<mpsc::UnboundedReceiver<MediaChunk>, CaptureError> {
        if self.fail_start {
            return Err(CaptureError::NoStream);
        }
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let payload = self.payload.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(flush_interval);
            loop {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                if tx
                    .send(MediaChunk {
                        data: payload.clone(),
                    })
                    .is_err()
                {
                    break;
                }
            }
        });
        Ok(rx)
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
