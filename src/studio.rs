//! Studio session orchestration
//!
//! Ties the Director, capture engine, upload manager, review rules and
//! the durable snapshot together for one assignment. The session owns
//! the capture dispatch loop: every produced clip is handed to the
//! upload manager exactly once, keyed by its sequence index, while the
//! recording cycle keeps running.

use crate::capture::{Capture, CaptureEngine, CaptureEvent, ChunkSource, MetadataSlot};
use crate::config::StudioParams;
use crate::director::{
    Director, DirectorCommand, DirectorConfig, DirectorError, DirectorOutcome, StudioState,
};
use crate::review::{should_warn_on_exit, ReviewController, SubmissionDecision};
use crate::session::{SessionSnapshot, SessionStore};
use crate::upload::{lock, StreamingRecording, UploadManager};
use crate::api::StudioApi;
use crate::error::ApiError;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Result of a submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Confirmed; the session is over
    Submitted { count: u32 },
    /// Below target and partial submission was not requested
    Incomplete { missing: u32 },
    /// Uploads still unsettled; nothing was sent
    UploadsPending,
    /// No recordings exist
    NothingToSubmit,
}

/// One assignment's collection session, from brief to submission.
pub struct StudioSession<S: ChunkSource> {
    slug: String,
    params: StudioParams,
    director: Director,
    engine: CaptureEngine<S>,
    events: mpsc::UnboundedReceiver<CaptureEvent>,
    command_tx: mpsc::UnboundedSender<DirectorCommand>,
    command_rx: mpsc::UnboundedReceiver<DirectorCommand>,
    manager: Arc<UploadManager>,
    review: ReviewController,
    store: SessionStore,
    /// Indexes already dispatched to the upload manager; the manager does
    /// not deduplicate by index, so dispatch must
    uploaded_indexes: Arc<Mutex<HashSet<u32>>>,
}

impl<S: ChunkSource> StudioSession<S> {
    pub fn new(
        slug: impl Into<String>,
        params: StudioParams,
        source: S,
        api: Arc<dyn StudioApi>,
        assignment_id: i64,
        store: SessionStore,
    ) -> Self {
        let metadata: MetadataSlot = Arc::new(Mutex::new(None));
        let (engine, events) =
            CaptureEngine::new(source, params.recording_tick(), metadata.clone());
        let manager = Arc::new(UploadManager::new(
            api,
            Some(assignment_id),
            metadata,
            params.max_concurrent_uploads,
        ));
        let director = Director::new(DirectorConfig {
            take_duration: params.take_duration(),
            rest_secs: params.rest_secs,
            countdown_secs: params.countdown_secs,
            recording_tick: params.recording_tick(),
        });
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let review = ReviewController::new(params.repetitions);

        Self {
            slug: slug.into(),
            params,
            director,
            engine,
            events,
            command_tx,
            command_rx,
            manager,
            review,
            store,
            uploaded_indexes: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn state(&self) -> StudioState {
        self.director.state()
    }

    /// Sender for skip-countdown and cancel requests into a running cycle.
    pub fn commands(&self) -> mpsc::UnboundedSender<DirectorCommand> {
        self.command_tx.clone()
    }

    /// Current upload records, in insertion order.
    pub fn recordings(&self) -> Vec<StreamingRecording> {
        self.manager.recordings()
    }

    pub fn overall_progress(&self) -> u8 {
        self.manager.overall_progress()
    }

    pub fn missing_count(&self) -> u32 {
        self.review.missing_count(self.manager.len() as u32)
    }

    /// Whether abandoning the session now deserves a warning.
    pub fn exit_warning_needed(&self) -> bool {
        should_warn_on_exit(self.state(), self.manager.len() as u32)
    }

    /// Attempt to resume a prior session for this slug.
    ///
    /// A valid snapshot yields a backend listing of its recordings; on
    /// success the session jumps straight to review. Any failure, and an
    /// empty listing, discards the snapshot and starts fresh.
    pub async fn try_restore(&mut self) -> bool {
        let Some(snapshot) = self.store.load(&self.slug) else {
            return false;
        };

        let records = match self.manager.api().my_recordings(&snapshot.recording_ids).await {
            Ok(records) => records,
            Err(e) => {
                warn!(slug = %self.slug, "Session restore fetch failed, starting fresh: {}", e);
                self.store.clear(&self.slug);
                return false;
            }
        };
        if records.is_empty() {
            self.store.clear(&self.slug);
            return false;
        }

        let count = records.len() as u32;
        self.manager.restore_recordings(records);
        {
            let mut uploaded = lock(&self.uploaded_indexes);
            uploaded.extend(0..count);
        }
        // New takes continue the sequence after the restored recordings,
        // otherwise a re-record round would collide with their indices
        self.engine.resume_sequence(count);
        self.director.resume_complete();
        info!(slug = %self.slug, count, "Session restored to review");
        true
    }

    /// Run the initial recording cycle: the full configured repetition
    /// count, ending in review with the target pinned.
    pub async fn run_recording_cycle(&mut self) -> Result<DirectorOutcome, DirectorError> {
        let target = self.params.repetitions;
        self.director.enter_studio(target);
        let outcome = self.drive_cycle().await?;
        if outcome == DirectorOutcome::Completed {
            self.review.pin_target(target);
            self.save_snapshot();
        }
        Ok(outcome)
    }

    /// Re-record only the missing takes. The requested count is clamped
    /// to the actual missing count; zero missing is a no-op.
    pub async fn rerecord_missing(
        &mut self,
        requested: u32,
    ) -> Result<DirectorOutcome, DirectorError> {
        let additional = self
            .review
            .rerecord_count(requested, self.manager.len() as u32);
        if additional == 0 {
            info!("Nothing missing, re-record skipped");
            self.director.resume_complete();
            return Ok(DirectorOutcome::Completed);
        }

        self.director.begin_rerecord(additional);
        let outcome = self.drive_cycle().await?;
        if outcome == DirectorOutcome::Completed {
            self.save_snapshot();
        }
        Ok(outcome)
    }

    /// Drive the Director to completion while streaming every produced
    /// capture into the upload manager.
    async fn drive_cycle(&mut self) -> Result<DirectorOutcome, DirectorError> {
        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        let dispatcher = self.spawn_dispatcher(capture_rx);

        let outcome = self
            .director
            .run(
                &mut self.engine,
                &mut self.events,
                &mut self.command_rx,
                &capture_tx,
            )
            .await;

        // Closing the capture channel lets the dispatcher settle every
        // upload it already accepted
        drop(capture_tx);
        if dispatcher.await.is_err() {
            warn!("Capture dispatcher did not shut down cleanly");
        }

        match outcome {
            Ok(DirectorOutcome::Cancelled) => {
                self.cleanup_cancelled().await;
                Ok(DirectorOutcome::Cancelled)
            }
            other => other,
        }
    }

    /// Dispatch loop: one upload per unseen capture index, uploads
    /// running concurrently under the manager's cap.
    fn spawn_dispatcher(
        &self,
        mut capture_rx: mpsc::UnboundedReceiver<Capture>,
    ) -> tokio::task::JoinHandle<()> {
        let manager = self.manager.clone();
        let uploaded_indexes = self.uploaded_indexes.clone();
        tokio::spawn(async move {
            let mut uploads = Vec::new();
            while let Some(capture) = capture_rx.recv().await {
                let fresh = lock(&uploaded_indexes).insert(capture.index);
                if !fresh {
                    warn!(index = capture.index, "Duplicate capture index, skipping upload");
                    continue;
                }
                let manager = manager.clone();
                uploads.push(tokio::spawn(async move {
                    manager
                        .upload_recording(capture.blob.clone(), &capture.mime_type, capture.index)
                        .await;
                }));
            }
            for upload in uploads {
                if upload.await.is_err() {
                    warn!("Upload task panicked");
                }
            }
        })
    }

    /// Submit the session's recordings as one batch confirmation.
    ///
    /// `allow_partial` carries the user's explicit choice to submit below
    /// the target; without it an incomplete set is reported, not sent.
    pub async fn submit(&mut self, allow_partial: bool) -> Result<SubmitOutcome, ApiError> {
        let current = self.manager.len() as u32;
        let all_settled = self.manager.all_completed() && !self.manager.is_uploading();

        match self.review.decide(current, all_settled) {
            SubmissionDecision::EmptySet => return Ok(SubmitOutcome::NothingToSubmit),
            SubmissionDecision::UploadsPending => return Ok(SubmitOutcome::UploadsPending),
            SubmissionDecision::Incomplete { missing } if !allow_partial => {
                return Ok(SubmitOutcome::Incomplete { missing });
            }
            SubmissionDecision::Incomplete { missing } => {
                info!(missing, "Submitting partial set at the user's request");
            }
            SubmissionDecision::Ready => {}
        }

        if !self.manager.confirm_all_recordings().await? {
            return Ok(SubmitOutcome::NothingToSubmit);
        }

        self.finish_session();
        self.director.mark_submitted();
        info!(slug = %self.slug, count = current, "Session submitted");
        Ok(SubmitOutcome::Submitted { count: current })
    }

    /// Cancel a session from outside a running cycle (review phase).
    pub async fn cancel(&mut self) {
        self.cleanup_cancelled().await;
    }

    /// Best-effort teardown after cancellation: delete every
    /// server-confirmed recording, then clear all local state. Partial
    /// backend failure is logged, never blocking.
    async fn cleanup_cancelled(&mut self) {
        for recording in self.manager.recordings() {
            if let Err(e) = self.manager.delete_recording(&recording.id).await {
                warn!(id = %recording.id, "Cleanup delete failed: {}", e);
            }
        }
        self.finish_session();
        info!(slug = %self.slug, "Session cancelled and cleaned up");
    }

    /// Drop all per-session state, leaving the session reusable.
    fn finish_session(&mut self) {
        self.engine.clear_captures();
        self.manager.clear_recordings();
        self.store.clear(&self.slug);
        self.review.reset();
        lock(&self.uploaded_indexes).clear();
    }

    /// Persist the review-phase snapshot for restore after interruption.
    /// Only written when something is actually worth restoring.
    fn save_snapshot(&self) {
        let recording_ids = self.manager.completed_ids();
        if recording_ids.is_empty() {
            return;
        }
        let snapshot = SessionSnapshot::new(recording_ids, self.state());
        if let Err(e) = self.store.save(&self.slug, &snapshot) {
            warn!(slug = %self.slug, "Failed to save session snapshot: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RecordingRecord;
    use crate::capture::SyntheticSource;
    use crate::upload::tests::MockStudioApi;
    use crate::upload::UploadStatus;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fast_params() -> StudioParams {
        StudioParams {
            repetitions: 2,
            take_duration_secs: 1,
            rest_secs: 1,
            countdown_secs: 1,
            recording_tick_ms: 50,
            max_concurrent_uploads: 3,
        }
    }

    fn session_with(
        api: MockStudioApi,
        params: StudioParams,
    ) -> (TempDir, Arc<MockStudioApi>, StudioSession<SyntheticSource>) {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::with_dir(dir.path().join("sessions"));
        let api = Arc::new(api);
        let session = StudioSession::new(
            "hello-sign",
            params,
            SyntheticSource::new(),
            api.clone(),
            42,
            store,
        );
        (dir, api, session)
    }

    fn snapshot_store(dir: &TempDir) -> SessionStore {
        SessionStore::with_dir(dir.path().join("sessions"))
    }

    #[tokio::test]
    async fn test_full_cycle_uploads_every_take() {
        let (dir, _api, mut session) = session_with(MockStudioApi::default(), fast_params());

        let outcome = session.run_recording_cycle().await.unwrap();
        assert_eq!(outcome, DirectorOutcome::Completed);
        assert_eq!(session.state(), StudioState::Complete);

        let recordings = session.recordings();
        assert_eq!(recordings.len(), 2);
        assert!(recordings
            .iter()
            .all(|r| r.status == UploadStatus::Completed));
        assert_eq!(session.overall_progress(), 100);
        assert_eq!(session.missing_count(), 0);

        // Review snapshot persisted for restore
        let saved = snapshot_store(&dir).load("hello-sign").unwrap();
        assert_eq!(saved.recording_ids.len(), 2);
        assert_eq!(saved.state, StudioState::Complete);
    }

    #[tokio::test]
    async fn test_submit_full_set() {
        let (dir, api, mut session) = session_with(MockStudioApi::default(), fast_params());
        session.run_recording_cycle().await.unwrap();

        let outcome = session.submit(false).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Submitted { count: 2 });
        assert_eq!(session.state(), StudioState::Submitted);
        assert!(session.recordings().is_empty());
        assert!(!session.exit_warning_needed());

        // One batch confirmation, snapshot cleared
        assert_eq!(lock(&api.confirms).len(), 1);
        assert!(snapshot_store(&dir).load("hello-sign").is_none());
    }

    #[tokio::test]
    async fn test_submit_empty_session() {
        let (_dir, _api, mut session) = session_with(MockStudioApi::default(), fast_params());
        assert_eq!(
            session.submit(false).await.unwrap(),
            SubmitOutcome::NothingToSubmit
        );
    }

    #[tokio::test]
    async fn test_delete_raises_missing_count_and_blocks_silent_partial() {
        let (_dir, _api, mut session) = session_with(MockStudioApi::default(), fast_params());
        session.run_recording_cycle().await.unwrap();

        let id = session.recordings()[0].id.clone();
        session.manager.delete_recording(&id).await.unwrap();
        assert_eq!(session.missing_count(), 1);

        // Without explicit partial intent submission reports the gap
        assert_eq!(
            session.submit(false).await.unwrap(),
            SubmitOutcome::Incomplete { missing: 1 }
        );
        // With it, the partial set goes through
        assert_eq!(
            session.submit(true).await.unwrap(),
            SubmitOutcome::Submitted { count: 1 }
        );
    }

    #[tokio::test]
    async fn test_rerecord_restores_full_set() {
        let (_dir, _api, mut session) = session_with(MockStudioApi::default(), fast_params());
        session.run_recording_cycle().await.unwrap();

        let id = session.recordings()[0].id.clone();
        session.manager.delete_recording(&id).await.unwrap();
        assert_eq!(session.missing_count(), 1);

        // Asking for more than is missing still records exactly one
        let outcome = session.rerecord_missing(5).await.unwrap();
        assert_eq!(outcome, DirectorOutcome::Completed);
        assert_eq!(session.recordings().len(), 2);
        assert_eq!(session.missing_count(), 0);
        assert_eq!(session.submit(false).await.unwrap(), SubmitOutcome::Submitted { count: 2 });
    }

    #[tokio::test]
    async fn test_rerecord_with_nothing_missing_is_noop() {
        let (_dir, _api, mut session) = session_with(MockStudioApi::default(), fast_params());
        session.run_recording_cycle().await.unwrap();

        let outcome = session.rerecord_missing(3).await.unwrap();
        assert_eq!(outcome, DirectorOutcome::Completed);
        assert_eq!(session.recordings().len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_mid_cycle_leaves_no_entries() {
        let mut params = fast_params();
        params.take_duration_secs = 60;
        let (dir, _api, mut session) = session_with(MockStudioApi::default(), params);

        let commands = session.commands();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = commands.send(DirectorCommand::Cancel);
        });

        let outcome = session.run_recording_cycle().await.unwrap();
        assert_eq!(outcome, DirectorOutcome::Cancelled);
        assert!(session.recordings().is_empty());
        assert!(snapshot_store(&dir).load("hello-sign").is_none());
    }

    #[tokio::test]
    async fn test_restore_jumps_to_review() {
        let api = MockStudioApi::default();
        lock(&api.restore_records).extend([
            RecordingRecord {
                id: "rec-a".into(),
                preview_url: None,
                s3_key: Some("recordings/a.webm".into()),
            },
            RecordingRecord {
                id: "rec-b".into(),
                preview_url: None,
                s3_key: Some("recordings/b.webm".into()),
            },
            RecordingRecord {
                id: "rec-c".into(),
                preview_url: None,
                s3_key: Some("recordings/c.webm".into()),
            },
        ]);
        let (dir, _api, mut session) = session_with(api, fast_params());
        snapshot_store(&dir)
            .save(
                "hello-sign",
                &SessionSnapshot::new(
                    vec!["rec-a".into(), "rec-b".into(), "rec-c".into()],
                    StudioState::Complete,
                ),
            )
            .unwrap();

        assert!(session.try_restore().await);
        assert_eq!(session.state(), StudioState::Complete);
        assert_eq!(session.recordings().len(), 3);
        // Restored over-target set owes nothing (legacy fallback target)
        assert_eq!(session.missing_count(), 0);
    }

    #[tokio::test]
    async fn test_rerecord_after_restore_uploads_missing_takes() {
        let api = MockStudioApi::default();
        lock(&api.restore_records).extend([
            RecordingRecord {
                id: "rec-a".into(),
                preview_url: None,
                s3_key: Some("recordings/a.webm".into()),
            },
            RecordingRecord {
                id: "rec-b".into(),
                preview_url: None,
                s3_key: Some("recordings/b.webm".into()),
            },
            RecordingRecord {
                id: "rec-c".into(),
                preview_url: None,
                s3_key: Some("recordings/c.webm".into()),
            },
        ]);
        let mut params = fast_params();
        params.repetitions = 5;
        let (dir, _api, mut session) = session_with(api, params);
        snapshot_store(&dir)
            .save(
                "hello-sign",
                &SessionSnapshot::new(
                    vec!["rec-a".into(), "rec-b".into(), "rec-c".into()],
                    StudioState::Complete,
                ),
            )
            .unwrap();

        assert!(session.try_restore().await);
        assert_eq!(session.missing_count(), 2);

        // New takes must land after the restored indices, not replace them
        let outcome = session.rerecord_missing(2).await.unwrap();
        assert_eq!(outcome, DirectorOutcome::Completed);
        assert_eq!(session.recordings().len(), 5);
        assert_eq!(session.missing_count(), 0);
        assert_eq!(
            session.submit(false).await.unwrap(),
            SubmitOutcome::Submitted { count: 5 }
        );
    }

    #[tokio::test]
    async fn test_restore_without_snapshot() {
        let (_dir, _api, mut session) = session_with(MockStudioApi::default(), fast_params());
        assert!(!session.try_restore().await);
        assert_eq!(session.state(), StudioState::Brief);
    }

    #[tokio::test]
    async fn test_restore_fetch_failure_discards_snapshot() {
        let api = MockStudioApi {
            fail_list: true,
            ..Default::default()
        };
        let (dir, _api, mut session) = session_with(api, fast_params());
        snapshot_store(&dir)
            .save(
                "hello-sign",
                &SessionSnapshot::new(vec!["rec-a".into()], StudioState::Complete),
            )
            .unwrap();

        assert!(!session.try_restore().await);
        assert_eq!(session.state(), StudioState::Brief);
        assert!(snapshot_store(&dir).load("hello-sign").is_none());
    }

    #[tokio::test]
    async fn test_empty_set_recovers_via_fresh_cycle() {
        let (_dir, _api, mut session) = session_with(MockStudioApi::default(), fast_params());
        session.run_recording_cycle().await.unwrap();

        // Delete everything while in review
        for recording in session.recordings() {
            session.manager.delete_recording(&recording.id).await.unwrap();
        }
        assert_eq!(
            session.submit(true).await.unwrap(),
            SubmitOutcome::NothingToSubmit
        );

        // The recovery path is a fresh cycle covering the whole target
        let outcome = session.rerecord_missing(2).await.unwrap();
        assert_eq!(outcome, DirectorOutcome::Completed);
        assert_eq!(session.recordings().len(), 2);
        assert_eq!(
            session.submit(false).await.unwrap(),
            SubmitOutcome::Submitted { count: 2 }
        );
    }

    #[tokio::test]
    async fn test_exit_warning_during_review() {
        let (_dir, _api, mut session) = session_with(MockStudioApi::default(), fast_params());
        assert!(!session.exit_warning_needed());

        session.run_recording_cycle().await.unwrap();
        assert!(session.exit_warning_needed());

        session.submit(false).await.unwrap();
        assert!(!session.exit_warning_needed());
    }
}
