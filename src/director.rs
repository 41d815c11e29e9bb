//! Recording director
//!
//! The state machine sequencing one collection session:
//! countdown -> record -> rest, repeated until the repetition target is
//! reached, then review. Transitions are pure tick functions so the
//! timer logic stays testable; the async run loop owns the tick sources
//! and drops them on every state exit so stale callbacks can never fire
//! into a new state.

use crate::capture::{Capture, CaptureEngine, CaptureError, CaptureEvent, ChunkSource};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval};
use tracing::{info, warn};

/// Studio lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudioState {
    Brief,
    Countdown,
    Recording,
    Resting,
    Complete,
    Submitted,
}

impl fmt::Display for StudioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StudioState::Brief => "brief",
            StudioState::Countdown => "countdown",
            StudioState::Recording => "recording",
            StudioState::Resting => "resting",
            StudioState::Complete => "complete",
            StudioState::Submitted => "submitted",
        };
        write!(f, "{}", name)
    }
}

/// Timer parameters for one recording cycle.
#[derive(Debug, Clone)]
pub struct DirectorConfig {
    /// Fixed duration of a single take
    pub take_duration: Duration,
    /// Pause between takes, in whole seconds
    pub rest_secs: u32,
    /// Lead-in countdown, in whole seconds
    pub countdown_secs: u32,
    /// Recording timer granularity
    pub recording_tick: Duration,
}

/// Requests arriving from outside the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectorCommand {
    /// Force the lead-in countdown to zero
    SkipCountdown,
    /// Abandon the session
    Cancel,
}

/// How a run loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectorOutcome {
    /// All repetitions captured; state is `Complete`
    Completed,
    /// Cancelled externally; any active take was aborted
    Cancelled,
}

/// Unrecoverable director failures
#[derive(Debug, thiserror::Error)]
pub enum DirectorError {
    /// The media stream could not be started. Hard stop, no auto-retry.
    #[error("Capture unavailable: {0}")]
    CaptureUnavailable(#[from] CaptureError),
}

/// Engine side effect requested by a tick transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickAction {
    None,
    StartCapture,
    StopCapture,
}

/// The state machine sequencing countdown/record/rest cycles.
pub struct Director {
    config: DirectorConfig,
    state: StudioState,
    /// Repetition target for the current cycle
    target: u32,
    /// 1-indexed, never exceeds `target`
    current_rep: u32,
    countdown: u32,
    recording_elapsed: Duration,
    rest_remaining: u32,
}

impl Director {
    pub fn new(config: DirectorConfig) -> Self {
        let countdown = config.countdown_secs;
        Self {
            config,
            state: StudioState::Brief,
            target: 0,
            current_rep: 1,
            countdown,
            recording_elapsed: Duration::ZERO,
            rest_remaining: 0,
        }
    }

    pub fn state(&self) -> StudioState {
        self.state
    }

    pub fn current_rep(&self) -> u32 {
        self.current_rep
    }

    pub fn target(&self) -> u32 {
        self.target
    }

    /// Seconds left on the lead-in countdown.
    pub fn countdown(&self) -> u32 {
        self.countdown
    }

    /// Elapsed time of the active take.
    pub fn recording_elapsed(&self) -> Duration {
        self.recording_elapsed
    }

    pub fn rest_remaining(&self) -> u32 {
        self.rest_remaining
    }

    /// User-triggered entry: `brief -> countdown` with the full lead time.
    pub fn enter_studio(&mut self, target: u32) {
        debug_assert!(target >= 1);
        self.state = StudioState::Countdown;
        self.target = target;
        self.current_rep = 1;
        self.countdown = self.config.countdown_secs;
        self.recording_elapsed = Duration::ZERO;
        info!(target, "Entering studio");
    }

    /// Re-enter at `countdown` for a reduced number of additional takes,
    /// layered onto recordings the user kept.
    pub fn begin_rerecord(&mut self, additional: u32) {
        debug_assert!(additional >= 1);
        self.enter_studio(additional);
        info!(additional, "Re-recording missing takes");
    }

    /// Jump straight to review, used when a prior session is restored.
    pub fn resume_complete(&mut self) {
        self.state = StudioState::Complete;
    }

    /// Final transition once confirmation succeeded.
    pub fn mark_submitted(&mut self) {
        self.state = StudioState::Submitted;
    }

    /// Force the countdown to zero. Starts the first take immediately.
    fn skip_countdown(&mut self) -> TickAction {
        if self.state != StudioState::Countdown {
            return TickAction::None;
        }
        self.countdown = 0;
        self.begin_take()
    }

    fn begin_take(&mut self) -> TickAction {
        self.state = StudioState::Recording;
        self.recording_elapsed = Duration::ZERO;
        TickAction::StartCapture
    }

    /// One-second countdown tick.
    fn on_countdown_tick(&mut self) -> TickAction {
        if self.state != StudioState::Countdown {
            return TickAction::None;
        }
        self.countdown = self.countdown.saturating_sub(1);
        if self.countdown == 0 {
            self.begin_take()
        } else {
            TickAction::None
        }
    }

    /// Sub-second recording tick.
    fn on_recording_tick(&mut self) -> TickAction {
        if self.state != StudioState::Recording {
            return TickAction::None;
        }
        self.recording_elapsed += self.config.recording_tick;
        if self.recording_elapsed < self.config.take_duration {
            return TickAction::None;
        }

        if self.current_rep < self.target {
            self.state = StudioState::Resting;
            self.rest_remaining = self.config.rest_secs;
        } else {
            self.state = StudioState::Complete;
        }
        TickAction::StopCapture
    }

    /// One-second rest tick.
    fn on_rest_tick(&mut self) -> TickAction {
        if self.state != StudioState::Resting {
            return TickAction::None;
        }
        self.rest_remaining = self.rest_remaining.saturating_sub(1);
        if self.rest_remaining > 0 {
            return TickAction::None;
        }

        if self.current_rep < self.target {
            self.current_rep += 1;
            self.begin_take()
        } else {
            self.state = StudioState::Complete;
            TickAction::None
        }
    }

    fn tick(&mut self) -> TickAction {
        match self.state {
            StudioState::Countdown => self.on_countdown_tick(),
            StudioState::Recording => self.on_recording_tick(),
            StudioState::Resting => self.on_rest_tick(),
            _ => TickAction::None,
        }
    }

    /// Tick source for the current state. Re-created on every state
    /// change; the previous one is dropped with its pending callbacks.
    fn ticker(&self) -> Interval {
        let period = match self.state {
            StudioState::Recording => self.config.recording_tick,
            _ => Duration::from_secs(1),
        };
        interval_at(Instant::now() + period, period)
    }

    /// Drive the cycle to `Complete`, emitting one capture per repetition.
    ///
    /// Must be called in `Countdown` (after `enter_studio` or
    /// `begin_rerecord`). Captures are forwarded to `captures` in index
    /// order; a capture-start failure terminates the run with an error.
    pub async fn run<S: ChunkSource>(
        &mut self,
        engine: &mut CaptureEngine<S>,
        events: &mut mpsc::UnboundedReceiver<CaptureEvent>,
        commands: &mut mpsc::UnboundedReceiver<DirectorCommand>,
        captures: &mpsc::UnboundedSender<Capture>,
    ) -> Result<DirectorOutcome, DirectorError> {
        debug_assert_eq!(self.state, StudioState::Countdown);
        let mut ticker = self.ticker();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let before = self.state;
                    let action = self.tick();
                    self.apply(action, engine).await;
                    if self.state != before {
                        info!(from = %before, to = %self.state, "Studio state changed");
                        ticker = self.ticker();
                    }
                }
                Some(command) = commands.recv() => match command {
                    DirectorCommand::SkipCountdown => {
                        let before = self.state;
                        let action = self.skip_countdown();
                        self.apply(action, engine).await;
                        if self.state != before {
                            ticker = self.ticker();
                        }
                    }
                    DirectorCommand::Cancel => {
                        engine.abort_recording();
                        info!("Session cancelled");
                        return Ok(DirectorOutcome::Cancelled);
                    }
                },
                Some(event) = events.recv() => match event {
                    CaptureEvent::Produced(capture) => {
                        let _ = captures.send(capture);
                    }
                    CaptureEvent::StartFailed(e) => {
                        warn!("Capture start failed, stopping session: {}", e);
                        return Err(DirectorError::CaptureUnavailable(e));
                    }
                },
            }

            if self.state == StudioState::Complete {
                // Drain any capture event emitted by the final stop
                while let Ok(event) = events.try_recv() {
                    match event {
                        CaptureEvent::Produced(capture) => {
                            let _ = captures.send(capture);
                        }
                        CaptureEvent::StartFailed(e) => {
                            return Err(DirectorError::CaptureUnavailable(e));
                        }
                    }
                }
                return Ok(DirectorOutcome::Completed);
            }
        }
    }

    async fn apply<S: ChunkSource>(&mut self, action: TickAction, engine: &mut CaptureEngine<S>) {
        match action {
            TickAction::None => {}
            TickAction::StartCapture => engine.start_recording(),
            TickAction::StopCapture => {
                engine.stop_recording().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureEngine, MetadataSlot, SyntheticSource};
    use std::sync::{Arc, Mutex};

    fn test_config() -> DirectorConfig {
        DirectorConfig {
            take_duration: Duration::from_millis(300),
            rest_secs: 1,
            countdown_secs: 2,
            recording_tick: Duration::from_millis(100),
        }
    }

    fn drive_to_complete(director: &mut Director) -> Vec<TickAction> {
        let mut actions = Vec::new();
        for _ in 0..10_000 {
            if director.state() == StudioState::Complete {
                return actions;
            }
            let action = director.tick();
            if action != TickAction::None {
                actions.push(action);
            }
        }
        panic!("director did not complete");
    }

    #[test]
    fn test_enter_studio_resets_countdown() {
        let mut director = Director::new(test_config());
        assert_eq!(director.state(), StudioState::Brief);

        director.enter_studio(5);
        assert_eq!(director.state(), StudioState::Countdown);
        assert_eq!(director.countdown(), 2);
        assert_eq!(director.current_rep(), 1);
    }

    #[test]
    fn test_cycle_produces_one_start_stop_pair_per_rep() {
        let mut director = Director::new(test_config());
        director.enter_studio(5);

        let actions = drive_to_complete(&mut director);
        let starts = actions
            .iter()
            .filter(|a| **a == TickAction::StartCapture)
            .count();
        let stops = actions
            .iter()
            .filter(|a| **a == TickAction::StopCapture)
            .count();
        assert_eq!(starts, 5);
        assert_eq!(stops, 5);
        assert_eq!(director.current_rep(), 5);
        assert_eq!(director.state(), StudioState::Complete);
    }

    #[test]
    fn test_single_rep_skips_rest() {
        let mut director = Director::new(test_config());
        director.enter_studio(1);

        let actions = drive_to_complete(&mut director);
        assert_eq!(
            actions,
            vec![TickAction::StartCapture, TickAction::StopCapture]
        );
    }

    #[test]
    fn test_skip_countdown_starts_take_immediately() {
        let mut director = Director::new(test_config());
        director.enter_studio(3);

        assert_eq!(director.skip_countdown(), TickAction::StartCapture);
        assert_eq!(director.state(), StudioState::Recording);
        assert_eq!(director.countdown(), 0);
    }

    #[test]
    fn test_skip_countdown_outside_countdown_is_noop() {
        let mut director = Director::new(test_config());
        assert_eq!(director.skip_countdown(), TickAction::None);
        assert_eq!(director.state(), StudioState::Brief);
    }

    #[test]
    fn test_recording_transitions_to_rest_then_next_rep() {
        let mut director = Director::new(test_config());
        director.enter_studio(2);
        director.skip_countdown();

        // 300ms take at 100ms ticks
        assert_eq!(director.on_recording_tick(), TickAction::None);
        assert_eq!(director.on_recording_tick(), TickAction::None);
        assert_eq!(director.on_recording_tick(), TickAction::StopCapture);
        assert_eq!(director.state(), StudioState::Resting);
        assert_eq!(director.rest_remaining(), 1);

        assert_eq!(director.on_rest_tick(), TickAction::StartCapture);
        assert_eq!(director.state(), StudioState::Recording);
        assert_eq!(director.current_rep(), 2);
    }

    #[test]
    fn test_rerecord_reduced_target() {
        let mut director = Director::new(test_config());
        director.enter_studio(5);
        drive_to_complete(&mut director);

        director.begin_rerecord(2);
        assert_eq!(director.state(), StudioState::Countdown);
        assert_eq!(director.target(), 2);

        let actions = drive_to_complete(&mut director);
        let starts = actions
            .iter()
            .filter(|a| **a == TickAction::StartCapture)
            .count();
        assert_eq!(starts, 2);
    }

    fn fast_engine(
        source: SyntheticSource,
    ) -> (
        CaptureEngine<SyntheticSource>,
        mpsc::UnboundedReceiver<CaptureEvent>,
    ) {
        let slot: MetadataSlot = Arc::new(Mutex::new(None));
        CaptureEngine::new(source, Duration::from_millis(10), slot)
    }

    #[tokio::test]
    async fn test_run_emits_captures_in_index_order() {
        let config = DirectorConfig {
            take_duration: Duration::from_millis(100),
            rest_secs: 1,
            countdown_secs: 1,
            recording_tick: Duration::from_millis(20),
        };
        let mut director = Director::new(config);
        director.enter_studio(3);

        let (mut engine, mut events) = fast_engine(SyntheticSource::new());
        let (_cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
        let (capture_tx, mut capture_rx) = mpsc::unbounded_channel();

        let outcome = director
            .run(&mut engine, &mut events, &mut cmd_rx, &capture_tx)
            .await
            .expect("run failed");
        assert_eq!(outcome, DirectorOutcome::Completed);
        assert_eq!(director.state(), StudioState::Complete);

        let mut indices = Vec::new();
        while let Ok(capture) = capture_rx.try_recv() {
            indices.push(capture.index);
        }
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_run_hard_stops_when_capture_unavailable() {
        let config = DirectorConfig {
            take_duration: Duration::from_millis(100),
            rest_secs: 1,
            countdown_secs: 1,
            recording_tick: Duration::from_millis(20),
        };
        let mut director = Director::new(config);
        director.enter_studio(2);

        let (mut engine, mut events) = fast_engine(SyntheticSource::unavailable());
        let (_cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
        let (capture_tx, mut capture_rx) = mpsc::unbounded_channel();

        let result = director
            .run(&mut engine, &mut events, &mut cmd_rx, &capture_tx)
            .await;
        assert!(matches!(
            result,
            Err(DirectorError::CaptureUnavailable(CaptureError::NoStream))
        ));
        assert!(capture_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_run_cancel_aborts_active_take() {
        let config = DirectorConfig {
            take_duration: Duration::from_secs(60),
            rest_secs: 1,
            countdown_secs: 1,
            recording_tick: Duration::from_millis(20),
        };
        let mut director = Director::new(config);
        director.enter_studio(2);

        let (mut engine, mut events) = fast_engine(SyntheticSource::new());
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
        let (capture_tx, mut capture_rx) = mpsc::unbounded_channel();

        cmd_tx.send(DirectorCommand::SkipCountdown).unwrap();
        let canceller = cmd_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.send(DirectorCommand::Cancel).unwrap();
        });

        let outcome = director
            .run(&mut engine, &mut events, &mut cmd_rx, &capture_tx)
            .await
            .expect("run failed");
        assert_eq!(outcome, DirectorOutcome::Cancelled);
        assert!(!engine.is_recording());
        assert!(capture_rx.try_recv().is_err());
    }
}
