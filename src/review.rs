//! Review and completion rules
//!
//! Pure decision logic for the review phase: how many clips a session
//! still owes, whether the set is submittable, how large a re-record
//! round may be, and when leaving the studio deserves a warning.

use crate::director::StudioState;
use tracing::debug;

/// Verdict on a submission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionDecision {
    /// The set meets the target and every upload settled
    Ready,
    /// Fewer clips than the target; partial submission needs explicit intent
    /// and is never auto-blocked
    Incomplete { missing: u32 },
    /// Uploads still in flight or in error; settle or delete them first
    UploadsPending,
    /// Nothing to submit at all
    EmptySet,
}

/// Tracks the clip target for one studio session.
///
/// The target is pinned when the session enters review, so deleting a clip
/// afterwards raises the missing count instead of silently shrinking the
/// goal. Sessions restored from before the pin existed fall back to
/// whichever is larger, the configured count or what is already there, so
/// a restored over-target session is never asked to delete clips.
#[derive(Debug, Clone)]
pub struct ReviewController {
    configured: u32,
    entry_target: Option<u32>,
}

impl ReviewController {
    pub fn new(configured: u32) -> Self {
        Self {
            configured,
            entry_target: None,
        }
    }

    /// Pin the target at review entry. Later deletions count against it.
    pub fn pin_target(&mut self, target: u32) {
        debug!(target, "Review target pinned");
        self.entry_target = Some(target);
    }

    /// Forget the pin, for a session reset after submission or cancel.
    pub fn reset(&mut self) {
        self.entry_target = None;
    }

    /// The number of clips this session owes.
    pub fn target_count(&self, current: u32) -> u32 {
        match self.entry_target {
            Some(target) => target,
            None => self.configured.max(current),
        }
    }

    /// How many clips are still missing against the target.
    pub fn missing_count(&self, current: u32) -> u32 {
        self.target_count(current).saturating_sub(current)
    }

    /// Decide whether a set of `current` clips is submittable.
    ///
    /// `all_settled` means every upload in the set reached its terminal
    /// success state.
    pub fn decide(&self, current: u32, all_settled: bool) -> SubmissionDecision {
        if current == 0 {
            return SubmissionDecision::EmptySet;
        }
        if !all_settled {
            return SubmissionDecision::UploadsPending;
        }
        let missing = self.missing_count(current);
        if missing > 0 {
            SubmissionDecision::Incomplete { missing }
        } else {
            SubmissionDecision::Ready
        }
    }

    /// Clamp a requested re-record round to what is actually missing.
    /// Returns 0 when nothing is missing, which callers treat as a no-op.
    pub fn rerecord_count(&self, requested: u32, current: u32) -> u32 {
        requested.min(self.missing_count(current))
    }
}

/// Whether abandoning the studio now would lose work worth warning about.
///
/// Before anything is recorded and after submission there is nothing to
/// lose; everywhere else, unconfirmed clips warrant a prompt.
pub fn should_warn_on_exit(state: StudioState, recording_count: u32) -> bool {
    if recording_count == 0 {
        return false;
    }
    !matches!(state, StudioState::Brief | StudioState::Submitted)
}
