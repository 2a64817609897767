//! Track state aggregator: one coarse status per track.
//!
//! Combines the four per-stage [`TrackQueueStatus`] values into a single
//! [`TrackStatus`] used for display and plan-level rollups. Precedence
//! matters: `ignored` and `complete` are checked after (and therefore
//! override) `error` and `running`, because a fully-handled track must not
//! be reported as running merely because an earlier stage's marker is
//! technically "done".

use super::{QueueEngine, TrackQueueStatus};
use crate::marker::{MarkerKey, MarkerKind, Stage};
use crate::plan::{BackupPlan, TrackPlan};

/// Coarse rollup of a track's four stage statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStatus {
    Complete,
    Running,
    Error,
    Ignored,
    Ready,
}

impl TrackStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackStatus::Complete => "complete",
            TrackStatus::Running => "running",
            TrackStatus::Error => "error",
            TrackStatus::Ignored => "ignored",
            TrackStatus::Ready => "ready",
        }
    }
}

impl std::fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// The four resolved stage statuses plus their rollup.
#[derive(Debug, Clone)]
pub struct TrackState {
    pub extract: TrackQueueStatus,
    pub transcode: TrackQueueStatus,
    pub review: TrackQueueStatus,
    pub copy: TrackQueueStatus,
    pub status: TrackStatus,
}

impl TrackState {
    /// Stage statuses in pipeline order, paired with their stage.
    pub fn stages(&self) -> [(Stage, TrackQueueStatus); 4] {
        [
            (Stage::Extract, self.extract),
            (Stage::Transcode, self.transcode),
            (Stage::Review, self.review),
            (Stage::Copy, self.copy),
        ]
    }
}

impl QueueEngine {
    /// Resolves all four stage statuses for a track and rolls them up.
    pub async fn track_state(&self, plan: &BackupPlan, track: &TrackPlan) -> TrackState {
        let extract = self.queue_status(plan, track, Stage::Extract).await;
        let transcode = self.queue_status(plan, track, Stage::Transcode).await;
        let review = self.queue_status(plan, track, Stage::Review).await;
        let copy = self.queue_status(plan, track, Stage::Copy).await;

        let all = [extract, transcode, review, copy];
        let is_complete = all
            .iter()
            .all(|s| matches!(s, TrackQueueStatus::Done | TrackQueueStatus::Ineligible));
        let is_error = all.contains(&TrackQueueStatus::Error);
        let is_started = all
            .iter()
            .any(|s| matches!(s, TrackQueueStatus::Done | TrackQueueStatus::Running));

        let ignored_key = MarkerKey::new(
            plan.disc_id.clone(),
            track.track_number,
            Stage::Review,
            MarkerKind::Ignored,
        );
        let is_ignored = self.markers().present(&ignored_key).await.unwrap_or(false);

        // Last assignment wins; ordering encodes precedence.
        let mut status = TrackStatus::Ready;
        if is_started {
            status = TrackStatus::Running;
        }
        if is_error {
            status = TrackStatus::Error;
        }
        if is_complete {
            status = TrackStatus::Complete;
        }
        if is_ignored {
            status = TrackStatus::Ignored;
        }

        TrackState {
            extract,
            transcode,
            review,
            copy,
            status,
        }
    }
}
