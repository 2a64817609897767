//! Queue rule engine: per-stage readiness rules for the pipeline.
//!
//! For each of the four stages, a rule bundle of `eligible`, `done`,
//! `error`, `running`, and `ready` predicates over a (plan, track) pair,
//! evaluated against the marker store. The rules encode the dependency
//! graph between stages:
//!
//! ```text
//! extract ──► transcode ──┐
//!    │                    ├──► copy
//!    └──────► review ─────┘  (review only gates copy for TV plans)
//! ```
//!
//! Status resolution precedence is load-bearing: `ineligible`, then `done`,
//! then `error`, then `running`, then `ready`, else `blocked`. A track can
//! carry both a stale `running` marker (crashed process) and a fresh `done`
//! marker after recovery, and `done` must win.

mod state;

pub use state::{TrackState, TrackStatus};

use crate::marker::{MarkerError, MarkerKey, MarkerKind, MarkerStore, Stage};
use crate::plan::{BackupPlan, PlanType, TrackPlan};
use tracing::warn;

/// Resolved status of one (track, stage) pair. Derived fresh on every
/// query, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackQueueStatus {
    /// The stage does not apply to this track at all.
    Ineligible,
    /// Eligible, but an upstream dependency is not yet satisfied.
    Blocked,
    /// Eligible and all upstream dependencies are done.
    Ready,
    Running,
    Error,
    Done,
}

impl TrackQueueStatus {
    /// Status name for display.
    pub fn as_str(self) -> &'static str {
        match self {
            TrackQueueStatus::Ineligible => "ineligible",
            TrackQueueStatus::Blocked => "blocked",
            TrackQueueStatus::Ready => "ready",
            TrackQueueStatus::Running => "running",
            TrackQueueStatus::Error => "error",
            TrackQueueStatus::Done => "done",
        }
    }
}

impl std::fmt::Display for TrackQueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Evaluates queue rules against the marker store.
#[derive(Debug, Clone)]
pub struct QueueEngine {
    markers: MarkerStore,
}

impl QueueEngine {
    pub fn new(markers: MarkerStore) -> Self {
        Self { markers }
    }

    /// The underlying marker store.
    pub fn markers(&self) -> &MarkerStore {
        &self.markers
    }

    async fn marker_present(
        &self,
        plan: &BackupPlan,
        track: &TrackPlan,
        stage: Stage,
        kind: MarkerKind,
    ) -> Result<bool, MarkerError> {
        let key = MarkerKey::new(plan.disc_id.clone(), track.track_number, stage, kind);
        self.markers.present(&key).await
    }

    async fn review_ignored(
        &self,
        plan: &BackupPlan,
        track: &TrackPlan,
    ) -> Result<bool, MarkerError> {
        self.marker_present(plan, track, Stage::Review, MarkerKind::Ignored)
            .await
    }

    /// Whether the stage applies to this track at all, independent of
    /// progress.
    pub async fn eligible(
        &self,
        plan: &BackupPlan,
        track: &TrackPlan,
        stage: Stage,
    ) -> Result<bool, MarkerError> {
        if !track.extract {
            return Ok(false);
        }
        match stage {
            Stage::Extract => Ok(true),
            // Ignored tracks are not eligible for transcode or copy.
            Stage::Transcode | Stage::Copy => Ok(!self.review_ignored(plan, track).await?),
            Stage::Review => Ok(plan.plan_type == PlanType::Tv),
        }
    }

    /// Whether the stage has completed for this track.
    pub async fn done(
        &self,
        plan: &BackupPlan,
        track: &TrackPlan,
        stage: Stage,
    ) -> Result<bool, MarkerError> {
        if self
            .marker_present(plan, track, stage, MarkerKind::Done)
            .await?
        {
            return Ok(true);
        }
        // A reviewed-as-ignored track counts as handled by review.
        if stage == Stage::Review {
            return self.review_ignored(plan, track).await;
        }
        Ok(false)
    }

    async fn error(
        &self,
        plan: &BackupPlan,
        track: &TrackPlan,
        stage: Stage,
    ) -> Result<bool, MarkerError> {
        self.marker_present(plan, track, stage, MarkerKind::Error)
            .await
    }

    async fn running(
        &self,
        plan: &BackupPlan,
        track: &TrackPlan,
        stage: Stage,
    ) -> Result<bool, MarkerError> {
        self.marker_present(plan, track, stage, MarkerKind::Running)
            .await
    }

    /// Whether the stage's upstream dependencies are satisfied.
    ///
    /// Drive and plan availability for extract are checked by the cycle
    /// scheduler before this engine is consulted, so extract is always
    /// ready here.
    pub async fn ready(
        &self,
        plan: &BackupPlan,
        track: &TrackPlan,
        stage: Stage,
    ) -> Result<bool, MarkerError> {
        match stage {
            Stage::Extract => Ok(true),
            Stage::Transcode | Stage::Review => self.done(plan, track, Stage::Extract).await,
            Stage::Copy => {
                if !self.done(plan, track, Stage::Transcode).await? {
                    return Ok(false);
                }
                // Transcode is done; review gates copy only when eligible.
                if !self.eligible(plan, track, Stage::Review).await? {
                    return Ok(true);
                }
                self.done(plan, track, Stage::Review).await
            }
        }
    }

    /// Resolves the status of one (plan, track, stage) triple.
    ///
    /// Never fails: if an underlying marker check errors, the stage
    /// resolves to [`TrackQueueStatus::Error`] so one broken track cannot
    /// abort evaluation of the rest of the plan.
    pub async fn queue_status(
        &self,
        plan: &BackupPlan,
        track: &TrackPlan,
        stage: Stage,
    ) -> TrackQueueStatus {
        match self.resolve(plan, track, stage).await {
            Ok(status) => status,
            Err(e) => {
                warn!(
                    disc = %plan.disc_id,
                    track = track.track_number,
                    stage = %stage,
                    error = %e,
                    "Marker check failed; resolving stage as error"
                );
                TrackQueueStatus::Error
            }
        }
    }

    async fn resolve(
        &self,
        plan: &BackupPlan,
        track: &TrackPlan,
        stage: Stage,
    ) -> Result<TrackQueueStatus, MarkerError> {
        if !self.eligible(plan, track, stage).await? {
            return Ok(TrackQueueStatus::Ineligible);
        }
        if self.done(plan, track, stage).await? {
            return Ok(TrackQueueStatus::Done);
        }
        if self.error(plan, track, stage).await? {
            return Ok(TrackQueueStatus::Error);
        }
        if self.running(plan, track, stage).await? {
            return Ok(TrackQueueStatus::Running);
        }
        if self.ready(plan, track, stage).await? {
            return Ok(TrackQueueStatus::Ready);
        }
        Ok(TrackQueueStatus::Blocked)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use crate::plan::*;

    /// Builds a minimal plan with one extractable track.
    pub fn plan(plan_type: PlanType, tracks: Vec<TrackPlan>) -> BackupPlan {
        BackupPlan {
            disc_id: DiscId::from("testdisc"),
            title: "Test Disc".to_string(),
            plan_type,
            status: PlanStatus::Pending,
            created_at: chrono::Utc::now(),
            tracks,
        }
    }

    pub fn track(number: u32, extract: bool) -> TrackPlan {
        TrackPlan {
            track_number: number,
            name: format!("Track {number}"),
            extract,
            transcode: None,
            output: OutputSettings {
                filename: format!("t{number:02}"),
                directory: "out".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::{plan, track};
    use super::*;
    use crate::marker::MarkerPayload;
    use crate::paths::Paths;
    use tempfile::TempDir;

    fn engine() -> (TempDir, QueueEngine) {
        let dir = TempDir::new().unwrap();
        let store = MarkerStore::new(Paths::new(dir.path()));
        (dir, QueueEngine::new(store))
    }

    async fn mark(engine: &QueueEngine, plan: &BackupPlan, track: u32, stage: Stage, kind: MarkerKind) {
        let key = MarkerKey::new(plan.disc_id.clone(), track, stage, kind);
        let payload = MarkerPayload::new(plan.disc_id.clone(), track);
        engine.markers().write(&key, Some(&payload)).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_extract_track_is_ineligible_everywhere() {
        let (_dir, engine) = engine();
        let p = plan(PlanType::Tv, vec![track(1, false)]);

        for stage in Stage::ALL {
            assert_eq!(
                engine.queue_status(&p, &p.tracks[0], stage).await,
                TrackQueueStatus::Ineligible,
                "stage {stage}"
            );
        }
    }

    #[tokio::test]
    async fn test_fresh_movie_track_statuses() {
        let (_dir, engine) = engine();
        let p = plan(PlanType::Movie, vec![track(1, true)]);
        let t = &p.tracks[0];

        assert_eq!(
            engine.queue_status(&p, t, Stage::Extract).await,
            TrackQueueStatus::Ready
        );
        assert_eq!(
            engine.queue_status(&p, t, Stage::Transcode).await,
            TrackQueueStatus::Blocked
        );
        assert_eq!(
            engine.queue_status(&p, t, Stage::Review).await,
            TrackQueueStatus::Ineligible
        );
        assert_eq!(
            engine.queue_status(&p, t, Stage::Copy).await,
            TrackQueueStatus::Blocked
        );
    }

    #[tokio::test]
    async fn test_transcode_becomes_ready_after_extract_done() {
        let (_dir, engine) = engine();
        let p = plan(PlanType::Movie, vec![track(1, true)]);
        mark(&engine, &p, 1, Stage::Extract, MarkerKind::Done).await;

        assert_eq!(
            engine.queue_status(&p, &p.tracks[0], Stage::Transcode).await,
            TrackQueueStatus::Ready
        );
    }

    #[tokio::test]
    async fn test_movie_copy_ready_ignores_review_markers() {
        let (_dir, engine) = engine();
        let p = plan(PlanType::Movie, vec![track(1, true)]);
        mark(&engine, &p, 1, Stage::Extract, MarkerKind::Done).await;
        mark(&engine, &p, 1, Stage::Transcode, MarkerKind::Done).await;

        // No review markers exist and none are needed for a movie.
        assert_eq!(
            engine.queue_status(&p, &p.tracks[0], Stage::Copy).await,
            TrackQueueStatus::Ready
        );
    }

    #[tokio::test]
    async fn test_tv_copy_blocked_until_review_handled() {
        let (_dir, engine) = engine();
        let p = plan(PlanType::Tv, vec![track(1, true)]);
        mark(&engine, &p, 1, Stage::Extract, MarkerKind::Done).await;
        mark(&engine, &p, 1, Stage::Transcode, MarkerKind::Done).await;

        assert_eq!(
            engine.queue_status(&p, &p.tracks[0], Stage::Copy).await,
            TrackQueueStatus::Blocked
        );

        mark(&engine, &p, 1, Stage::Review, MarkerKind::Done).await;
        assert_eq!(
            engine.queue_status(&p, &p.tracks[0], Stage::Copy).await,
            TrackQueueStatus::Ready
        );
    }

    #[tokio::test]
    async fn test_review_ignored_counts_as_review_done() {
        let (_dir, engine) = engine();
        let p = plan(PlanType::Tv, vec![track(1, true)]);
        mark(&engine, &p, 1, Stage::Extract, MarkerKind::Done).await;
        mark(&engine, &p, 1, Stage::Review, MarkerKind::Ignored).await;

        assert_eq!(
            engine.queue_status(&p, &p.tracks[0], Stage::Review).await,
            TrackQueueStatus::Done
        );
    }

    #[tokio::test]
    async fn test_ignored_track_ineligible_for_transcode_and_copy() {
        let (_dir, engine) = engine();
        let p = plan(PlanType::Tv, vec![track(1, true)]);
        mark(&engine, &p, 1, Stage::Extract, MarkerKind::Done).await;
        mark(&engine, &p, 1, Stage::Review, MarkerKind::Ignored).await;

        assert_eq!(
            engine.queue_status(&p, &p.tracks[0], Stage::Transcode).await,
            TrackQueueStatus::Ineligible
        );
        assert_eq!(
            engine.queue_status(&p, &p.tracks[0], Stage::Copy).await,
            TrackQueueStatus::Ineligible
        );
    }

    #[tokio::test]
    async fn test_copy_never_ready_without_transcode_done() {
        let (_dir, engine) = engine();
        let p = plan(PlanType::Tv, vec![track(1, true)]);
        mark(&engine, &p, 1, Stage::Extract, MarkerKind::Done).await;
        mark(&engine, &p, 1, Stage::Review, MarkerKind::Done).await;

        assert_eq!(
            engine.queue_status(&p, &p.tracks[0], Stage::Copy).await,
            TrackQueueStatus::Blocked
        );
    }

    #[tokio::test]
    async fn test_done_wins_over_stale_running_marker() {
        let (_dir, engine) = engine();
        let p = plan(PlanType::Movie, vec![track(1, true)]);
        // Crash scenario: a running marker left behind, then a recovery
        // re-run completed and wrote done.
        mark(&engine, &p, 1, Stage::Extract, MarkerKind::Running).await;
        mark(&engine, &p, 1, Stage::Extract, MarkerKind::Done).await;

        assert_eq!(
            engine.queue_status(&p, &p.tracks[0], Stage::Extract).await,
            TrackQueueStatus::Done
        );
    }

    #[tokio::test]
    async fn test_error_marker_resolves_to_error() {
        let (_dir, engine) = engine();
        let p = plan(PlanType::Movie, vec![track(1, true)]);
        mark(&engine, &p, 1, Stage::Extract, MarkerKind::Error).await;

        assert_eq!(
            engine.queue_status(&p, &p.tracks[0], Stage::Extract).await,
            TrackQueueStatus::Error
        );
    }

    #[tokio::test]
    async fn test_running_marker_resolves_to_running() {
        let (_dir, engine) = engine();
        let p = plan(PlanType::Movie, vec![track(1, true)]);
        mark(&engine, &p, 1, Stage::Extract, MarkerKind::Running).await;

        assert_eq!(
            engine.queue_status(&p, &p.tracks[0], Stage::Extract).await,
            TrackQueueStatus::Running
        );
    }
}
