//! Review stage: recording verdicts and finalizing plans.
//!
//! Review is human-driven (the operator watches each extracted track and
//! names the episode or discards it), so unlike transcode and copy there
//! is no scheduled executor. This module records the two verdicts as
//! markers and performs the one plan mutation the pipeline is allowed:
//! once every eligible track has been reviewed or ignored, reviewed names
//! are written back into the plan and its status moves to `approved`.

use crate::marker::{MarkerError, MarkerKey, MarkerKind, MarkerPayload, Stage};
use crate::plan::{BackupPlan, DiscId, PlanStatus, PlanType};
use crate::queue::QueueEngine;
use crate::storage::{Storage, StorageError};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("track {track} not in plan for disc {disc}")]
    TrackNotFound { disc: DiscId, track: u32 },

    #[error("disc {0} is not a tv plan; review does not apply")]
    NotReviewable(DiscId),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Marker(#[from] MarkerError),
}

/// Records review verdicts and finalizes fully-reviewed plans.
pub struct ReviewService {
    storage: Storage,
    queue: QueueEngine,
}

impl ReviewService {
    pub fn new(storage: Storage, queue: QueueEngine) -> Self {
        Self { storage, queue }
    }

    /// Marks a track as reviewed, optionally assigning its final name
    /// (e.g. the identified episode title). Finalizes the plan when this
    /// was the last outstanding track.
    pub async fn record_review(
        &self,
        disc_id: &DiscId,
        track_number: u32,
        final_name: Option<&str>,
    ) -> Result<bool, ReviewError> {
        let plan = self.reviewable_plan(disc_id, track_number).await?;

        let key = MarkerKey::new(disc_id.clone(), track_number, Stage::Review, MarkerKind::Done);
        let mut payload = MarkerPayload::new(disc_id.clone(), track_number);
        if let Some(name) = final_name {
            payload = payload.with("finalName", serde_json::json!(name));
        }
        self.queue.markers().write(&key, Some(&payload)).await?;
        info!(disc = %disc_id, track = track_number, "Track reviewed");

        self.finalize_if_complete(&plan).await
    }

    /// Marks a track as ignored: it will never transcode or copy, and it
    /// counts as handled for finalization.
    pub async fn record_ignore(
        &self,
        disc_id: &DiscId,
        track_number: u32,
    ) -> Result<bool, ReviewError> {
        let plan = self.reviewable_plan(disc_id, track_number).await?;

        let key = MarkerKey::new(
            disc_id.clone(),
            track_number,
            Stage::Review,
            MarkerKind::Ignored,
        );
        let payload = MarkerPayload::new(disc_id.clone(), track_number);
        self.queue.markers().write(&key, Some(&payload)).await?;
        info!(disc = %disc_id, track = track_number, "Track ignored");

        self.finalize_if_complete(&plan).await
    }

    async fn reviewable_plan(
        &self,
        disc_id: &DiscId,
        track_number: u32,
    ) -> Result<BackupPlan, ReviewError> {
        let plan = self.storage.read_plan(disc_id).await?;
        if plan.plan_type != PlanType::Tv {
            return Err(ReviewError::NotReviewable(disc_id.clone()));
        }
        if !plan
            .tracks
            .iter()
            .any(|t| t.track_number == track_number && t.extract)
        {
            return Err(ReviewError::TrackNotFound {
                disc: disc_id.clone(),
                track: track_number,
            });
        }
        Ok(plan)
    }

    /// Finalizes the plan if every eligible track has a review verdict:
    /// applies `finalName` from review payloads to track names and output
    /// filenames, then sets the plan status to `approved`. Returns whether
    /// finalization happened.
    pub async fn finalize_if_complete(&self, plan: &BackupPlan) -> Result<bool, ReviewError> {
        if plan.status == PlanStatus::Approved || plan.status == PlanStatus::Completed {
            return Ok(false);
        }

        for track in &plan.tracks {
            if !self.queue.eligible(plan, track, Stage::Review).await? {
                continue;
            }
            if !self.queue.done(plan, track, Stage::Review).await? {
                debug!(
                    disc = %plan.disc_id,
                    track = track.track_number,
                    "Review outstanding; plan not finalized"
                );
                return Ok(false);
            }
        }

        let mut finalized = plan.clone();
        for track in &mut finalized.tracks {
            let done = MarkerKey::new(
                plan.disc_id.clone(),
                track.track_number,
                Stage::Review,
                MarkerKind::Done,
            );
            let payload = match self.queue.markers().read_payload(&done).await {
                Ok(p) => p,
                // Ignored tracks have no done payload; nothing to apply.
                Err(MarkerError::NotFound { .. }) => continue,
                Err(e) => return Err(e.into()),
            };
            if let Some(name) = payload.get_str("finalName") {
                track.name = name.to_string();
                track.output.filename = name.to_string();
            }
        }
        finalized.status = PlanStatus::Approved;
        self.storage.write_plan(&finalized).await?;

        info!(disc = %plan.disc_id, "All tracks reviewed; plan approved");
        Ok(true)
    }
}
