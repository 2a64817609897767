//! Pipeline cycle execution for one stage.
//!
//! A cycle walks the staging tree: every staged disc, every track in plan
//! order, asking the queue rule engine whether the track is ready for this
//! cycle's stage, and handing ready tracks to the [`StageExecutor`]. The
//! executor owns all marker choreography (running guard, done payload,
//! error marker); the cycle only selects work.
//!
//! Failure containment is per-track and per-disc: an executor failure is
//! logged and the cycle moves to the next track (the error marker keeps it
//! out of future cycles until an operator clears it), and a disc whose
//! plan is missing or malformed is skipped with a warning and retried next
//! cycle.
//!
//! A `running` marker observed before a track executes can only be left
//! over from an interrupted run: cycles are single-flight and the executor
//! clears its own marker on every exit path. The cycle sweeps such markers
//! before selecting work so a crash never wedges a track.

use crate::marker::{MarkerKey, MarkerKind, Stage};
use crate::plan::{BackupPlan, TrackPlan};
use crate::queue::{QueueEngine, TrackQueueStatus};
use crate::storage::{Storage, StorageError};
use std::future::Future;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that abort an entire cycle.
///
/// Deliberately narrow: per-track and per-disc failures are contained
/// inside the cycle, so only a failure to enumerate the staging tree
/// itself lands here.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from one track's stage execution.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("command failed: {0}")]
    Command(String),

    #[error("missing input file: {path}")]
    MissingInput { path: PathBuf },

    #[error("I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Marker(#[from] crate::marker::MarkerError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// One unit of schedulable work; implemented by [`StageCycle`] and, for
/// drive polling, by the extract loop.
pub trait CycleRunner: Send + Sync {
    fn run_cycle(&self) -> impl Future<Output = Result<(), CycleError>> + Send;
}

/// Performs one stage's work for one track, including all of its marker
/// writes.
pub trait StageExecutor: Send + Sync {
    fn stage(&self) -> Stage;

    fn execute(
        &self,
        plan: &BackupPlan,
        track: &TrackPlan,
    ) -> impl Future<Output = Result<(), StageError>> + Send;
}

/// Cycle runner that drives one [`StageExecutor`] over the staging tree.
pub struct StageCycle<E> {
    executor: E,
    storage: Storage,
    queue: QueueEngine,
}

impl<E: StageExecutor> StageCycle<E> {
    pub fn new(executor: E, storage: Storage, queue: QueueEngine) -> Self {
        Self {
            executor,
            storage,
            queue,
        }
    }

    /// Removes a stale `running` marker so the track resolves to its real
    /// status (ready, blocked, errored) instead of staying wedged.
    async fn clear_stale_running(&self, plan: &BackupPlan, track: &TrackPlan, stage: Stage) {
        let key = MarkerKey::new(
            plan.disc_id.clone(),
            track.track_number,
            stage,
            MarkerKind::Running,
        );
        match self.queue.markers().present(&key).await {
            Ok(false) => {}
            Ok(true) => {
                warn!(
                    disc = %plan.disc_id,
                    track = track.track_number,
                    stage = %stage,
                    "Clearing stale running marker from an interrupted run"
                );
                if let Err(e) = self.queue.markers().remove(&key).await {
                    warn!(
                        disc = %plan.disc_id,
                        track = track.track_number,
                        error = %e,
                        "Could not clear stale running marker"
                    );
                }
            }
            Err(e) => {
                warn!(
                    disc = %plan.disc_id,
                    track = track.track_number,
                    error = %e,
                    "Could not check for a stale running marker"
                );
            }
        }
    }

    async fn run_disc(&self, plan: &BackupPlan) {
        let stage = self.executor.stage();
        for track in &plan.tracks {
            self.clear_stale_running(plan, track, stage).await;
            let status = self.queue.queue_status(plan, track, stage).await;
            if status != TrackQueueStatus::Ready {
                debug!(
                    disc = %plan.disc_id,
                    track = track.track_number,
                    stage = %stage,
                    status = %status,
                    "Track not ready"
                );
                continue;
            }

            info!(
                disc = %plan.disc_id,
                track = track.track_number,
                stage = %stage,
                "Running stage for track"
            );
            if let Err(e) = self.executor.execute(plan, track).await {
                // The executor has already recorded the error marker.
                warn!(
                    disc = %plan.disc_id,
                    track = track.track_number,
                    stage = %stage,
                    error = %e,
                    "Stage failed for track"
                );
            }
        }
    }
}

impl<E: StageExecutor> CycleRunner for StageCycle<E> {
    async fn run_cycle(&self) -> Result<(), CycleError> {
        let discs = self.storage.list_staged_discs().await?;
        debug!(stage = %self.executor.stage(), discs = discs.len(), "Cycle start");

        for disc in discs {
            let plan = match self.storage.read_plan(&disc).await {
                Ok(p) => p,
                Err(StorageError::NotFound { .. }) => {
                    debug!(disc = %disc, "Staged disc has no plan; skipping");
                    continue;
                }
                Err(e) => {
                    warn!(disc = %disc, error = %e, "Plan unreadable; skipping disc this cycle");
                    continue;
                }
            };
            self.run_disc(&plan).await;
        }
        Ok(())
    }
}
