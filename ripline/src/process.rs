//! Drive processing: what happens when a disc is ready to act on.
//!
//! The [`DriveProcessor`] is the handler behind the drive poll state
//! machine. For each settled disc it identifies the disc, then takes one
//! of three routes:
//!
//! - no plan, no metadata: scan the disc, save metadata, wait for a plan
//! - no plan, metadata exists: nothing to do until a plan is written
//! - plan exists: run extraction for every planned track not yet done
//!
//! Only the `done` marker gates extraction. A `running` marker left by a
//! crashed process and an `error` marker from a failed attempt both mean
//! the track is re-attempted on the next insertion; a successful extract
//! clears the stale error marker.
//!
//! Hardware access (identify, scan, extract) sits behind traits so tests
//! can run the whole flow against mocks. Per-track failures write an
//! `error` marker and move on to the next track; they never abort the
//! disc, and the disc id still resolves so the idempotency token is
//! meaningful.

use crate::marker::{MarkerKey, MarkerKind, MarkerPayload, Stage};
use crate::metadata::DiscMetadata;
use crate::plan::{BackupPlan, DiscId, TrackPlan};
use crate::queue::{QueueEngine, TrackQueueStatus};
use crate::storage::{Storage, StorageError};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from disc processing.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("disc identification failed: {0}")]
    Identify(String),

    #[error("disc scan failed: {0}")]
    Scan(String),

    #[error("extraction failed for track {track}: {message}")]
    Extract { track: u32, message: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Marker(#[from] crate::marker::MarkerError),

    #[error("I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What identification learns about an inserted disc.
#[derive(Debug, Clone)]
pub struct DiscInfo {
    pub disc_id: DiscId,
    pub volume_label: String,
}

/// Resolves a stable disc id (and label) for the disc in a drive.
pub trait DiscIdentifier: Send + Sync {
    fn identify(&self, device: &Path) -> impl Future<Output = Result<DiscInfo, ProcessError>> + Send;
}

/// Scans a disc's track layout into metadata.
pub trait MetadataScanner: Send + Sync {
    fn scan(
        &self,
        device: &Path,
        info: &DiscInfo,
    ) -> impl Future<Output = Result<DiscMetadata, ProcessError>> + Send;
}

/// Extracts one track into a directory, returning the produced file.
///
/// The output filename is the extractor's choice (MakeMKV names files
/// itself), which is why extraction runs in an isolated temp directory.
pub trait TrackExtractor: Send + Sync {
    fn extract(
        &self,
        device: &Path,
        track_number: u32,
        output_dir: &Path,
    ) -> impl Future<Output = Result<PathBuf, ProcessError>> + Send;
}

/// Orchestrates identify, scan, and extract for one drive.
pub struct DriveProcessor<I, S, E> {
    identifier: I,
    scanner: S,
    extractor: E,
    storage: Storage,
    queue: QueueEngine,
}

impl<I, S, E> DriveProcessor<I, S, E>
where
    I: DiscIdentifier,
    S: MetadataScanner,
    E: TrackExtractor,
{
    pub fn new(identifier: I, scanner: S, extractor: E, storage: Storage, queue: QueueEngine) -> Self {
        Self {
            identifier,
            scanner,
            extractor,
            storage,
            queue,
        }
    }

    /// Processes the disc in `device` end to end for the extract stage.
    pub async fn process_disc(&self, device: &Path) -> Result<DiscId, ProcessError> {
        let info = self.identifier.identify(device).await?;
        let disc_id = info.disc_id.clone();
        info!(device = %device.display(), disc = %disc_id, label = %info.volume_label, "Identified disc");

        if !self.storage.plan_exists(&disc_id).await? {
            if self.storage.metadata_exists(&disc_id).await? {
                info!(disc = %disc_id, "Disc already scanned; waiting for a plan");
                return Ok(disc_id);
            }
            info!(disc = %disc_id, "New disc; scanning track layout");
            let metadata = self.scanner.scan(device, &info).await?;
            self.storage.write_metadata(&metadata).await?;
            info!(disc = %disc_id, tracks = metadata.tracks.len(), "Metadata saved; waiting for a plan");
            return Ok(disc_id);
        }

        let plan = self.storage.read_plan(&disc_id).await?;
        self.storage.ensure_staging_dirs(&disc_id).await?;

        for track in &plan.tracks {
            if !track.extract {
                continue;
            }
            match self.queue.queue_status(&plan, track, Stage::Extract).await {
                TrackQueueStatus::Done | TrackQueueStatus::Ineligible => {
                    debug!(disc = %disc_id, track = track.track_number, "Track already handled");
                    continue;
                }
                TrackQueueStatus::Running => {
                    warn!(
                        disc = %disc_id,
                        track = track.track_number,
                        "Stale running marker from an interrupted run; re-extracting"
                    );
                }
                TrackQueueStatus::Error => {
                    info!(
                        disc = %disc_id,
                        track = track.track_number,
                        "Previous extraction failed; retrying"
                    );
                }
                TrackQueueStatus::Ready | TrackQueueStatus::Blocked => {}
            }

            if let Err(e) = self.extract_track(device, &plan, track).await {
                warn!(
                    disc = %disc_id,
                    track = track.track_number,
                    error = %e,
                    "Track extraction failed"
                );
                self.write_error_marker(&disc_id, track.track_number, &e).await;
            }
        }

        Ok(disc_id)
    }

    async fn extract_track(
        &self,
        device: &Path,
        plan: &BackupPlan,
        track: &TrackPlan,
    ) -> Result<(), ProcessError> {
        let markers = self.queue.markers();
        info!(disc = %plan.disc_id, track = track.track_number, name = %track.name, "Extracting track");

        let guard = markers
            .write_running(&plan.disc_id, track.track_number, Stage::Extract)
            .await?;
        let started = Instant::now();
        let result = self.run_extract(device, plan, track).await;
        guard.clear().await;
        result?;

        let duration_ms = started.elapsed().as_millis() as u64;
        let done = MarkerKey::new(
            plan.disc_id.clone(),
            track.track_number,
            Stage::Extract,
            MarkerKind::Done,
        );
        let payload = MarkerPayload::new(plan.disc_id.clone(), track.track_number)
            .with("sourceDrive", serde_json::json!(device.display().to_string()))
            .with("durationMs", serde_json::json!(duration_ms));
        markers.write(&done, Some(&payload)).await?;

        // A retry succeeded; the old error marker no longer describes
        // this track.
        let error = MarkerKey::new(
            plan.disc_id.clone(),
            track.track_number,
            Stage::Extract,
            MarkerKind::Error,
        );
        markers.remove(&error).await?;

        info!(
            disc = %plan.disc_id,
            track = track.track_number,
            duration_ms,
            "Track extracted"
        );
        Ok(())
    }

    /// Runs the extractor in an isolated temp directory and moves the
    /// produced file to the stage-canonical `t<NN>.mkv` name.
    async fn run_extract(
        &self,
        device: &Path,
        plan: &BackupPlan,
        track: &TrackPlan,
    ) -> Result<(), ProcessError> {
        let paths = self.queue.markers().paths();
        let temp = paths.temp_extract_dir(&plan.disc_id, track.track_number);
        tokio::fs::create_dir_all(&temp)
            .await
            .map_err(|e| ProcessError::Io {
                path: temp.clone(),
                source: e,
            })?;

        let produced = self
            .extractor
            .extract(device, track.track_number, &temp)
            .await?;

        let target = paths.media(&plan.disc_id, Stage::Extract, track.track_number);
        tokio::fs::rename(&produced, &target)
            .await
            .map_err(|e| ProcessError::Io {
                path: target.clone(),
                source: e,
            })?;

        if let Err(e) = tokio::fs::remove_dir_all(&temp).await {
            warn!(path = %temp.display(), error = %e, "Could not remove temp extraction directory");
        }
        Ok(())
    }

    async fn write_error_marker(&self, disc_id: &DiscId, track_number: u32, error: &ProcessError) {
        let key = MarkerKey::new(disc_id.clone(), track_number, Stage::Extract, MarkerKind::Error);
        let payload = MarkerPayload::new(disc_id.clone(), track_number)
            .with("message", serde_json::json!(error.to_string()));
        if let Err(e) = self.queue.markers().write(&key, Some(&payload)).await {
            warn!(disc = %disc_id, track = track_number, error = %e, "Could not write error marker");
        }
    }
}

impl<I, S, E> crate::drive::DriveHandler for DriveProcessor<I, S, E>
where
    I: DiscIdentifier,
    S: MetadataScanner,
    E: TrackExtractor,
{
    async fn process(&self, device: &Path) -> Result<DiscId, ProcessError> {
        self.process_disc(device).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::MarkerStore;
    use crate::paths::Paths;
    use crate::plan::{OutputSettings, PlanStatus, PlanType};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct FixedIdentifier {
        id: &'static str,
    }

    impl DiscIdentifier for FixedIdentifier {
        async fn identify(&self, _device: &Path) -> Result<DiscInfo, ProcessError> {
            Ok(DiscInfo {
                disc_id: DiscId::from(self.id),
                volume_label: "TEST_DISC".to_string(),
            })
        }
    }

    struct CountingScanner {
        calls: AtomicUsize,
    }

    impl CountingScanner {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl MetadataScanner for CountingScanner {
        async fn scan(&self, _device: &Path, info: &DiscInfo) -> Result<DiscMetadata, ProcessError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(DiscMetadata {
                disc_id: info.disc_id.clone(),
                volume_label: info.volume_label.clone(),
                user_provided_name: String::new(),
                scanned_at: chrono::Utc::now(),
                tracks: Vec::new(),
            })
        }
    }

    /// Extractor that writes a file with an extractor-chosen name, or
    /// fails for configured track numbers.
    struct FakeExtractor {
        calls: AtomicUsize,
        fail_tracks: Vec<u32>,
    }

    impl FakeExtractor {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_tracks: Vec::new(),
            }
        }

        fn failing_on(tracks: Vec<u32>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_tracks: tracks,
            }
        }
    }

    impl TrackExtractor for FakeExtractor {
        async fn extract(
            &self,
            _device: &Path,
            track_number: u32,
            output_dir: &Path,
        ) -> Result<PathBuf, ProcessError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_tracks.contains(&track_number) {
                return Err(ProcessError::Extract {
                    track: track_number,
                    message: "read error".to_string(),
                });
            }
            // MakeMKV-style: the tool picks its own filename.
            let out = output_dir.join(format!("title_t{track_number:02}.mkv"));
            tokio::fs::write(&out, b"video").await.unwrap();
            Ok(out)
        }
    }

    fn fixture(id: &'static str) -> (TempDir, Storage, QueueEngine) {
        let dir = TempDir::new().unwrap();
        let paths = Paths::new(dir.path());
        let storage = Storage::new(paths.clone());
        let queue = QueueEngine::new(MarkerStore::new(paths));
        let _ = id;
        (dir, storage, queue)
    }

    fn two_track_plan(id: &str) -> BackupPlan {
        BackupPlan {
            disc_id: DiscId::from(id),
            title: "Test".to_string(),
            plan_type: PlanType::Movie,
            status: PlanStatus::Pending,
            created_at: chrono::Utc::now(),
            tracks: vec![
                TrackPlan {
                    track_number: 1,
                    name: "Feature".to_string(),
                    extract: true,
                    transcode: None,
                    output: OutputSettings {
                        filename: "feature.mkv".to_string(),
                        directory: "Test".to_string(),
                    },
                },
                TrackPlan {
                    track_number: 2,
                    name: "Extras".to_string(),
                    extract: true,
                    transcode: None,
                    output: OutputSettings {
                        filename: "extras.mkv".to_string(),
                        directory: "Test".to_string(),
                    },
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_unknown_disc_is_scanned_and_saved() {
        let (_dir, storage, queue) = fixture("d1");
        let scanner = CountingScanner::new();
        let processor = DriveProcessor::new(
            FixedIdentifier { id: "d1" },
            scanner,
            FakeExtractor::new(),
            storage.clone(),
            queue,
        );

        let disc = processor.process_disc(Path::new("/dev/sr0")).await.unwrap();
        assert_eq!(disc.as_str(), "d1");
        assert_eq!(processor.scanner.calls.load(Ordering::SeqCst), 1);
        assert!(storage.metadata_exists(&disc).await.unwrap());
        assert_eq!(processor.extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_scanned_but_unplanned_disc_is_skipped() {
        let (_dir, storage, queue) = fixture("d1");
        storage
            .write_metadata(&DiscMetadata {
                disc_id: DiscId::from("d1"),
                volume_label: "X".to_string(),
                user_provided_name: String::new(),
                scanned_at: chrono::Utc::now(),
                tracks: Vec::new(),
            })
            .await
            .unwrap();

        let processor = DriveProcessor::new(
            FixedIdentifier { id: "d1" },
            CountingScanner::new(),
            FakeExtractor::new(),
            storage,
            queue,
        );

        processor.process_disc(Path::new("/dev/sr0")).await.unwrap();
        assert_eq!(processor.scanner.calls.load(Ordering::SeqCst), 0);
        assert_eq!(processor.extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_planned_disc_extracts_ready_tracks() {
        let (_dir, storage, queue) = fixture("d1");
        storage.write_plan(&two_track_plan("d1")).await.unwrap();

        let processor = DriveProcessor::new(
            FixedIdentifier { id: "d1" },
            CountingScanner::new(),
            FakeExtractor::new(),
            storage.clone(),
            queue.clone(),
        );

        let disc = processor.process_disc(Path::new("/dev/sr0")).await.unwrap();
        assert_eq!(processor.extractor.calls.load(Ordering::SeqCst), 2);

        let paths = queue.markers().paths();
        for n in [1u32, 2] {
            // Media moved to the canonical name; temp dir cleaned up.
            assert!(paths.media(&disc, Stage::Extract, n).is_file());
            assert!(!paths.temp_extract_dir(&disc, n).exists());

            let done = MarkerKey::new(disc.clone(), n, Stage::Extract, MarkerKind::Done);
            let payload = queue.markers().read_payload(&done).await.unwrap();
            assert_eq!(payload.get_str("sourceDrive"), Some("/dev/sr0"));
            assert!(payload.extra.contains_key("durationMs"));

            let running = MarkerKey::new(disc.clone(), n, Stage::Extract, MarkerKind::Running);
            assert!(!queue.markers().present(&running).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_done_tracks_are_not_reextracted() {
        let (_dir, storage, queue) = fixture("d1");
        let plan = two_track_plan("d1");
        storage.write_plan(&plan).await.unwrap();

        let done = MarkerKey::new(DiscId::from("d1"), 1, Stage::Extract, MarkerKind::Done);
        queue
            .markers()
            .write(&done, Some(&MarkerPayload::new(DiscId::from("d1"), 1)))
            .await
            .unwrap();

        let processor = DriveProcessor::new(
            FixedIdentifier { id: "d1" },
            CountingScanner::new(),
            FakeExtractor::new(),
            storage,
            queue,
        );

        processor.process_disc(Path::new("/dev/sr0")).await.unwrap();
        // Only track 2 extracts.
        assert_eq!(processor.extractor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_running_marker_does_not_block_reextraction() {
        let (_dir, storage, queue) = fixture("d1");
        storage.write_plan(&two_track_plan("d1")).await.unwrap();

        // A crashed run left a running marker behind with no done marker.
        let running = MarkerKey::new(DiscId::from("d1"), 1, Stage::Extract, MarkerKind::Running);
        queue.markers().write(&running, None).await.unwrap();

        let processor = DriveProcessor::new(
            FixedIdentifier { id: "d1" },
            CountingScanner::new(),
            FakeExtractor::new(),
            storage,
            queue.clone(),
        );

        let disc = processor.process_disc(Path::new("/dev/sr0")).await.unwrap();
        assert_eq!(processor.extractor.calls.load(Ordering::SeqCst), 2);

        let done = MarkerKey::new(disc.clone(), 1, Stage::Extract, MarkerKind::Done);
        assert!(queue.markers().present(&done).await.unwrap());
        assert!(!queue.markers().present(&running).await.unwrap());
    }

    #[tokio::test]
    async fn test_errored_track_is_retried_and_error_cleared_on_success() {
        let (_dir, storage, queue) = fixture("d1");
        storage.write_plan(&two_track_plan("d1")).await.unwrap();

        // First insertion: track 1 fails and is parked with an error marker.
        let failing = DriveProcessor::new(
            FixedIdentifier { id: "d1" },
            CountingScanner::new(),
            FakeExtractor::failing_on(vec![1]),
            storage.clone(),
            queue.clone(),
        );
        failing.process_disc(Path::new("/dev/sr0")).await.unwrap();

        let error = MarkerKey::new(DiscId::from("d1"), 1, Stage::Extract, MarkerKind::Error);
        assert!(queue.markers().present(&error).await.unwrap());

        // Reinsertion: track 1 is retried, track 2 (already done) is not.
        let retry = DriveProcessor::new(
            FixedIdentifier { id: "d1" },
            CountingScanner::new(),
            FakeExtractor::new(),
            storage,
            queue.clone(),
        );
        let disc = retry.process_disc(Path::new("/dev/sr0")).await.unwrap();
        assert_eq!(retry.extractor.calls.load(Ordering::SeqCst), 1);

        let done = MarkerKey::new(disc.clone(), 1, Stage::Extract, MarkerKind::Done);
        assert!(queue.markers().present(&done).await.unwrap());
        assert!(!queue.markers().present(&error).await.unwrap());
    }

    #[tokio::test]
    async fn test_track_failure_writes_error_and_continues() {
        let (_dir, storage, queue) = fixture("d1");
        storage.write_plan(&two_track_plan("d1")).await.unwrap();

        let processor = DriveProcessor::new(
            FixedIdentifier { id: "d1" },
            CountingScanner::new(),
            FakeExtractor::failing_on(vec![1]),
            storage,
            queue.clone(),
        );

        // Disc-level processing still succeeds.
        let disc = processor.process_disc(Path::new("/dev/sr0")).await.unwrap();
        assert_eq!(processor.extractor.calls.load(Ordering::SeqCst), 2);

        let error = MarkerKey::new(disc.clone(), 1, Stage::Extract, MarkerKind::Error);
        let payload = queue.markers().read_payload(&error).await.unwrap();
        assert!(payload.get_str("message").unwrap().contains("read error"));

        // Running marker cleared despite the failure.
        let running = MarkerKey::new(disc.clone(), 1, Stage::Extract, MarkerKind::Running);
        assert!(!queue.markers().present(&running).await.unwrap());

        let done = MarkerKey::new(disc.clone(), 2, Stage::Extract, MarkerKind::Done);
        assert!(queue.markers().present(&done).await.unwrap());
    }
}
