//! Per-drive poll state machine.
//!
//! One [`DriveState`] per physical drive path, rebuilt from hardware
//! polling and never persisted. The machine exists to solve two problems:
//!
//! - **Settling**: when a disc is inserted the OS needs a moment to mount
//!   it, so a transition into `DiskPresent` is recorded but not acted on
//!   until the *next* poll still reads `DiskPresent`. The exception is the
//!   very first observation after startup (`NoInfo -> DiskPresent`): the
//!   disc has likely been sitting in the drive since before the process
//!   started, so it is processed immediately.
//! - **Idempotency**: a disc is processed exactly once per insertion. The
//!   token stores the resolved [`DiscId`] rather than an opaque sentinel,
//!   so two different discs inserted in immediate succession both process.
//!
//! The machine is terminal-free; it runs for the lifetime of the process.

use super::{DriveMonitor, DriveStatus};
use crate::plan::DiscId;
use crate::process::ProcessError;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// Idempotency token for one drive's current insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessedToken {
    /// Nothing processed yet for this insertion.
    Unprocessed,
    /// Processed successfully; holds the resolved disc id.
    Processed(DiscId),
    /// Processing failed; suppresses a retry within the same tick, but the
    /// next poll tick (or a plan-change reset) retries.
    Failed,
}

/// In-memory state for one drive path.
#[derive(Debug, Clone)]
pub struct DriveState {
    pub status: DriveStatus,
    pub processed: ProcessedToken,
    pub last_check: Option<Instant>,
}

impl DriveState {
    fn initial() -> Self {
        Self {
            status: DriveStatus::NoInfo,
            processed: ProcessedToken::Unprocessed,
            last_check: None,
        }
    }
}

/// Stage-1 processing collaborator: identify the disc in a drive,
/// find-or-create its plan/metadata, and run eligible extract work.
pub trait DriveHandler: Send + Sync {
    /// Processes the disc in `device`, returning its resolved id.
    fn process(&self, device: &Path)
        -> impl Future<Output = Result<DiscId, ProcessError>> + Send;
}

/// Polls all drives and drives the per-drive state machine.
pub struct DrivePoller<M: DriveMonitor> {
    monitor: M,
    states: HashMap<PathBuf, DriveState>,
}

impl<M: DriveMonitor> DrivePoller<M> {
    pub fn new(monitor: M) -> Self {
        Self {
            monitor,
            states: HashMap::new(),
        }
    }

    /// Current state for one drive, if it has been observed.
    pub fn state(&self, device: &Path) -> Option<&DriveState> {
        self.states.get(device)
    }

    /// Clears idempotency tokens for drives that currently hold a disc.
    ///
    /// Called on plan-change events: a drive that was skipped because no
    /// plan existed gets another chance. Processing is idempotent (done
    /// markers are re-checked), so a re-run is cheap.
    pub fn reset_processed(&mut self) {
        for state in self.states.values_mut() {
            if state.status == DriveStatus::DiskPresent {
                state.processed = ProcessedToken::Unprocessed;
            }
        }
    }

    /// Runs one poll tick over every drive.
    ///
    /// Hardware errors are logged and the affected drive treated as
    /// [`DriveStatus::NoInfo`] until the condition clears; they never
    /// propagate out of the tick.
    pub async fn tick<H: DriveHandler>(&mut self, handler: &H) {
        let drives = match self.monitor.list() {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "Failed to enumerate drives");
                return;
            }
        };

        for device in drives {
            let current = match self.monitor.status(&device) {
                Ok(s) => s,
                Err(e) => {
                    warn!(device = %device.display(), error = %e, "Drive status unreadable");
                    self.states.insert(device, DriveState::initial());
                    continue;
                }
            };
            self.observe(&device, current, handler).await;
        }
    }

    async fn observe<H: DriveHandler>(
        &mut self,
        device: &Path,
        current: DriveStatus,
        handler: &H,
    ) {
        let prev = self
            .states
            .get(device)
            .cloned()
            .unwrap_or_else(DriveState::initial);
        let now = Some(Instant::now());

        if current != DriveStatus::DiskPresent {
            if prev.status == DriveStatus::DiskPresent {
                info!(device = %device.display(), status = %current, "Drive is now empty or open");
            }
            // A later DiskPresent is a new insertion.
            self.states.insert(
                device.to_path_buf(),
                DriveState {
                    status: current,
                    processed: ProcessedToken::Unprocessed,
                    last_check: now,
                },
            );
            return;
        }

        // Disc present. A transition from empty/open/reading means the
        // disc was just inserted: record it, but let the OS finish
        // mounting before acting. NoInfo is exempt: first observation
        // after startup acts immediately.
        if prev.status != DriveStatus::DiskPresent && prev.status != DriveStatus::NoInfo {
            info!(device = %device.display(), "New disc detected; waiting for drive to settle");
            self.states.insert(
                device.to_path_buf(),
                DriveState {
                    status: current,
                    processed: ProcessedToken::Unprocessed,
                    last_check: now,
                },
            );
            return;
        }

        if let ProcessedToken::Processed(_) = prev.processed {
            self.states.insert(
                device.to_path_buf(),
                DriveState {
                    status: current,
                    processed: prev.processed,
                    last_check: now,
                },
            );
            return;
        }

        // Unprocessed, or Failed on an earlier tick (retry now).
        info!(device = %device.display(), "Processing disc");
        let processed = match handler.process(device).await {
            Ok(disc_id) => {
                info!(device = %device.display(), disc = %disc_id, "Finished processing drive");
                ProcessedToken::Processed(disc_id)
            }
            Err(e) => {
                warn!(device = %device.display(), error = %e, "Drive processing failed");
                ProcessedToken::Failed
            }
        };
        self.states.insert(
            device.to_path_buf(),
            DriveState {
                status: current,
                processed,
                last_check: now,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::DriveError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted monitor: one drive, a queue of statuses to report.
    struct ScriptedMonitor {
        device: PathBuf,
        script: Mutex<Vec<DriveStatus>>,
    }

    impl ScriptedMonitor {
        fn new(script: Vec<DriveStatus>) -> Self {
            Self {
                device: PathBuf::from("/dev/sr0"),
                script: Mutex::new(script),
            }
        }
    }

    impl DriveMonitor for ScriptedMonitor {
        fn list(&self) -> Result<Vec<PathBuf>, DriveError> {
            Ok(vec![self.device.clone()])
        }

        fn status(&self, _device: &Path) -> Result<DriveStatus, DriveError> {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                return Err(DriveError::Unsupported);
            }
            Ok(script.remove(0))
        }
    }

    /// Handler that counts invocations and returns scripted disc ids.
    struct CountingHandler {
        calls: AtomicUsize,
        ids: Mutex<Vec<Result<DiscId, ()>>>,
    }

    impl CountingHandler {
        fn returning(ids: Vec<Result<DiscId, ()>>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                ids: Mutex::new(ids),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl DriveHandler for CountingHandler {
        async fn process(&self, _device: &Path) -> Result<DiscId, ProcessError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut ids = self.ids.lock().unwrap();
            let next = if ids.is_empty() {
                Ok(DiscId::from("default"))
            } else {
                ids.remove(0)
            };
            next.map_err(|_| ProcessError::Identify("scripted failure".to_string()))
        }
    }

    #[tokio::test]
    async fn test_first_observation_processes_immediately() {
        // NO_INFO -> DISK_PRESENT: no settle delay.
        let monitor = ScriptedMonitor::new(vec![DriveStatus::DiskPresent]);
        let handler = CountingHandler::returning(vec![Ok(DiscId::from("d1"))]);
        let mut poller = DrivePoller::new(monitor);

        poller.tick(&handler).await;
        assert_eq!(handler.calls(), 1);
        assert_eq!(
            poller.state(Path::new("/dev/sr0")).unwrap().processed,
            ProcessedToken::Processed(DiscId::from("d1"))
        );
    }

    #[tokio::test]
    async fn test_insertion_waits_one_poll_to_settle() {
        // NO_DISK -> DISK_PRESENT -> DISK_PRESENT: process on the third tick.
        let monitor = ScriptedMonitor::new(vec![
            DriveStatus::NoDisk,
            DriveStatus::DiskPresent,
            DriveStatus::DiskPresent,
        ]);
        let handler = CountingHandler::returning(vec![Ok(DiscId::from("d1"))]);
        let mut poller = DrivePoller::new(monitor);

        poller.tick(&handler).await;
        assert_eq!(handler.calls(), 0);

        poller.tick(&handler).await;
        assert_eq!(handler.calls(), 0, "settle poll must not process");

        poller.tick(&handler).await;
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test]
    async fn test_processed_disc_not_reprocessed_while_present() {
        let monitor = ScriptedMonitor::new(vec![
            DriveStatus::DiskPresent,
            DriveStatus::DiskPresent,
            DriveStatus::DiskPresent,
        ]);
        let handler = CountingHandler::returning(vec![Ok(DiscId::from("d1"))]);
        let mut poller = DrivePoller::new(monitor);

        for _ in 0..3 {
            poller.tick(&handler).await;
        }
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test]
    async fn test_removal_resets_token_and_new_disc_processes() {
        // Two different discs back to back must both process.
        let monitor = ScriptedMonitor::new(vec![
            DriveStatus::DiskPresent, // disc A, first observation
            DriveStatus::TrayOpen,    // A removed
            DriveStatus::DiskPresent, // disc B inserted (settle)
            DriveStatus::DiskPresent, // B settles, process
        ]);
        let handler =
            CountingHandler::returning(vec![Ok(DiscId::from("discA")), Ok(DiscId::from("discB"))]);
        let mut poller = DrivePoller::new(monitor);

        for _ in 0..4 {
            poller.tick(&handler).await;
        }
        assert_eq!(handler.calls(), 2);
        assert_eq!(
            poller.state(Path::new("/dev/sr0")).unwrap().processed,
            ProcessedToken::Processed(DiscId::from("discB"))
        );
    }

    #[tokio::test]
    async fn test_failure_sets_failed_token_then_retries_next_tick() {
        let monitor = ScriptedMonitor::new(vec![
            DriveStatus::DiskPresent,
            DriveStatus::DiskPresent,
        ]);
        let handler =
            CountingHandler::returning(vec![Err(()), Ok(DiscId::from("d1"))]);
        let mut poller = DrivePoller::new(monitor);

        poller.tick(&handler).await;
        assert_eq!(
            poller.state(Path::new("/dev/sr0")).unwrap().processed,
            ProcessedToken::Failed
        );

        poller.tick(&handler).await;
        assert_eq!(handler.calls(), 2);
        assert_eq!(
            poller.state(Path::new("/dev/sr0")).unwrap().processed,
            ProcessedToken::Processed(DiscId::from("d1"))
        );
    }

    #[tokio::test]
    async fn test_reset_processed_allows_rerun_on_plan_change() {
        let monitor = ScriptedMonitor::new(vec![
            DriveStatus::DiskPresent,
            DriveStatus::DiskPresent,
        ]);
        let handler = CountingHandler::returning(vec![
            Ok(DiscId::from("d1")),
            Ok(DiscId::from("d1")),
        ]);
        let mut poller = DrivePoller::new(monitor);

        poller.tick(&handler).await;
        assert_eq!(handler.calls(), 1);

        poller.reset_processed();
        poller.tick(&handler).await;
        assert_eq!(handler.calls(), 2);
    }

    #[tokio::test]
    async fn test_status_error_treated_as_no_info() {
        // Script exhausted -> status() errors.
        let monitor = ScriptedMonitor::new(vec![]);
        let handler = CountingHandler::returning(vec![]);
        let mut poller = DrivePoller::new(monitor);

        poller.tick(&handler).await;
        assert_eq!(handler.calls(), 0);
        assert_eq!(
            poller.state(Path::new("/dev/sr0")).unwrap().status,
            DriveStatus::NoInfo
        );
    }
}
