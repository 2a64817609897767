//! Cycle scheduler: single-flight, debounced pipeline loop.
//!
//! Guarantees that pipeline work runs as one cycle at a time, triggered by
//! debounced filesystem-change notifications on the plans and staging
//! directories, with a periodic poll tick as the correctness backstop, and
//! that no trigger is ever lost: an event arriving while a cycle is running
//! causes exactly one follow-up cycle after the in-flight cycle finishes,
//! not N and never zero.
//!
//! ```text
//! notify events ──┐
//! poll tick ──────┼──► trigger channel ──► debounce ──► run_cycle()
//! manual trigger ─┘                                        │
//!          triggers arriving mid-cycle ──► pending ────────┘ (one follow-up)
//! ```
//!
//! Each scheduler instance owns its own state, so separate pipelines (say,
//! transcode and copy loops) never share flags accidentally. File-watch
//! backends are platform-dependent and best-effort: if a subscription
//! fails the scheduler logs a warning and polling carries correctness.

use crate::pipeline::CycleRunner;
use notify::{RecursiveMode, Watcher};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for one scheduler instance.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How long to wait after a change notification before starting a
    /// cycle, coalescing bursts of events.
    pub debounce: Duration,
    /// Fallback interval at which a cycle runs even without notifications.
    pub poll_interval: Duration,
    /// Directories to watch for changes (plans, staging).
    pub watch_dirs: Vec<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(1),
            poll_interval: Duration::from_secs(30),
            watch_dirs: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_watch_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.watch_dirs = dirs;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Cloneable handle for injecting an external trigger.
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl TriggerHandle {
    /// Requests a pipeline cycle. Cheap and non-blocking; bursts coalesce.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

/// A running scheduler loop.
///
/// Dropping the struct leaves the background task running; call
/// [`CycleScheduler::shutdown`] for an orderly stop that lets an in-flight
/// cycle finish rather than killing its external subprocess mid-write.
pub struct CycleScheduler {
    trigger: TriggerHandle,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
    // Kept alive for the watch subscriptions; dropping a watcher
    // unsubscribes it.
    _watchers: Vec<notify::RecommendedWatcher>,
}

impl CycleScheduler {
    /// Starts the scheduler loop with one immediate startup cycle queued.
    pub fn start<R: CycleRunner + 'static>(runner: R, config: SchedulerConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        // Startup trigger: process whatever is already staged.
        let _ = tx.send(());

        let watchers = Self::subscribe_watchers(&config.watch_dirs, tx.clone());

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            runner,
            rx,
            config.debounce,
            config.poll_interval,
            shutdown.clone(),
        ));

        info!(
            watch_dirs = config.watch_dirs.len(),
            active_watchers = watchers.len(),
            "Cycle scheduler started"
        );

        Self {
            trigger: TriggerHandle { tx },
            shutdown,
            handle,
            _watchers: watchers,
        }
    }

    /// A handle for injecting triggers (e.g. from the drive poller).
    pub fn trigger_handle(&self) -> TriggerHandle {
        self.trigger.clone()
    }

    /// Stops the loop: no new cycles start, the in-flight cycle (and its
    /// external subprocess) is awaited to completion.
    pub async fn shutdown(self) {
        info!("Shutting down cycle scheduler");
        self.shutdown.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Scheduler task panicked during shutdown");
        }
        info!("Cycle scheduler stopped");
    }

    /// Subscribes a watcher per directory. Best-effort: a failed
    /// subscription is logged and skipped; the poll interval is the
    /// correctness backstop.
    fn subscribe_watchers(
        dirs: &[PathBuf],
        tx: mpsc::UnboundedSender<()>,
    ) -> Vec<notify::RecommendedWatcher> {
        let mut watchers = Vec::new();
        for dir in dirs {
            if let Err(e) = std::fs::create_dir_all(dir) {
                warn!(dir = %dir.display(), error = %e, "Could not create watch directory");
                continue;
            }

            let event_tx = tx.clone();
            let watched = dir.clone();
            let result = notify::recommended_watcher(move |res| match res {
                Ok(_event) => {
                    let _ = event_tx.send(());
                }
                Err(e) => warn!(dir = %watched.display(), error = %e, "File watch error"),
            });

            match result {
                Ok(mut watcher) => match watcher.watch(dir, RecursiveMode::Recursive) {
                    Ok(()) => {
                        debug!(dir = %dir.display(), "Watching for changes");
                        watchers.push(watcher);
                    }
                    Err(e) => {
                        warn!(dir = %dir.display(), error = %e, "Could not watch directory; relying on polling");
                    }
                },
                Err(e) => {
                    warn!(error = %e, "File watching unavailable; relying on polling");
                }
            }
        }
        watchers
    }
}

async fn run_loop<R: CycleRunner>(
    runner: R,
    mut rx: mpsc::UnboundedReceiver<()>,
    debounce: Duration,
    poll_interval: Duration,
    shutdown: CancellationToken,
) {
    let mut poll = tokio::time::interval(poll_interval);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first interval tick fires immediately; the startup trigger
    // already covers that cycle.
    poll.tick().await;

    loop {
        // Wait for something to do.
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = poll.tick() => {
                debug!("Poll tick; running fallback cycle");
            }
            msg = rx.recv() => {
                if msg.is_none() {
                    return;
                }
                // Debounce: restart the window on every further trigger
                // so a burst of events becomes one cycle.
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = tokio::time::sleep(debounce) => break,
                        m = rx.recv() => {
                            if m.is_none() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        // Single-flight execution. Triggers arriving while the cycle runs
        // set a pending flag and cause exactly one follow-up cycle,
        // without an additional debounce.
        let mut pending = true;
        while pending {
            pending = false;

            let cycle = runner.run_cycle();
            tokio::pin!(cycle);
            loop {
                tokio::select! {
                    res = &mut cycle => {
                        if let Err(e) = res {
                            warn!(error = %e, "Pipeline cycle failed");
                        }
                        break;
                    }
                    m = rx.recv() => {
                        if m.is_some() {
                            debug!("Trigger received mid-cycle; follow-up cycle queued");
                            pending = true;
                        }
                    }
                }
            }

            if shutdown.is_cancelled() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::CycleError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Runner that counts cycles and holds each one open for a fixed time.
    struct SlowRunner {
        runs: Arc<AtomicUsize>,
        hold: Duration,
    }

    impl CycleRunner for SlowRunner {
        async fn run_cycle(&self) -> Result<(), CycleError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.hold).await;
            Ok(())
        }
    }

    fn quiet_config() -> SchedulerConfig {
        SchedulerConfig::default()
            .with_debounce(Duration::from_millis(5))
            .with_poll_interval(Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_startup_runs_one_cycle() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runner = SlowRunner {
            runs: Arc::clone(&runs),
            hold: Duration::from_millis(1),
        };

        let scheduler = CycleScheduler::start(runner, quiet_config());
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.shutdown().await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_burst_of_triggers_coalesces_into_one_cycle() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runner = SlowRunner {
            runs: Arc::clone(&runs),
            hold: Duration::from_millis(1),
        };

        let scheduler = CycleScheduler::start(runner, quiet_config());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let trigger = scheduler.trigger_handle();
        for _ in 0..10 {
            trigger.trigger();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.shutdown().await;

        // Startup cycle plus one coalesced cycle for the burst.
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_triggers_during_cycle_cause_exactly_one_follow_up() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runner = SlowRunner {
            runs: Arc::clone(&runs),
            hold: Duration::from_millis(200),
        };

        let scheduler = CycleScheduler::start(runner, quiet_config());
        let trigger = scheduler.trigger_handle();

        // Let the startup cycle begin, then fire a burst mid-cycle.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        for _ in 0..5 {
            trigger.trigger();
        }

        // Wait for the in-flight cycle and the single follow-up.
        tokio::time::sleep(Duration::from_millis(600)).await;
        scheduler.shutdown().await;

        assert_eq!(
            runs.load(Ordering::SeqCst),
            2,
            "five mid-cycle triggers must cause exactly one follow-up cycle"
        );
    }

    #[tokio::test]
    async fn test_shutdown_prevents_new_cycles() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runner = SlowRunner {
            runs: Arc::clone(&runs),
            hold: Duration::from_millis(1),
        };

        let scheduler = CycleScheduler::start(runner, quiet_config());
        tokio::time::sleep(Duration::from_millis(100)).await;
        let trigger = scheduler.trigger_handle();
        scheduler.shutdown().await;

        trigger.trigger();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_watch_backend_does_not_break_scheduler() {
        // Watch dir that cannot be created: scheduler still runs cycles.
        let runs = Arc::new(AtomicUsize::new(0));
        let runner = SlowRunner {
            runs: Arc::clone(&runs),
            hold: Duration::from_millis(1),
        };

        let config = quiet_config()
            .with_watch_dirs(vec![PathBuf::from("/proc/nonexistent/cannot-create")]);
        let scheduler = CycleScheduler::start(runner, config);
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.shutdown().await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
