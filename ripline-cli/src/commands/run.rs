//! The `run` subcommands: long-running stage loops plus review verdicts.

use super::context;
use crate::error::CliError;
use clap::Subcommand;
use ripline::config::Settings;
use ripline::drive::DrivePoller;
use ripline::exec::{FfmpegTranscoder, SmbCopier};
use ripline::pipeline::{CycleRunner, StageCycle};
use ripline::plan::DiscId;
use ripline::review::ReviewService;
use ripline::scheduler::{CycleScheduler, SchedulerConfig};
use tracing::{info, warn};

#[derive(Subcommand)]
pub enum RunCommand {
    /// Poll optical drives, scan new discs, and extract planned tracks
    Extract,
    /// Transcode extracted tracks with ffmpeg
    Transcode,
    /// Copy encoded tracks to the configured SMB share
    Copy,
    /// Record a review verdict, or report review progress for a disc
    Review {
        /// Disc to review
        disc_id: String,
        /// Track number to record a verdict for
        #[arg(long)]
        track: Option<u32>,
        /// Final name for the track (e.g. the identified episode title)
        #[arg(long, conflicts_with = "ignore", requires = "track")]
        name: Option<String>,
        /// Discard the track instead of naming it
        #[arg(long, requires = "track")]
        ignore: bool,
    },
}

pub async fn execute(cmd: RunCommand, settings: &Settings) -> Result<(), CliError> {
    match cmd {
        RunCommand::Extract => extract(settings).await,
        RunCommand::Transcode => transcode(settings).await,
        RunCommand::Copy => copy(settings).await,
        RunCommand::Review {
            disc_id,
            track,
            name,
            ignore,
        } => review(settings, disc_id, track, name, ignore).await,
    }
}

#[cfg(target_os = "linux")]
async fn extract(settings: &Settings) -> Result<(), CliError> {
    use notify::Watcher;
    use ripline::drive::CdromDriveMonitor;
    use ripline::exec::{BlkidIdentifier, MakeMkvExtractor, MakeMkvScanner};
    use ripline::process::DriveProcessor;

    let ctx = context(settings);
    let processor = DriveProcessor::new(
        BlkidIdentifier::new(),
        MakeMkvScanner::new(),
        MakeMkvExtractor::new(),
        ctx.storage,
        ctx.queue,
    );
    let mut poller = DrivePoller::new(CdromDriveMonitor::new());

    // A new or edited plan gives an already-inserted disc another chance
    // without waiting for reinsertion.
    let (tx, mut plan_events) = tokio::sync::mpsc::unbounded_channel();
    let plans_dir = settings.paths().plans_dir();
    if let Err(e) = std::fs::create_dir_all(&plans_dir) {
        warn!(dir = %plans_dir.display(), error = %e, "Could not create plans directory");
    }
    let watcher_result =
        notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
            if res.is_ok() {
                let _ = tx.send(());
            }
        });
    let _watcher = match watcher_result {
        Ok(mut w) => match w.watch(&plans_dir, notify::RecursiveMode::NonRecursive) {
            Ok(()) => Some(w),
            Err(e) => {
                warn!(error = %e, "Could not watch plans directory; relying on reinsertion");
                None
            }
        },
        Err(e) => {
            warn!(error = %e, "File watching unavailable; relying on reinsertion");
            None
        }
    };

    info!(root = %settings.root.display(), "Drive polling started");
    let mut interval = tokio::time::interval(settings.poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = interval.tick() => poller.tick(&processor).await,
            Some(()) = plan_events.recv() => {
                info!("Plan change detected; re-checking inserted discs");
                poller.reset_processed();
            }
        }
    }
    info!("Drive polling stopped");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
async fn extract(_settings: &Settings) -> Result<(), CliError> {
    Err(CliError::Config(
        "drive polling requires Linux (CDROM ioctl)".to_string(),
    ))
}

async fn transcode(settings: &Settings) -> Result<(), CliError> {
    let ctx = context(settings);
    let executor = FfmpegTranscoder::new(ctx.queue.markers().clone());
    let cycle = StageCycle::new(executor, ctx.storage, ctx.queue);
    run_scheduled(cycle, settings).await
}

async fn copy(settings: &Settings) -> Result<(), CliError> {
    let smb = settings
        .smb
        .clone()
        .ok_or_else(|| CliError::Config("SMB_TARGET is not set".to_string()))?;
    let ctx = context(settings);
    let executor = SmbCopier::new(ctx.queue.markers().clone(), smb);
    let cycle = StageCycle::new(executor, ctx.storage, ctx.queue);
    run_scheduled(cycle, settings).await
}

/// Runs a stage cycle under the scheduler until interrupted, then lets
/// any in-flight cycle finish before returning.
async fn run_scheduled<R: CycleRunner + 'static>(
    runner: R,
    settings: &Settings,
) -> Result<(), CliError> {
    let paths = settings.paths();
    let config = SchedulerConfig::default()
        .with_debounce(settings.debounce)
        .with_watch_dirs(vec![paths.plans_dir(), paths.staging_dir()]);

    let scheduler = CycleScheduler::start(runner, config);
    tokio::signal::ctrl_c().await.ok();
    info!("Interrupt received; finishing in-flight work");
    scheduler.shutdown().await;
    Ok(())
}

async fn review(
    settings: &Settings,
    disc_id: String,
    track: Option<u32>,
    name: Option<String>,
    ignore: bool,
) -> Result<(), CliError> {
    let ctx = context(settings);
    let service = ReviewService::new(ctx.storage.clone(), ctx.queue.clone());
    let disc = DiscId::new(disc_id);

    let finalized = match track {
        Some(n) if ignore => service.record_ignore(&disc, n).await?,
        Some(n) => service.record_review(&disc, n, name.as_deref()).await?,
        None => {
            // No verdict given: just re-check whether the plan can be
            // finalized (e.g. after out-of-band marker edits).
            let plan = ctx.storage.read_plan(&disc).await?;
            service.finalize_if_complete(&plan).await?
        }
    };

    if finalized {
        println!("All tracks reviewed; plan for {disc} approved");
    } else {
        println!("Plan for {disc} still has tracks awaiting review");
    }
    Ok(())
}
