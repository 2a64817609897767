//! Hidden `internal` subcommands for hardware verification.

use crate::error::CliError;
use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum InternalCommand {
    /// Read the tray status of one drive
    DriveStatus {
        #[arg(long)]
        dev: PathBuf,
    },
    /// Identify the disc in a drive
    DiscIdentify {
        #[arg(long)]
        dev: PathBuf,
    },
    /// List detected optical drives
    DriveList,
}

pub async fn execute(cmd: InternalCommand) -> Result<(), CliError> {
    match cmd {
        InternalCommand::DriveStatus { dev } => drive_status(&dev),
        InternalCommand::DiscIdentify { dev } => disc_identify(&dev).await,
        InternalCommand::DriveList => drive_list(),
    }
}

#[cfg(target_os = "linux")]
fn drive_status(dev: &std::path::Path) -> Result<(), CliError> {
    use ripline::drive::{CdromDriveMonitor, DriveMonitor};
    let status = CdromDriveMonitor::new().status(dev)?;
    println!("{}: {status}", dev.display());
    Ok(())
}

#[cfg(target_os = "linux")]
fn drive_list() -> Result<(), CliError> {
    use ripline::drive::{CdromDriveMonitor, DriveMonitor};
    for drive in CdromDriveMonitor::new().list()? {
        println!("{}", drive.display());
    }
    Ok(())
}

async fn disc_identify(dev: &std::path::Path) -> Result<(), CliError> {
    use ripline::exec::BlkidIdentifier;
    use ripline::process::DiscIdentifier;
    let info = BlkidIdentifier::new().identify(dev).await?;
    println!("disc-id: {}", info.disc_id);
    println!("label:   {}", info.volume_label);
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn drive_status(_dev: &std::path::Path) -> Result<(), CliError> {
    Err(CliError::Config(
        "drive access requires Linux (CDROM ioctl)".to_string(),
    ))
}

#[cfg(not(target_os = "linux"))]
fn drive_list() -> Result<(), CliError> {
    Err(CliError::Config(
        "drive access requires Linux (CDROM ioctl)".to_string(),
    ))
}
