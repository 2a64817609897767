//! Optical drive hardware boundary and poll state machine.
//!
//! Hardware access is a collaborator behind the [`DriveMonitor`] trait:
//! `list()` enumerates drive device paths and `status()` reads the tray
//! state. The [`DrivePoller`] state machine sits on top, debouncing disc
//! insertions and guaranteeing exactly-once processing per insertion.

mod poller;

pub use poller::{DriveHandler, DrivePoller, DriveState, ProcessedToken};

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use linux::CdromDriveMonitor;

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Tray state as reported by the drive, mirroring the Linux
/// `CDROM_DRIVE_STATUS` ioctl values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveStatus {
    /// Status could not be determined (also the initial poller state).
    NoInfo = 0,
    NoDisk = 1,
    TrayOpen = 2,
    /// The drive is still spinning up / reading the TOC.
    Reading = 3,
    DiskPresent = 4,
}

impl DriveStatus {
    /// Maps a raw ioctl return value to a status.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(DriveStatus::NoInfo),
            1 => Some(DriveStatus::NoDisk),
            2 => Some(DriveStatus::TrayOpen),
            3 => Some(DriveStatus::Reading),
            4 => Some(DriveStatus::DiskPresent),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DriveStatus::NoInfo => "no-info",
            DriveStatus::NoDisk => "no-disk",
            DriveStatus::TrayOpen => "tray-open",
            DriveStatus::Reading => "reading",
            DriveStatus::DiskPresent => "disk-present",
        }
    }
}

impl std::fmt::Display for DriveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Errors from drive hardware access.
#[derive(Debug, Error)]
pub enum DriveError {
    #[error("failed to open drive {device}: {source}")]
    Open {
        device: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("drive status ioctl failed for {device}: code {code}")]
    Ioctl { device: PathBuf, code: i32 },

    #[error("failed to enumerate drives: {0}")]
    List(#[source] std::io::Error),

    #[error("drive status unknown value {raw} from {device}")]
    UnknownStatus { device: PathBuf, raw: i32 },

    #[error("drive access not supported on this platform")]
    Unsupported,
}

/// Hardware collaborator: enumerate drives and read tray status.
///
/// The poll state machine depends on this but does not implement it;
/// tests substitute a scripted mock.
pub trait DriveMonitor: Send + Sync {
    /// Lists optical drive device paths (e.g. `/dev/sr0`).
    fn list(&self) -> Result<Vec<PathBuf>, DriveError>;

    /// Reads the tray status for one drive.
    fn status(&self, device: &Path) -> Result<DriveStatus, DriveError>;
}
