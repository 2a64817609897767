//! Linux CDROM drive access via the `CDROM_DRIVE_STATUS` ioctl.

use super::{DriveError, DriveMonitor, DriveStatus};
use std::fs;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// `linux/cdrom.h` request code for reading tray status.
const CDROM_DRIVE_STATUS: libc::c_ulong = 0x5326;

/// Drive monitor backed by `/dev/sr*` device nodes.
#[derive(Debug, Default)]
pub struct CdromDriveMonitor;

impl CdromDriveMonitor {
    pub fn new() -> Self {
        Self
    }
}

impl DriveMonitor for CdromDriveMonitor {
    fn list(&self) -> Result<Vec<PathBuf>, DriveError> {
        let entries = fs::read_dir("/dev").map_err(DriveError::List)?;
        let mut drives: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with("sr"))
            })
            .map(|e| e.path())
            .collect();
        drives.sort();
        Ok(drives)
    }

    fn status(&self, device: &Path) -> Result<DriveStatus, DriveError> {
        // Non-blocking open so an empty or settling drive does not hang us.
        let file = fs::OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(device)
            .map_err(|e| DriveError::Open {
                device: device.to_path_buf(),
                source: e,
            })?;

        // Safety: fd is valid for the lifetime of `file`, and
        // CDROM_DRIVE_STATUS takes no out-pointer.
        let raw = unsafe { libc::ioctl(file.as_raw_fd(), CDROM_DRIVE_STATUS) };
        if raw < 0 {
            return Err(DriveError::Ioctl {
                device: device.to_path_buf(),
                code: raw,
            });
        }
        DriveStatus::from_raw(raw).ok_or(DriveError::UnknownStatus {
            device: device.to_path_buf(),
            raw,
        })
    }
}
