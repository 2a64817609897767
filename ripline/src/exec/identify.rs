//! Disc identification via `blkid`.
//!
//! The disc id is the filesystem UUID of the mounted disc, which is stable
//! across insertions of the same disc and distinct between pressings. The
//! volume label rides along for display.

use crate::plan::DiscId;
use crate::process::{DiscIdentifier, DiscInfo, ProcessError};
use std::path::Path;
use tokio::process::Command;

#[derive(Debug, Default)]
pub struct BlkidIdentifier;

impl BlkidIdentifier {
    pub fn new() -> Self {
        Self
    }

    async fn blkid_value(device: &Path, tag: &str) -> Result<String, ProcessError> {
        let mut cmd = Command::new("blkid");
        cmd.arg("-o")
            .arg("value")
            .arg("-s")
            .arg(tag)
            .arg(device);
        let out = super::run_command_capture(&mut cmd, "blkid")
            .await
            .map_err(ProcessError::Identify)?;
        Ok(out.trim().to_string())
    }
}

impl DiscIdentifier for BlkidIdentifier {
    async fn identify(&self, device: &Path) -> Result<DiscInfo, ProcessError> {
        let uuid = Self::blkid_value(device, "UUID").await?;
        if uuid.is_empty() {
            return Err(ProcessError::Identify(format!(
                "no filesystem UUID on {}",
                device.display()
            )));
        }
        // Label is optional on some pressings.
        let label = Self::blkid_value(device, "LABEL").await.unwrap_or_default();

        Ok(DiscInfo {
            disc_id: DiscId::new(uuid.to_lowercase()),
            volume_label: label,
        })
    }
}
