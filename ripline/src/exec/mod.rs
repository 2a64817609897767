//! External tool boundary.
//!
//! Thin `tokio::process` wrappers around the tools the pipeline shells out
//! to: `blkid` (disc identity), `makemkvcon` (scan and extract), `ffmpeg`
//! (transcode), and `smbclient` (copy). Each implements one of the
//! collaborator traits from [`crate::process`] or [`crate::pipeline`], so
//! everything above this module is testable with mocks.

mod ffmpeg;
mod identify;
mod makemkv;
mod smb;

pub use ffmpeg::FfmpegTranscoder;
pub use identify::BlkidIdentifier;
pub use makemkv::{MakeMkvExtractor, MakeMkvScanner};
pub use smb::SmbCopier;

use tokio::process::Command;
use tracing::debug;

/// Runs a command to completion, discarding stdout.
///
/// Failure (spawn error or non-zero exit) is returned as a display string
/// carrying the last few stderr lines; callers wrap it in their own error
/// type.
pub(crate) async fn run_command(cmd: &mut Command, label: &str) -> Result<(), String> {
    run_command_capture(cmd, label).await.map(|_| ())
}

/// Runs a command to completion and returns its stdout as UTF-8.
pub(crate) async fn run_command_capture(
    cmd: &mut Command,
    label: &str,
) -> Result<String, String> {
    debug!(command = ?cmd.as_std(), "Running {label}");
    let output = cmd
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| format!("{label}: failed to spawn: {e}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "{label} exited with {}: {}",
            output.status,
            stderr_tail(&stderr)
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Last few stderr lines, enough for an error marker without dumping a
/// full tool transcript.
fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(5);
    lines[start..].join(" | ")
}
