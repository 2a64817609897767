//! MakeMKV integration: disc scanning and track extraction.
//!
//! `makemkvcon -r` emits a line protocol (`TINFO:idx,attr,code,"value"`).
//! The scanner here reads only the handful of attributes planning needs
//! (name, chapters, duration, size); everything else is ignored. MakeMKV
//! title indices are zero-based, while plan track numbers are one-based.

use crate::metadata::{DiscMetadata, TrackMetadata, VideoInfo};
use crate::process::{DiscInfo, MetadataScanner, ProcessError, TrackExtractor};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::warn;

const ATTR_NAME: u32 = 2;
const ATTR_CHAPTERS: u32 = 8;
const ATTR_DURATION: u32 = 9;
const ATTR_SIZE_BYTES: u32 = 11;

/// Track extractor shelling out to `makemkvcon mkv`.
#[derive(Debug, Default)]
pub struct MakeMkvExtractor;

impl MakeMkvExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl TrackExtractor for MakeMkvExtractor {
    async fn extract(
        &self,
        device: &Path,
        track_number: u32,
        output_dir: &Path,
    ) -> Result<PathBuf, ProcessError> {
        let title_index = track_number.saturating_sub(1);
        let mut cmd = Command::new("makemkvcon");
        cmd.arg("mkv")
            .arg(format!("dev:{}", device.display()))
            .arg(title_index.to_string())
            .arg(output_dir);

        super::run_command(&mut cmd, "makemkvcon mkv")
            .await
            .map_err(|message| ProcessError::Extract {
                track: track_number,
                message,
            })?;

        find_mkv_output(output_dir)
            .await?
            .ok_or_else(|| ProcessError::Extract {
                track: track_number,
                message: format!("no .mkv produced in {}", output_dir.display()),
            })
    }
}

/// MakeMKV names output files itself; the extraction directory is
/// per-track, so the first .mkv found is the result.
async fn find_mkv_output(dir: &Path) -> Result<Option<PathBuf>, ProcessError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| ProcessError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
    while let Some(entry) = entries.next_entry().await.map_err(|e| ProcessError::Io {
        path: dir.to_path_buf(),
        source: e,
    })? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "mkv") {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

/// Disc scanner shelling out to `makemkvcon -r info`.
#[derive(Debug, Default)]
pub struct MakeMkvScanner;

impl MakeMkvScanner {
    pub fn new() -> Self {
        Self
    }
}

impl MetadataScanner for MakeMkvScanner {
    async fn scan(&self, device: &Path, info: &DiscInfo) -> Result<DiscMetadata, ProcessError> {
        let mut cmd = Command::new("makemkvcon");
        cmd.arg("-r")
            .arg("info")
            .arg(format!("dev:{}", device.display()));
        let stdout = super::run_command_capture(&mut cmd, "makemkvcon info")
            .await
            .map_err(ProcessError::Scan)?;

        let tracks = parse_title_info(&stdout);
        if tracks.is_empty() {
            warn!(device = %device.display(), "MakeMKV reported no titles");
        }

        Ok(DiscMetadata {
            disc_id: info.disc_id.clone(),
            volume_label: info.volume_label.clone(),
            user_provided_name: info.volume_label.clone(),
            scanned_at: chrono::Utc::now(),
            tracks,
        })
    }
}

/// Parses the title-level attributes out of `makemkvcon -r info` output.
///
/// Stream-level detail (resolution, audio layout) is not read; the video
/// block is filled with placeholders. The planning wizard works from
/// name, duration, size, and chapter count.
fn parse_title_info(stdout: &str) -> Vec<TrackMetadata> {
    let mut titles: BTreeMap<u32, BTreeMap<u32, String>> = BTreeMap::new();

    for line in stdout.lines() {
        let Some((index, attr, value)) = parse_tinfo(line) else {
            continue;
        };
        titles.entry(index).or_default().insert(attr, value);
    }

    titles
        .into_iter()
        .map(|(index, attrs)| TrackMetadata {
            track_number: index + 1,
            title: attrs.get(&ATTR_NAME).cloned(),
            duration: attrs.get(&ATTR_DURATION).cloned().unwrap_or_default(),
            size: attrs
                .get(&ATTR_SIZE_BYTES)
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            video: VideoInfo {
                width: 0,
                height: 0,
                codec: String::new(),
                framerate: 0.0,
            },
            audio: Vec::new(),
            subtitles: Vec::new(),
            chapters: attrs
                .get(&ATTR_CHAPTERS)
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
        })
        .collect()
}

/// One `TINFO:idx,attr,code,"value"` line.
fn parse_tinfo(line: &str) -> Option<(u32, u32, String)> {
    let rest = line.strip_prefix("TINFO:")?;
    let mut parts = rest.splitn(4, ',');
    let index = parts.next()?.parse().ok()?;
    let attr = parts.next()?.parse().ok()?;
    let _code = parts.next()?;
    let value = parts.next()?.trim().trim_matches('"').to_string();
    Some((index, attr, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tinfo_line() {
        let (index, attr, value) =
            parse_tinfo(r#"TINFO:3,9,0,"1:32:00""#).unwrap();
        assert_eq!(index, 3);
        assert_eq!(attr, 9);
        assert_eq!(value, "1:32:00");
    }

    #[test]
    fn test_parse_tinfo_value_may_contain_commas() {
        let (_, _, value) =
            parse_tinfo(r#"TINFO:0,2,0,"Show, The - Season 1""#).unwrap();
        assert_eq!(value, "Show, The - Season 1");
    }

    #[test]
    fn test_parse_tinfo_rejects_other_lines() {
        assert!(parse_tinfo(r#"CINFO:1,6209,"Blu-ray disc""#).is_none());
        assert!(parse_tinfo("MSG:1005,0,1").is_none());
    }

    #[test]
    fn test_parse_title_info_builds_one_based_tracks() {
        let stdout = concat!(
            "CINFO:2,0,\"SOME_DISC\"\n",
            "TINFO:0,2,0,\"Main Feature\"\n",
            "TINFO:0,8,0,\"12\"\n",
            "TINFO:0,9,0,\"1:32:00\"\n",
            "TINFO:0,11,0,\"4700000000\"\n",
            "TINFO:1,2,0,\"Extras\"\n",
            "TINFO:1,9,0,\"0:15:30\"\n",
        );

        let tracks = parse_title_info(stdout);
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].track_number, 1);
        assert_eq!(tracks[0].title.as_deref(), Some("Main Feature"));
        assert_eq!(tracks[0].duration, "1:32:00");
        assert_eq!(tracks[0].size, 4_700_000_000);
        assert_eq!(tracks[0].chapters, 12);
        assert_eq!(tracks[1].track_number, 2);
        assert_eq!(tracks[1].size, 0);
    }

    #[tokio::test]
    async fn test_find_mkv_output_picks_mkv_only() {
        let dir = tempfile::TempDir::new().unwrap();
        tokio::fs::write(dir.path().join("log.txt"), b"x").await.unwrap();
        assert!(find_mkv_output(dir.path()).await.unwrap().is_none());

        tokio::fs::write(dir.path().join("title_t00.mkv"), b"v")
            .await
            .unwrap();
        let found = find_mkv_output(dir.path()).await.unwrap().unwrap();
        assert!(found.ends_with("title_t00.mkv"));
    }
}
