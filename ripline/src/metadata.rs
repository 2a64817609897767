//! Disc metadata data model.
//!
//! Metadata is what the scanner learned about a disc: its tracks, their
//! durations, and their audio/subtitle layout. It is written once when a
//! disc is first seen and read-only to the pipeline; the planning wizard
//! turns it into a [`crate::plan::BackupPlan`].

use crate::plan::DiscId;
use serde::{Deserialize, Serialize};

/// Everything known about one disc's contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscMetadata {
    pub disc_id: DiscId,
    pub volume_label: String,
    pub user_provided_name: String,
    pub scanned_at: chrono::DateTime<chrono::Utc>,
    pub tracks: Vec<TrackMetadata>,
}

/// One title on the disc as reported by the scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackMetadata {
    pub track_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Duration as `HH:MM:SS`.
    pub duration: String,
    /// Size in bytes.
    pub size: u64,
    pub video: VideoInfo,
    pub audio: Vec<AudioTrack>,
    pub subtitles: Vec<SubtitleTrack>,
    pub chapters: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub codec: String,
    pub framerate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTrack {
    pub index: u32,
    pub language: String,
    pub codec: String,
    pub channels: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleTrack {
    pub index: u32,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl DiscMetadata {
    /// Parses a `HH:MM:SS` duration into whole seconds.
    ///
    /// Returns 0 for unparseable values; callers only use this for
    /// progress estimation, never correctness.
    pub fn duration_seconds(duration: &str) -> u64 {
        let parts: Vec<u64> = duration
            .split(':')
            .filter_map(|p| p.parse().ok())
            .collect();
        match parts.as_slice() {
            [h, m, s] => h * 3600 + m * 60 + s,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_seconds() {
        assert_eq!(DiscMetadata::duration_seconds("01:22:03"), 4923);
        assert_eq!(DiscMetadata::duration_seconds("00:00:30"), 30);
    }

    #[test]
    fn test_duration_seconds_malformed() {
        assert_eq!(DiscMetadata::duration_seconds("garbage"), 0);
        assert_eq!(DiscMetadata::duration_seconds("12:30"), 0);
        assert_eq!(DiscMetadata::duration_seconds(""), 0);
    }

    #[test]
    fn test_metadata_deserializes_camel_case() {
        let json = r#"{
            "discId": "d1",
            "volumeLabel": "MOVIE_DISC",
            "userProvidedName": "My Movie",
            "scannedAt": "2026-02-01T00:00:00Z",
            "tracks": [{
                "trackNumber": 1,
                "duration": "01:30:00",
                "size": 4700000000,
                "video": { "width": 1920, "height": 1080, "codec": "h264", "framerate": 23.976 },
                "audio": [{ "index": 0, "language": "eng", "codec": "ac3", "channels": 6 }],
                "subtitles": [],
                "chapters": 12
            }]
        }"#;
        let meta: DiscMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.volume_label, "MOVIE_DISC");
        assert_eq!(meta.tracks[0].video.width, 1920);
    }
}
