//! Backup plan data model.
//!
//! A [`BackupPlan`] describes what to do with one disc: which tracks to
//! extract, how to transcode them, and where the output goes. Plans are
//! created by the planning wizard, mutated only by the review stage (which
//! approves them), and read-only to the rest of the pipeline.
//!
//! Plan files are stored as JSON at `<plansRoot>/<discId>.json` with
//! camelCase field names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque stable identifier for a disc, derived from its content hash
/// or volume UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiscId(String);

impl DiscId {
    /// Creates a disc id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DiscId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for DiscId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What kind of content the disc holds.
///
/// TV plans go through the review stage (episode identification);
/// movie plans skip it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Movie,
    Tv,
}

impl PlanType {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanType::Movie => "movie",
            PlanType::Tv => "tv",
        }
    }
}

/// Lifecycle status of a plan.
///
/// The pipeline itself only ever moves a plan from `Review` to `Approved`
/// (when every eligible track has been reviewed or ignored); all other
/// transitions belong to the planning wizard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Draft,
    Pending,
    Review,
    Approved,
    Completed,
}

impl PlanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanStatus::Draft => "draft",
            PlanStatus::Pending => "pending",
            PlanStatus::Review => "review",
            PlanStatus::Approved => "approved",
            PlanStatus::Completed => "completed",
        }
    }
}

/// One disc's backup plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupPlan {
    pub disc_id: DiscId,
    pub title: String,
    #[serde(rename = "type")]
    pub plan_type: PlanType,
    pub status: PlanStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub tracks: Vec<TrackPlan>,
}

/// One track selected for backup.
///
/// Immutable once extraction has started, except `name` and
/// `output.filename`, which review may overwrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackPlan {
    /// Disc-relative track number, never reassigned.
    pub track_number: u32,
    pub name: String,
    /// False means metadata-only: the track never enters the pipeline.
    pub extract: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcode: Option<TranscodeSettings>,
    pub output: OutputSettings,
}

/// Transcode parameters for a track.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeSettings {
    pub codec: String,
    pub preset: String,
    pub crf: u8,
    /// Audio language codes to keep.
    pub audio: Vec<String>,
    /// Subtitle language codes to keep.
    pub subtitles: Vec<String>,
}

/// Output destination for a track.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputSettings {
    pub filename: String,
    pub directory: String,
}
