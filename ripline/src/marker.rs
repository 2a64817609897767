//! Marker store: durable per-(disc, track, stage) pipeline state.
//!
//! A marker is a small file whose presence records that a track reached a
//! particular state in a stage: `running`, `done`, `error`, or (review only)
//! `ignored`. `done` and `error` markers carry a JSON payload; `running`
//! markers are empty and advisory; a stale one left behind by a crash must
//! never gate correctness, only suppress a duplicate subprocess launch
//! within one process's lifetime.
//!
//! The store is pure filesystem plumbing with no business logic; the queue
//! rule engine in [`crate::queue`] interprets what markers mean. Every
//! readiness check re-reads the filesystem, which keeps the system resilient
//! to out-of-band edits: an operator deleting a `done` marker to force
//! re-processing is a supported recovery mechanism.

use crate::paths::Paths;
use crate::plan::DiscId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// One pipeline step for a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Extract,
    Transcode,
    Review,
    Copy,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 4] = [Stage::Extract, Stage::Transcode, Stage::Review, Stage::Copy];

    /// Staging subdirectory for this stage's files and markers.
    pub fn dir_name(self) -> &'static str {
        match self {
            Stage::Extract => "extracted",
            Stage::Transcode => "encoded",
            Stage::Review => "reviewed",
            Stage::Copy => "copied",
        }
    }

    /// Stage name for logging and CLI output.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Transcode => "transcode",
            Stage::Review => "review",
            Stage::Copy => "copy",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// The kind of fact a marker records.
///
/// `Ignored` is only meaningful for [`Stage::Review`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    Running,
    Done,
    Error,
    Ignored,
}

impl MarkerKind {
    /// File extension used for this marker kind.
    pub fn extension(self) -> &'static str {
        match self {
            MarkerKind::Running => "running",
            MarkerKind::Done => "done",
            MarkerKind::Error => "error",
            MarkerKind::Ignored => "ignored",
        }
    }
}

/// Key identifying one marker file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MarkerKey {
    pub disc_id: DiscId,
    pub track_number: u32,
    pub stage: Stage,
    pub kind: MarkerKind,
}

impl MarkerKey {
    pub fn new(disc_id: DiscId, track_number: u32, stage: Stage, kind: MarkerKind) -> Self {
        debug_assert!(
            kind != MarkerKind::Ignored || stage == Stage::Review,
            "ignored markers are only valid for the review stage"
        );
        Self {
            disc_id,
            track_number,
            stage,
            kind,
        }
    }
}

/// JSON payload written into `done` and `error` markers.
///
/// Stage-specific fields (extract: `sourceDrive`, `durationMs`; transcode:
/// `codec`, `crf`, `durationMs`; review: `finalName`, `episodeId`; copy:
/// `destination`) ride in the flattened `extra` map so the store stays
/// stage-agnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerPayload {
    pub disc_id: DiscId,
    pub track_number: u32,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MarkerPayload {
    /// Creates a payload stamped with the current time.
    pub fn new(disc_id: DiscId, track_number: u32) -> Self {
        Self {
            disc_id,
            track_number,
            timestamp: chrono::Utc::now(),
            extra: serde_json::Map::new(),
        }
    }

    /// Adds a stage-specific field.
    pub fn with(mut self, key: &str, value: serde_json::Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    /// Reads a stage-specific string field, if present.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str())
    }
}

/// Errors from marker file operations.
///
/// Note that "file does not exist" is *not* an error for `present` and
/// `remove`; absence is the expected steady state.
#[derive(Debug, Error)]
pub enum MarkerError {
    #[error("marker not found: {path}")]
    NotFound { path: PathBuf },

    #[error("marker I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("marker payload invalid at {path}: {source}")]
    InvalidPayload {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Capability to delete a `running` marker.
///
/// Returned by [`MarkerStore::write_running`]; callers clear it on every
/// exit path (success, stage error, panic recovery at next run) so a
/// running marker never outlives the work it describes within this
/// process's lifetime.
#[must_use = "clear the running marker on every exit path"]
#[derive(Debug)]
pub struct RunningGuard {
    path: PathBuf,
}

impl RunningGuard {
    /// Deletes the running marker. Missing file is fine; a crashed
    /// previous run or an operator may already have removed it.
    pub async fn clear(self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to clear running marker");
            }
        }
    }
}

/// File-backed store for pipeline markers.
///
/// All operations are single-file filesystem calls; there is no in-memory
/// cache of marker presence across calls.
#[derive(Debug, Clone)]
pub struct MarkerStore {
    paths: Paths,
}

impl MarkerStore {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    /// The path layout this store writes into.
    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    fn marker_path(&self, key: &MarkerKey) -> PathBuf {
        self.paths
            .marker(&key.disc_id, key.track_number, key.stage, key.kind)
    }

    /// Returns whether the marker exists. Absence is `Ok(false)`.
    pub async fn present(&self, key: &MarkerKey) -> Result<bool, MarkerError> {
        let path = self.marker_path(key);
        match tokio::fs::metadata(&path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MarkerError::Io { path, source: e }),
        }
    }

    /// Writes a `done`, `error`, or `ignored` marker with an optional
    /// payload. Re-writing an existing marker replaces its payload; the
    /// latest write wins.
    pub async fn write(
        &self,
        key: &MarkerKey,
        payload: Option<&MarkerPayload>,
    ) -> Result<(), MarkerError> {
        let path = self.marker_path(key);
        let body = match payload {
            Some(p) => serde_json::to_vec_pretty(p).map_err(|e| MarkerError::InvalidPayload {
                path: path.clone(),
                source: e,
            })?,
            None => Vec::new(),
        };
        self.write_file(&path, &body).await?;
        debug!(
            disc = %key.disc_id,
            track = key.track_number,
            stage = %key.stage,
            kind = key.kind.extension(),
            "Wrote marker"
        );
        Ok(())
    }

    /// Writes a `running` marker, returning a guard that deletes it.
    pub async fn write_running(
        &self,
        disc_id: &DiscId,
        track_number: u32,
        stage: Stage,
    ) -> Result<RunningGuard, MarkerError> {
        let key = MarkerKey::new(disc_id.clone(), track_number, stage, MarkerKind::Running);
        let path = self.marker_path(&key);
        self.write_file(&path, &[]).await?;
        Ok(RunningGuard { path })
    }

    /// Reads a marker's JSON payload.
    pub async fn read_payload(&self, key: &MarkerKey) -> Result<MarkerPayload, MarkerError> {
        let path = self.marker_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MarkerError::NotFound { path })
            }
            Err(e) => return Err(MarkerError::Io { path, source: e }),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| MarkerError::InvalidPayload { path, source: e })
    }

    /// Removes a marker. Missing file is `Ok`; that is the steady state.
    pub async fn remove(&self, key: &MarkerKey) -> Result<(), MarkerError> {
        let path = self.marker_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MarkerError::Io { path, source: e }),
        }
    }

    async fn write_file(&self, path: &PathBuf, body: &[u8]) -> Result<(), MarkerError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MarkerError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        tokio::fs::write(path, body)
            .await
            .map_err(|e| MarkerError::Io {
                path: path.clone(),
                source: e,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, MarkerStore) {
        let dir = TempDir::new().unwrap();
        let store = MarkerStore::new(Paths::new(dir.path()));
        (dir, store)
    }

    fn key(stage: Stage, kind: MarkerKind) -> MarkerKey {
        MarkerKey::new(DiscId::from("disc1"), 1, stage, kind)
    }

    #[tokio::test]
    async fn test_absent_marker_is_not_an_error() {
        let (_dir, store) = store();
        let present = store
            .present(&key(Stage::Extract, MarkerKind::Done))
            .await
            .unwrap();
        assert!(!present);
    }

    #[tokio::test]
    async fn test_write_then_present() {
        let (_dir, store) = store();
        let k = key(Stage::Extract, MarkerKind::Done);
        let payload = MarkerPayload::new(DiscId::from("disc1"), 1)
            .with("sourceDrive", serde_json::json!("/dev/sr0"));
        store.write(&k, Some(&payload)).await.unwrap();
        assert!(store.present(&k).await.unwrap());
    }

    #[tokio::test]
    async fn test_rewrite_replaces_payload() {
        let (_dir, store) = store();
        let k = key(Stage::Transcode, MarkerKind::Done);
        let first = MarkerPayload::new(DiscId::from("disc1"), 1)
            .with("codec", serde_json::json!("libx264"));
        let second = MarkerPayload::new(DiscId::from("disc1"), 1)
            .with("codec", serde_json::json!("libx265"));

        store.write(&k, Some(&first)).await.unwrap();
        store.write(&k, Some(&second)).await.unwrap();

        let read = store.read_payload(&k).await.unwrap();
        assert_eq!(read.get_str("codec"), Some("libx265"));
    }

    #[tokio::test]
    async fn test_read_payload_not_found() {
        let (_dir, store) = store();
        let err = store
            .read_payload(&key(Stage::Copy, MarkerKind::Done))
            .await
            .unwrap_err();
        assert!(matches!(err, MarkerError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (_dir, store) = store();
        let k = key(Stage::Extract, MarkerKind::Error);
        store.remove(&k).await.unwrap();

        store
            .write(&k, Some(&MarkerPayload::new(DiscId::from("disc1"), 1)))
            .await
            .unwrap();
        store.remove(&k).await.unwrap();
        store.remove(&k).await.unwrap();
        assert!(!store.present(&k).await.unwrap());
    }

    #[tokio::test]
    async fn test_running_guard_clears_marker() {
        let (_dir, store) = store();
        let disc = DiscId::from("disc1");
        let guard = store
            .write_running(&disc, 2, Stage::Transcode)
            .await
            .unwrap();

        let running = MarkerKey::new(disc.clone(), 2, Stage::Transcode, MarkerKind::Running);
        assert!(store.present(&running).await.unwrap());

        guard.clear().await;
        assert!(!store.present(&running).await.unwrap());
    }

    #[tokio::test]
    async fn test_running_guard_tolerates_missing_file() {
        let (_dir, store) = store();
        let disc = DiscId::from("disc1");
        let guard = store.write_running(&disc, 2, Stage::Copy).await.unwrap();

        // Operator deleted the marker out-of-band.
        let running = MarkerKey::new(disc.clone(), 2, Stage::Copy, MarkerKind::Running);
        store.remove(&running).await.unwrap();

        guard.clear().await;
    }

    #[tokio::test]
    async fn test_payload_round_trip_preserves_extra_fields() {
        let (_dir, store) = store();
        let k = key(Stage::Copy, MarkerKind::Done);
        let payload = MarkerPayload::new(DiscId::from("disc1"), 1)
            .with("destination", serde_json::json!("smb://nas/media/movies/x.mkv"));
        store.write(&k, Some(&payload)).await.unwrap();

        let read = store.read_payload(&k).await.unwrap();
        assert_eq!(read.disc_id.as_str(), "disc1");
        assert_eq!(read.track_number, 1);
        assert_eq!(
            read.get_str("destination"),
            Some("smb://nas/media/movies/x.mkv")
        );
    }
}
