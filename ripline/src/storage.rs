//! JSON persistence for plans and metadata.
//!
//! Plans and metadata are plain files under the data root; this module is
//! the only place that reads or writes them. Listing functions skip hidden
//! files and files that fail to parse (with a warning), so one corrupt
//! plan never takes down a cycle.

use crate::metadata::DiscMetadata;
use crate::paths::Paths;
use crate::plan::{BackupPlan, DiscId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Errors from plan and metadata persistence.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {path}")]
    NotFound { path: PathBuf },

    #[error("I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON at {path}: {source}")]
    InvalidJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// File-backed store for plans, metadata, and the staging layout.
#[derive(Debug, Clone)]
pub struct Storage {
    paths: Paths,
}

impl Storage {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Reads one disc's plan.
    pub async fn read_plan(&self, disc_id: &DiscId) -> Result<BackupPlan, StorageError> {
        read_json(&self.paths.plan(disc_id)).await
    }

    /// Writes one disc's plan, creating the plans directory if needed.
    pub async fn write_plan(&self, plan: &BackupPlan) -> Result<(), StorageError> {
        write_json(&self.paths.plan(&plan.disc_id), plan).await
    }

    /// Whether a plan exists for this disc.
    pub async fn plan_exists(&self, disc_id: &DiscId) -> Result<bool, StorageError> {
        exists(&self.paths.plan(disc_id)).await
    }

    /// All plans, sorted by disc id. Unparseable files are skipped with a
    /// warning.
    pub async fn list_plans(&self) -> Result<Vec<BackupPlan>, StorageError> {
        let ids = list_json_ids(&self.paths.plans_dir()).await?;
        let mut plans = Vec::with_capacity(ids.len());
        for id in ids {
            match self.read_plan(&id).await {
                Ok(plan) => plans.push(plan),
                Err(e) => warn!(disc = %id, error = %e, "Skipping unreadable plan"),
            }
        }
        Ok(plans)
    }

    /// Reads one disc's metadata.
    pub async fn read_metadata(&self, disc_id: &DiscId) -> Result<DiscMetadata, StorageError> {
        read_json(&self.paths.metadata(disc_id)).await
    }

    /// Writes one disc's metadata.
    pub async fn write_metadata(&self, metadata: &DiscMetadata) -> Result<(), StorageError> {
        write_json(&self.paths.metadata(&metadata.disc_id), metadata).await
    }

    /// Whether metadata exists for this disc.
    pub async fn metadata_exists(&self, disc_id: &DiscId) -> Result<bool, StorageError> {
        exists(&self.paths.metadata(disc_id)).await
    }

    /// Disc ids that have metadata, sorted.
    pub async fn list_metadata_ids(&self) -> Result<Vec<DiscId>, StorageError> {
        list_json_ids(&self.paths.metadata_dir()).await
    }

    /// Discs that have been scanned but not yet planned: the set
    /// difference metadata minus plans.
    pub async fn pending_plans(&self) -> Result<Vec<DiscId>, StorageError> {
        let metadata = self.list_metadata_ids().await?;
        let mut pending = Vec::new();
        for id in metadata {
            if !self.plan_exists(&id).await? {
                pending.push(id);
            }
        }
        Ok(pending)
    }

    /// Creates all four stage directories for a disc. Idempotent.
    pub async fn ensure_staging_dirs(&self, disc_id: &DiscId) -> Result<(), StorageError> {
        for stage in crate::marker::Stage::ALL {
            let dir = self.paths.stage_dir(disc_id, stage);
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| StorageError::Io {
                    path: dir.clone(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Disc ids with a staging directory, sorted. Hidden entries and plain
    /// files are skipped.
    pub async fn list_staged_discs(&self) -> Result<Vec<DiscId>, StorageError> {
        let dir = self.paths.staging_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::Io { path: dir, source: e }),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| StorageError::Io {
            path: dir.clone(),
            source: e,
        })? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if is_dir {
                ids.push(DiscId::new(name));
            }
        }
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }
}

async fn exists(path: &Path) -> Result<bool, StorageError> {
    match tokio::fs::metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StorageError::NotFound {
                path: path.to_path_buf(),
            })
        }
        Err(e) => {
            return Err(StorageError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    serde_json::from_slice(&bytes).map_err(|e| StorageError::InvalidJson {
        path: path.to_path_buf(),
        source: e,
    })
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
    }
    let body = serde_json::to_vec_pretty(value).map_err(|e| StorageError::InvalidJson {
        path: path.to_path_buf(),
        source: e,
    })?;
    tokio::fs::write(path, body)
        .await
        .map_err(|e| StorageError::Io {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Lists `<id>.json` stems in a directory, sorted. Hidden files and
/// non-JSON entries are skipped; a missing directory is an empty list.
async fn list_json_ids(dir: &Path) -> Result<Vec<DiscId>, StorageError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(StorageError::Io {
                path: dir.to_path_buf(),
                source: e,
            })
        }
    };

    let mut ids = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| StorageError::Io {
        path: dir.to_path_buf(),
        source: e,
    })? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with('.') {
            continue;
        }
        if let Some(stem) = name.strip_suffix(".json") {
            ids.push(DiscId::new(stem));
        }
    }
    ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    Ok(ids)
}
