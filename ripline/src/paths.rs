//! Filesystem layout for the ripline data root.
//!
//! Everything lives under one root (default `~/.ripline`):
//!
//! ```text
//! ~/.ripline/
//!   plans/<discId>.json
//!   metadata/<discId>.json
//!   staging/<discId>/
//!     extracted/  t01.mkv  t01.done  t01.running  t01.error
//!     encoded/    ...
//!     reviewed/   t01.done  t01.ignored
//!     copied/     t01.done
//! ```
//!
//! [`Paths`] owns the root so tests can point the whole system at a
//! temporary directory instead of the operator's home.

use crate::marker::{MarkerKind, Stage};
use crate::plan::DiscId;
use std::path::{Path, PathBuf};

/// Resolves every path the pipeline reads or writes.
#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    /// Creates a path resolver rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The default root: `~/.ripline`.
    ///
    /// Falls back to a relative `.ripline` when no home directory can be
    /// resolved (containers, stripped-down service accounts).
    pub fn default_root() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".ripline"))
            .unwrap_or_else(|| PathBuf::from(".ripline"))
    }

    /// The data root itself.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding plan files.
    pub fn plans_dir(&self) -> PathBuf {
        self.root.join("plans")
    }

    /// Plan file for one disc.
    pub fn plan(&self, disc_id: &DiscId) -> PathBuf {
        self.plans_dir().join(format!("{disc_id}.json"))
    }

    /// Directory holding metadata files.
    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join("metadata")
    }

    /// Metadata file for one disc.
    pub fn metadata(&self, disc_id: &DiscId) -> PathBuf {
        self.metadata_dir().join(format!("{disc_id}.json"))
    }

    /// Root of the staging tree.
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    /// Staging directory for one disc.
    pub fn disc_staging(&self, disc_id: &DiscId) -> PathBuf {
        self.staging_dir().join(disc_id.as_str())
    }

    /// Stage directory (`extracted`, `encoded`, `reviewed`, `copied`) for
    /// one disc.
    pub fn stage_dir(&self, disc_id: &DiscId, stage: Stage) -> PathBuf {
        self.disc_staging(disc_id).join(stage.dir_name())
    }

    /// Media file for one track within a stage directory (`t<NN>.mkv`).
    pub fn media(&self, disc_id: &DiscId, stage: Stage, track_number: u32) -> PathBuf {
        self.stage_dir(disc_id, stage)
            .join(format!("t{track_number:02}.mkv"))
    }

    /// Marker file for one (track, stage, kind) triple.
    pub fn marker(
        &self,
        disc_id: &DiscId,
        track_number: u32,
        stage: Stage,
        kind: MarkerKind,
    ) -> PathBuf {
        self.stage_dir(disc_id, stage)
            .join(format!("t{track_number:02}.{}", kind.extension()))
    }

    /// Isolated temp directory for one track's extraction, needed because
    /// MakeMKV picks its own output filenames.
    pub fn temp_extract_dir(&self, disc_id: &DiscId, track_number: u32) -> PathBuf {
        self.stage_dir(disc_id, Stage::Extract)
            .join(format!("temp_{track_number}"))
    }
}
