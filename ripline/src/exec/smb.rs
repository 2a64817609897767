//! Copy stage executor shelling out to smbclient.
//!
//! Uploads the encoded track to the configured share, under
//! `<base>/<series|movies>/<output directory>/`. The final filename
//! prefers the review verdict's `finalName` over the planned output name,
//! since review runs after planning and knows the real episode title.

use crate::config::SmbSettings;
use crate::marker::{MarkerError, MarkerKey, MarkerKind, MarkerPayload, MarkerStore, Stage};
use crate::pipeline::{StageError, StageExecutor};
use crate::plan::{BackupPlan, PlanType, TrackPlan};
use tokio::process::Command;
use tracing::{debug, info, warn};

pub struct SmbCopier {
    markers: MarkerStore,
    settings: SmbSettings,
}

impl SmbCopier {
    pub fn new(markers: MarkerStore, settings: SmbSettings) -> Self {
        Self { markers, settings }
    }

    /// Remote directory for a track, relative to the share root.
    fn remote_dir(&self, plan: &BackupPlan, track: &TrackPlan) -> String {
        let type_dir = match plan.plan_type {
            PlanType::Tv => "series",
            PlanType::Movie => "movies",
        };
        let dir = sanitize_component(&track.output.directory);
        [self.settings.base_path.as_str(), type_dir, dir.as_str()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Final filename: review `finalName` if one was recorded, otherwise
    /// the planned output filename. Always ends in `.mkv`.
    async fn final_filename(
        &self,
        plan: &BackupPlan,
        track: &TrackPlan,
    ) -> Result<String, MarkerError> {
        let review_done = MarkerKey::new(
            plan.disc_id.clone(),
            track.track_number,
            Stage::Review,
            MarkerKind::Done,
        );
        let name = match self.markers.read_payload(&review_done).await {
            Ok(payload) => payload
                .get_str("finalName")
                .map(|s| s.to_string())
                .unwrap_or_else(|| track.output.filename.clone()),
            Err(MarkerError::NotFound { .. }) => track.output.filename.clone(),
            Err(e) => return Err(e),
        };
        let name = sanitize_component(&name);
        if name.ends_with(".mkv") {
            Ok(name)
        } else {
            Ok(format!("{name}.mkv"))
        }
    }

    fn smbclient(&self) -> Command {
        let mut cmd = Command::new("smbclient");
        cmd.arg(&self.settings.service)
            .arg("-U")
            .arg(format!("{}%{}", self.settings.user, self.settings.password));
        cmd
    }

    /// Creates the remote directory tree one component at a time.
    /// smbclient's mkdir fails on existing directories, so failures here
    /// are expected and ignored; the put afterwards is the real check.
    async fn ensure_remote_dirs(&self, remote_dir: &str) {
        let mut cumulative = String::new();
        for component in remote_dir.split('/').filter(|c| !c.is_empty()) {
            if !cumulative.is_empty() {
                cumulative.push('/');
            }
            cumulative.push_str(component);
            let mut cmd = self.smbclient();
            cmd.arg("-c").arg(format!("mkdir \"{cumulative}\""));
            if let Err(e) = super::run_command(&mut cmd, "smbclient mkdir").await {
                debug!(dir = %cumulative, error = %e, "mkdir skipped (likely exists)");
            }
        }
    }

    async fn upload(
        &self,
        local: &std::path::Path,
        remote_dir: &str,
        filename: &str,
    ) -> Result<(), StageError> {
        self.ensure_remote_dirs(remote_dir).await;

        let remote_path = if remote_dir.is_empty() {
            filename.to_string()
        } else {
            format!("{remote_dir}/{filename}")
        };
        let mut cmd = self.smbclient();
        cmd.arg("-c")
            .arg(format!("put \"{}\" \"{remote_path}\"", local.display()));
        super::run_command(&mut cmd, "smbclient put")
            .await
            .map_err(StageError::Command)
    }
}

impl StageExecutor for SmbCopier {
    fn stage(&self) -> Stage {
        Stage::Copy
    }

    async fn execute(&self, plan: &BackupPlan, track: &TrackPlan) -> Result<(), StageError> {
        let paths = self.markers.paths();
        let disc_id = &plan.disc_id;
        let n = track.track_number;

        let input = paths.media(disc_id, Stage::Transcode, n);
        if !input.is_file() {
            let err = StageError::MissingInput { path: input };
            self.record_error(plan, track, &err).await;
            return Err(err);
        }

        let remote_dir = self.remote_dir(plan, track);
        let filename = match self.final_filename(plan, track).await {
            Ok(f) => f,
            Err(e) => {
                let err = StageError::Marker(e);
                self.record_error(plan, track, &err).await;
                return Err(err);
            }
        };
        let destination = format!("smb:{}/{remote_dir}/{filename}", self.settings.service);

        let guard = self.markers.write_running(disc_id, n, Stage::Copy).await?;
        let result = self.upload(&input, &remote_dir, &filename).await;
        guard.clear().await;

        if let Err(e) = result {
            self.record_error(plan, track, &e).await;
            return Err(e);
        }

        let done = MarkerKey::new(disc_id.clone(), n, Stage::Copy, MarkerKind::Done);
        let payload = MarkerPayload::new(disc_id.clone(), n)
            .with("destination", serde_json::json!(destination));
        self.markers.write(&done, Some(&payload)).await?;

        info!(disc = %disc_id, track = n, destination = %destination, "Track copied");
        Ok(())
    }
}

impl SmbCopier {
    async fn record_error(&self, plan: &BackupPlan, track: &TrackPlan, error: &StageError) {
        let key = MarkerKey::new(
            plan.disc_id.clone(),
            track.track_number,
            Stage::Copy,
            MarkerKind::Error,
        );
        let payload = MarkerPayload::new(plan.disc_id.clone(), track.track_number)
            .with("message", serde_json::json!(error.to_string()));
        if let Err(e) = self.markers.write(&key, Some(&payload)).await {
            warn!(
                disc = %plan.disc_id,
                track = track.track_number,
                error = %e,
                "Could not write error marker"
            );
        }
    }
}

/// Replaces characters SMB servers and media managers choke on.
fn sanitize_component(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' | '/' | '\\' => '-',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}
