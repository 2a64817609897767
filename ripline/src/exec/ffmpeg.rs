//! Transcode stage executor shelling out to ffmpeg.
//!
//! Input is the extracted `t<NN>.mkv`, output the encoded `t<NN>.mkv` in
//! the next stage directory. Tracks without transcode settings are
//! remuxed (`-c copy`) so every track still passes through this stage and
//! earns its `done` marker.

use crate::marker::{MarkerKey, MarkerKind, MarkerPayload, MarkerStore, Stage};
use crate::pipeline::{StageError, StageExecutor};
use crate::plan::{BackupPlan, TrackPlan, TranscodeSettings};
use std::path::Path;
use std::time::Instant;
use tokio::process::Command;
use tracing::{info, warn};

pub struct FfmpegTranscoder {
    markers: MarkerStore,
}

impl FfmpegTranscoder {
    pub fn new(markers: MarkerStore) -> Self {
        Self { markers }
    }

    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        settings: Option<&TranscodeSettings>,
    ) -> Result<(), StageError> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StageError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-y")
            .arg("-nostdin")
            .arg("-hide_banner")
            .arg("-i")
            .arg(input);

        match settings {
            Some(s) => {
                cmd.arg("-map").arg("0:v:0");
                for lang in &s.audio {
                    cmd.arg("-map").arg(format!("0:a:m:language:{lang}?"));
                }
                for lang in &s.subtitles {
                    cmd.arg("-map").arg(format!("0:s:m:language:{lang}?"));
                }
                cmd.arg("-c:v")
                    .arg(&s.codec)
                    .arg("-preset")
                    .arg(&s.preset)
                    .arg("-crf")
                    .arg(s.crf.to_string())
                    .arg("-c:a")
                    .arg("copy")
                    .arg("-c:s")
                    .arg("copy");
            }
            None => {
                cmd.arg("-c").arg("copy");
            }
        }
        cmd.arg(output);

        if let Err(message) = super::run_command(&mut cmd, "ffmpeg").await {
            // Drop a partial output so a later retry starts clean.
            if let Err(e) = tokio::fs::remove_file(output).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %output.display(), error = %e, "Could not remove partial output");
                }
            }
            return Err(StageError::Command(message));
        }
        Ok(())
    }
}

impl StageExecutor for FfmpegTranscoder {
    fn stage(&self) -> Stage {
        Stage::Transcode
    }

    async fn execute(&self, plan: &BackupPlan, track: &TrackPlan) -> Result<(), StageError> {
        let paths = self.markers.paths();
        let disc_id = &plan.disc_id;
        let n = track.track_number;

        let input = paths.media(disc_id, Stage::Extract, n);
        if !input.is_file() {
            let err = StageError::MissingInput { path: input };
            self.record_error(plan, track, &err).await;
            return Err(err);
        }
        let output = paths.media(disc_id, Stage::Transcode, n);

        let guard = self.markers.write_running(disc_id, n, Stage::Transcode).await?;
        let started = Instant::now();
        let result = self
            .transcode(&input, &output, track.transcode.as_ref())
            .await;
        guard.clear().await;

        if let Err(e) = result {
            self.record_error(plan, track, &e).await;
            return Err(e);
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let codec = track
            .transcode
            .as_ref()
            .map(|s| s.codec.clone())
            .unwrap_or_else(|| "copy".to_string());
        let done = MarkerKey::new(disc_id.clone(), n, Stage::Transcode, MarkerKind::Done);
        let mut payload = MarkerPayload::new(disc_id.clone(), n)
            .with("codec", serde_json::json!(codec))
            .with("durationMs", serde_json::json!(duration_ms));
        if let Some(s) = &track.transcode {
            payload = payload.with("crf", serde_json::json!(s.crf));
        }
        self.markers.write(&done, Some(&payload)).await?;

        info!(disc = %disc_id, track = n, codec = %codec, duration_ms, "Track transcoded");
        Ok(())
    }
}

impl FfmpegTranscoder {
    async fn record_error(&self, plan: &BackupPlan, track: &TrackPlan, error: &StageError) {
        let key = MarkerKey::new(
            plan.disc_id.clone(),
            track.track_number,
            Stage::Transcode,
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
