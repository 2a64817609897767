//! Runtime settings.
//!
//! Everything has a working default; the environment can override the data
//! root (`RIPLINE_ROOT`) and provide the SMB destination for the copy
//! stage (`SMB_TARGET`, `SMB_USER`, `SMB_PASSWORD`). Builder-style `with_*`
//! helpers exist so tests and embedders can construct settings without
//! touching the process environment.

use crate::paths::Paths;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid SMB target {0:?}: expected smb://host/share[/path]")]
    InvalidSmbTarget(String),

    #[error("environment variable {0} must be set when SMB_TARGET is set")]
    MissingVar(&'static str),
}

/// Top-level runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Data root holding plans, metadata, and the staging tree.
    pub root: PathBuf,
    /// Drive poll interval for the extract loop.
    pub poll_interval: Duration,
    /// Trigger debounce for the cycle scheduler.
    pub debounce: Duration,
    /// Copy destination; `None` disables the copy stage.
    pub smb: Option<SmbSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root: Paths::default_root(),
            poll_interval: Duration::from_secs(3),
            debounce: Duration::from_secs(1),
            smb: None,
        }
    }
}

impl Settings {
    /// Builds settings from the environment. Never fails: a malformed SMB
    /// configuration is logged and disables the copy stage rather than
    /// aborting the daemon.
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Ok(root) = std::env::var("RIPLINE_ROOT") {
            if !root.is_empty() {
                settings.root = PathBuf::from(root);
            }
        }

        match SmbSettings::from_env() {
            Ok(smb) => settings.smb = smb,
            Err(e) => warn!(error = %e, "SMB configuration invalid; copy stage disabled"),
        }
        settings
    }

    /// Path resolver rooted at this configuration's data root.
    pub fn paths(&self) -> Paths {
        Paths::new(&self.root)
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_smb(mut self, smb: SmbSettings) -> Self {
        self.smb = Some(smb);
        self
    }
}

/// SMB destination for the copy stage.
#[derive(Debug, Clone)]
pub struct SmbSettings {
    /// Service name for smbclient, e.g. `//nas/media`.
    pub service: String,
    /// Directory inside the share, e.g. `backups`. May be empty.
    pub base_path: String,
    pub user: String,
    pub password: String,
}

impl SmbSettings {
    /// Reads SMB settings from `SMB_TARGET`/`SMB_USER`/`SMB_PASSWORD`.
    /// No `SMB_TARGET` means the copy stage is simply not configured.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let target = match std::env::var("SMB_TARGET") {
            Ok(t) if !t.is_empty() => t,
            _ => return Ok(None),
        };
        let user = std::env::var("SMB_USER").map_err(|_| ConfigError::MissingVar("SMB_USER"))?;
        let password =
            std::env::var("SMB_PASSWORD").map_err(|_| ConfigError::MissingVar("SMB_PASSWORD"))?;
        Ok(Some(Self::from_target(&target, user, password)?))
    }

    /// Parses an `smb://host/share[/path]` URL into service and base path.
    pub fn from_target(
        target: &str,
        user: String,
        password: String,
    ) -> Result<Self, ConfigError> {
        let rest = target
            .strip_prefix("smb://")
            .ok_or_else(|| ConfigError::InvalidSmbTarget(target.to_string()))?;

        let mut parts = rest.splitn(3, '/');
        let host = parts.next().filter(|s| !s.is_empty());
        let share = parts.next().filter(|s| !s.is_empty());
        let (Some(host), Some(share)) = (host, share) else {
            return Err(ConfigError::InvalidSmbTarget(target.to_string()));
        };
        let base_path = parts.next().unwrap_or("").trim_matches('/').to_string();

        Ok(Self {
            service: format!("//{host}/{share}"),
            base_path,
            user,
            password,
        })
    }
}
